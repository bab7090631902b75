//! Common time/period helpers for dropctl_core.

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Cycle period in microseconds for a given rate in Hz.
/// - Clamps `hz` to at least 1 to avoid division by zero.
/// - Ensures result is at least 1 microsecond.
#[inline]
pub fn period_us(hz: u32) -> u64 {
    (MICROS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Latency summary over a run of cycles, accumulated one sample at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub cycles: usize,
    pub min_us: u64,
    pub max_us: u64,
    pub avg_us: f64,
    pub stdev_us: f64,
    /// Cycles whose latency exceeded the configured period
    pub missed: usize,
    /// Sum of squared deviations from the running mean (Welford).
    m2: f64,
}

impl LatencyStats {
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, latency_us: u64, period_us: u64) {
        if self.cycles == 0 {
            self.min_us = latency_us;
            self.max_us = latency_us;
        } else {
            self.min_us = self.min_us.min(latency_us);
            self.max_us = self.max_us.max(latency_us);
        }
        self.cycles += 1;
        if latency_us > period_us {
            self.missed += 1;
        }

        let x = latency_us as f64;
        let delta = x - self.avg_us;
        self.avg_us += delta / self.cycles as f64;
        self.m2 += delta * (x - self.avg_us);
        self.stdev_us = if self.cycles > 1 {
            (self.m2 / (self.cycles - 1) as f64).sqrt()
        } else {
            0.0
        };
    }

    pub fn from_samples(latencies: &[u64], period_us: u64) -> Self {
        let mut stats = Self::default();
        for &l in latencies {
            stats.record(l, period_us);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_clamps_zero_rate() {
        assert_eq!(period_us(0), MICROS_PER_SEC);
        assert_eq!(period_us(20), 50_000);
    }

    #[test]
    fn stats_over_samples() {
        let s = LatencyStats::from_samples(&[10, 20, 30, 40], 25);
        assert_eq!((s.min_us, s.max_us, s.cycles, s.missed), (10, 40, 4, 2));
        assert!((s.avg_us - 25.0).abs() < 1e-9);
        assert!(s.stdev_us > 0.0);
        assert_eq!(LatencyStats::from_samples(&[], 10), LatencyStats::default());
    }

    #[test]
    fn running_stats_match_two_pass_values() {
        let samples = [120u64, 80, 200, 95, 150];
        let mut s = LatencyStats::default();
        for &l in &samples {
            s.record(l, 140);
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<u64>() as f64 / n;
        let var = samples.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / (n - 1.0);
        assert_eq!((s.cycles, s.min_us, s.max_us, s.missed), (5, 80, 200, 2));
        assert!((s.avg_us - mean).abs() < 1e-9);
        assert!((s.stdev_us - var.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn single_sample_has_zero_spread() {
        let mut s = LatencyStats::default();
        s.record(42, 10);
        assert_eq!((s.min_us, s.max_us, s.missed), (42, 42, 1));
        assert!((s.avg_us - 42.0).abs() < 1e-12);
        assert!(s.stdev_us.abs() < 1e-12);
    }
}
