use std::thread;
use std::time::{Duration, Instant};

/// Monotonic time source used to pace and time control cycles.
///
/// - now(): monotonic Instant
/// - sleep(): blocks for the duration (test clocks advance instead)
/// - us_since()/ms_since(): elapsed time from an epoch Instant
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Microseconds elapsed since `epoch`, saturating at 0.
    fn us_since(&self, epoch: Instant) -> u64 {
        let us = self.now().saturating_duration_since(epoch).as_micros();
        u64::try_from(us).unwrap_or(u64::MAX)
    }

    /// Milliseconds elapsed since `epoch`, saturating at 0.
    fn ms_since(&self, epoch: Instant) -> u64 {
        self.us_since(epoch) / 1_000
    }
}

/// Wall-clock implementation backed by `std::time::Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            thread::sleep(d);
        }
    }
}
