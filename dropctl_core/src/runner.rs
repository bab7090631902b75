//! Rig loop: camera → engine worker → pumps.

use crate::config::EngineSettings;
use crate::conversions::frame_to_gray;
use crate::engine::CycleReport;
use crate::error::{EngineError, Result as CoreResult};
use crate::hw_error::map_hw_error;
use crate::util::{LatencyStats, period_us};
use crate::worker::{EngineWorker, Snapshot};
use dropctl_traits::clock::Clock;
use dropctl_traits::{Camera, PumpBank};
use eyre::WrapErr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Stop after this many cycles; `None` runs until shutdown.
    pub cycles: Option<u64>,
    pub cycle_hz: u32,
    /// Budget for one frame grab and for one cycle report.
    pub timeout: Duration,
    pub shutdown: Option<Arc<AtomicBool>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cycles: None,
            cycle_hz: 20,
            timeout: Duration::from_millis(1000),
            shutdown: None,
        }
    }
}

impl RunOptions {
    fn stop_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|f| f.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub cycles: u64,
    pub stats: LatencyStats,
    /// Last actuator vector written to the pumps.
    pub last_write: Vec<f64>,
}

/// Drive the rig until the cycle count is reached, shutdown is requested,
/// or a stage fails. `settings` supplies the snapshot for cycle `k`;
/// `on_cycle` sees every report after its actuator vector is written.
pub fn run_rig<C, P, K, S, F>(
    camera: &mut C,
    pumps: &mut P,
    worker: &EngineWorker,
    clock: &K,
    opts: &RunOptions,
    mut settings: S,
    mut on_cycle: F,
) -> CoreResult<RunSummary>
where
    C: Camera,
    P: PumpBank,
    K: Clock,
    S: FnMut(u64) -> EngineSettings,
    F: FnMut(&CycleReport) -> CoreResult<()>,
{
    let period_micros = period_us(opts.cycle_hz);
    let period = Duration::from_micros(period_micros);
    let mut summary = RunSummary::default();

    while opts.cycles.is_none_or(|n| summary.cycles < n) {
        if opts.stop_requested() {
            tracing::info!(cycles = summary.cycles, "rig loop stopped by request");
            break;
        }
        let started = clock.now();

        let frame = camera
            .grab(opts.timeout)
            .map_err(|e| map_hw_error(e.as_ref()))
            .wrap_err("grab frame")?;
        let frame = frame_to_gray(frame)?;
        worker.submit(Snapshot {
            settings: settings(summary.cycles),
            frame,
        })?;
        let report = worker.recv_timeout(opts.timeout)?.map_err(|e| {
            tracing::error!(cycle = summary.cycles, error = %e, "cycle failed");
            e
        })?;

        let write = &report.signals.inlet_write;
        if !write.is_empty() {
            if write.len() != pumps.inlets() {
                return Err(EngineError::State(format!(
                    "actuator vector has {} values for {} inlets",
                    write.len(),
                    pumps.inlets()
                ))
                .into());
            }
            pumps
                .write(write)
                .map_err(|e| map_hw_error(e.as_ref()))
                .wrap_err("write pumps")?;
            summary.last_write.clone_from(write);
        }
        summary.stats.record(report.elapsed_us, period_micros);
        summary.cycles += 1;
        on_cycle(&report)?;

        let spent = Duration::from_micros(clock.us_since(started));
        if let Some(rest) = period.checked_sub(spent) {
            clock.sleep(rest);
        }
    }

    Ok(summary)
}
