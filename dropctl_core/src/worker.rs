//! Cycle worker thread.
//!
//! Spawns a thread that owns the `Engine`. The owner pushes settings/frame
//! snapshots into a single-slot channel: a snapshot that arrives while the
//! previous one is still queued replaces it, so the next cycle always runs
//! on the most recent data. One-time operations are sent as closures and
//! run between cycles, never during one. Reports come back by value through
//! another single-slot channel with the same latest-wins rule.
//!
//! Each `EngineWorker` spawns exactly one thread, shut down and joined when
//! the worker is dropped.
use crate::config::EngineSettings;
use crate::engine::{CycleReport, Engine};
use crate::error::EngineError;
use crossbeam_channel as xch;
use image::GrayImage;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Inputs for one cycle, replaced wholesale between cycles.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub settings: EngineSettings,
    pub frame: GrayImage,
}

pub type CycleResult = Result<CycleReport, EngineError>;

type Op = Box<dyn FnOnce(&mut Engine) + Send>;

/// How often the idle worker re-checks the shutdown flag.
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Send into a single-slot channel, evicting a queued value if needed.
fn send_latest<T>(tx: &xch::Sender<T>, rx: &xch::Receiver<T>, mut value: T) -> Result<(), EngineError> {
    loop {
        match tx.try_send(value) {
            Ok(()) => return Ok(()),
            Err(xch::TrySendError::Full(v)) => {
                let _stale = rx.try_recv();
                value = v;
            }
            Err(xch::TrySendError::Disconnected(_)) => return Err(EngineError::WorkerStopped),
        }
    }
}

pub struct EngineWorker {
    snapshot_tx: xch::Sender<Snapshot>,
    snapshot_rx: xch::Receiver<Snapshot>,
    ops_tx: xch::Sender<Op>,
    report_rx: xch::Receiver<CycleResult>,
    cycles: Arc<AtomicU64>,
    /// Shutdown flag for immediate response (atomic for lock-free check)
    shutdown: Arc<AtomicBool>,
    /// Join handle for graceful thread cleanup
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl EngineWorker {
    pub fn spawn(mut engine: Engine) -> Self {
        let (snapshot_tx, snapshot_rx) = xch::bounded::<Snapshot>(1);
        let (ops_tx, ops_rx) = xch::unbounded::<Op>();
        let (report_tx, report_rx) = xch::bounded::<CycleResult>(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let cycles = Arc::new(AtomicU64::new(0));

        let thread_shutdown = shutdown.clone();
        let thread_cycles = cycles.clone();
        let thread_snapshots = snapshot_rx.clone();
        let report_drain = report_rx.clone();

        let join_handle = std::thread::spawn(move || {
            loop {
                if thread_shutdown.load(Ordering::Relaxed) {
                    tracing::debug!("engine worker received shutdown signal");
                    break;
                }
                // Pending operations first so they land between cycles.
                while let Ok(op) = ops_rx.try_recv() {
                    op(&mut engine);
                }
                xch::select! {
                    recv(ops_rx) -> op => match op {
                        Ok(op) => op(&mut engine),
                        Err(_) => {
                            tracing::debug!("engine owner disconnected, exiting worker");
                            break;
                        }
                    },
                    recv(thread_snapshots) -> snap => {
                        let Ok(snap) = snap else {
                            break;
                        };
                        engine.set_settings(snap.settings);
                        let result = engine.run_cycle(&snap.frame);
                        if let Err(e) = &result {
                            tracing::error!(error = %e, "cycle failed");
                        }
                        thread_cycles.fetch_add(1, Ordering::Relaxed);
                        if send_latest(&report_tx, &report_drain, result).is_err() {
                            tracing::debug!("report consumer disconnected, exiting worker");
                            break;
                        }
                    },
                    default(IDLE_POLL) => {},
                }
            }
            tracing::trace!("engine worker exiting cleanly");
        });

        Self {
            snapshot_tx,
            snapshot_rx,
            ops_tx,
            report_rx,
            cycles,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Request a cycle on `snapshot`, replacing any snapshot not yet started.
    pub fn submit(&self, snapshot: Snapshot) -> Result<(), EngineError> {
        send_latest(&self.snapshot_tx, &self.snapshot_rx, snapshot)
    }

    /// Run `f` on the engine between cycles and wait for its result.
    pub fn call<R, F>(&self, f: F) -> Result<R, EngineError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Engine) -> R + Send + 'static,
    {
        let (tx, rx) = xch::bounded(1);
        let op: Op = Box::new(move |engine| {
            let _ = tx.send(f(engine));
        });
        self.ops_tx.send(op).map_err(|_| EngineError::WorkerStopped)?;
        rx.recv().map_err(|_| EngineError::WorkerStopped)
    }

    /// Most recent report, if one arrived since the last check.
    pub fn latest(&self) -> Option<CycleResult> {
        self.report_rx.try_iter().last()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<CycleResult, EngineError> {
        self.report_rx.recv_timeout(timeout).map_err(|e| match e {
            xch::RecvTimeoutError::Timeout => EngineError::Timeout("cycle report"),
            xch::RecvTimeoutError::Disconnected => EngineError::WorkerStopped,
        })
    }

    /// Cycles run so far, failed ones included.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

impl Drop for EngineWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // A cycle in progress runs to completion; the thread exits at the
        // next shutdown check, at most one idle poll later.
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => {
                    tracing::trace!("engine worker joined successfully");
                }
                Err(e) => {
                    tracing::warn!(?e, "engine worker panicked during shutdown");
                }
            }
        }
    }
}
