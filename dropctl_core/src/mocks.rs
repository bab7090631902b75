//! Test and helper mocks for dropctl_core

use dropctl_traits::{Camera, Frame, PumpBank};
use std::sync::{Arc, Mutex};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A camera that returns the same frame forever.
#[derive(Debug, Clone)]
pub struct StaticCamera {
    pub frame: Frame,
}

impl Camera for StaticCamera {
    fn grab(&mut self, _timeout: std::time::Duration) -> Result<Frame, BoxError> {
        Ok(self.frame.clone())
    }
}

/// A camera that never delivers a frame.
pub struct DeadCamera;

impl Camera for DeadCamera {
    fn grab(&mut self, _timeout: std::time::Duration) -> Result<Frame, BoxError> {
        Err(Box::new(std::io::Error::other("camera timeout")))
    }
}

/// Pump bank that records every write; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingPumps {
    inlets: usize,
    writes: Arc<Mutex<Vec<Vec<f64>>>>,
}

impl RecordingPumps {
    pub fn new(inlets: usize) -> Self {
        Self {
            inlets,
            writes: Arc::default(),
        }
    }

    pub fn writes(&self) -> Vec<Vec<f64>> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl PumpBank for RecordingPumps {
    fn inlets(&self) -> usize {
        self.inlets
    }

    fn write(&mut self, values: &[f64]) -> Result<(), BoxError> {
        self.writes
            .lock()
            .map_err(|_| std::io::Error::other("pump log poisoned"))?
            .push(values.to_vec());
        Ok(())
    }
}
