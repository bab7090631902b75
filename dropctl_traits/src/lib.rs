//! Hardware boundary for the droplet rig.
//!
//! The control engine never talks to a camera driver or a pressure pump
//! directly. Everything goes through the small traits below, which keeps
//! `dropctl_core` testable against synthetic frames and recording pumps.
pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// One 8-bit grayscale camera frame, row-major, `width * height` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Uniform frame filled with `level`.
    pub fn filled(width: u32, height: u32, level: u8) -> Self {
        let len = (width as usize) * (height as usize);
        Self::new(width, height, vec![level; len])
    }

    /// True when the pixel buffer matches the declared geometry.
    pub fn is_consistent(&self) -> bool {
        self.pixels.len() == (self.width as usize) * (self.height as usize)
    }
}

/// Grayscale frame source.
pub trait Camera {
    fn grab(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Frame, Box<dyn std::error::Error + Send + Sync>>;
}

/// Bank of inlet pressure actuators, one value per plant input.
pub trait PumpBank {
    fn inlets(&self) -> usize;
    fn write(&mut self, values: &[f64]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
