#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas for the droplet rig controller.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - `bank` holds the controller calibration-bank file schema and loader.
use serde::Deserialize;

pub mod bank;

pub use bank::{BankFile, ControllerEntry, MatrixEntry, load_bank, parse_bank};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayCfg {
    /// Factor between camera pixels and the operator's display pixels.
    pub scale: f64,
    /// Spatial scale used until a calibration line is measured.
    pub micron_per_pixel: f64,
}

impl Default for DisplayCfg {
    fn default() -> Self {
        Self {
            scale: 1.0,
            micron_per_pixel: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MaskCfg {
    /// Adaptive threshold neighbourhood (odd, >= 3)
    pub block_size: u32,
    /// Offset subtracted from the local mean
    pub threshold: f64,
    /// Opening size applied after the seed fill
    pub open_size: u32,
}

impl Default for MaskCfg {
    fn default() -> Self {
        Self {
            block_size: 15,
            threshold: 5.0,
            open_size: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChannelCfg {
    pub erode_size: u32,
    pub cut_thickness: u32,
    /// Separated regions smaller than this many pixels are ignored
    pub min_area: usize,
}

impl Default for ChannelCfg {
    fn default() -> Self {
        Self {
            erode_size: 3,
            cut_thickness: 8,
            min_area: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ImgprocCfg {
    /// Background difference threshold (gray levels)
    pub threshold: u8,
    pub erode_size: u32,
    /// Minimum blob area in pixels
    pub contour_size: usize,
    /// Largest centroid displacement (pixels) that keeps a marker identity
    pub track_too_far: f64,
    /// Minimum convexity defect depth (pixels) that counts as a kink
    pub convex_size: f64,
    /// Minimum persistence of a neck minimum (pixels)
    pub persistence: f64,
}

impl Default for ImgprocCfg {
    fn default() -> Self {
        Self {
            threshold: 40,
            erode_size: 1,
            contour_size: 8,
            track_too_far: 10.0,
            convex_size: 2.0,
            persistence: 3.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControlCfg {
    /// Side of the square marker box (pixels)
    pub marker_size: u32,
    /// Horizontal exclusion margin for auto-catch (pixels)
    pub auto_horz_excl: i32,
    /// Vertical exclusion margin for auto-catch (pixels)
    pub auto_vert_excl: i32,
    pub model_cov: f64,
    pub disturbance_cov: f64,
    /// Fraction of the estimated disturbance folded into the correction each cycle
    pub disturbance_corr: f64,
    /// Open-loop inlet values, one per plant input
    pub inlet_requests: Vec<f64>,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            marker_size: 10,
            auto_horz_excl: 0,
            auto_vert_excl: 0,
            model_cov: 1.0,
            disturbance_cov: 1.0,
            disturbance_corr: 0.0,
            inlet_requests: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NeckCfg {
    /// Desired neck width (microns)
    pub desire: f64,
    /// Half-width of the low-gain band around `desire` (microns)
    pub threshold: f64,
    pub lower_gain: f64,
    pub higher_gain: f64,
}

impl Default for NeckCfg {
    fn default() -> Self {
        Self {
            desire: 40.0,
            threshold: 10.0,
            lower_gain: 0.05,
            higher_gain: 0.2,
        }
    }
}

/// Per-channel operator requests. Arrays may be empty (all false) but
/// non-empty arrays must agree in length.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ChannelRequestsCfg {
    pub auto_catch: Vec<bool>,
    pub use_neck: Vec<bool>,
    pub link: Vec<bool>,
    pub inverse_link: Vec<bool>,
    pub neck_direction: Vec<bool>,
}

impl ChannelRequestsCfg {
    fn arrays(&self) -> [(&'static str, usize); 5] {
        [
            ("auto_catch", self.auto_catch.len()),
            ("use_neck", self.use_neck.len()),
            ("link", self.link.len()),
            ("inverse_link", self.inverse_link.len()),
            ("neck_direction", self.neck_direction.len()),
        ]
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunnerCfg {
    /// Cycle rate of the rig loop
    pub cycle_hz: u32,
    /// How long the rig loop waits for a cycle report
    pub cycle_timeout_ms: u64,
}

impl Default for RunnerCfg {
    fn default() -> Self {
        Self {
            cycle_hz: 20,
            cycle_timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Geometry of the simulated rig.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RigCfg {
    pub lanes: usize,
    pub width: u32,
    pub lane_height: u32,
    pub wall: u32,
    pub margin: u32,
    pub trunk_width: u32,
    pub marker_size: u32,
    /// Marker displacement per cycle per unit of inlet pressure (pixels)
    pub response: f64,
}

impl Default for RigCfg {
    fn default() -> Self {
        Self {
            lanes: 2,
            width: 160,
            lane_height: 16,
            wall: 14,
            margin: 12,
            trunk_width: 6,
            marker_size: 5,
            response: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub display: DisplayCfg,
    pub mask: MaskCfg,
    pub channel: ChannelCfg,
    pub imgproc: ImgprocCfg,
    pub control: ControlCfg,
    pub neck: NeckCfg,
    pub channels: ChannelRequestsCfg,
    pub runner: RunnerCfg,
    pub logging: Logging,
    pub rig: RigCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

fn finite_non_negative(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Display
        if !(self.display.scale.is_finite() && self.display.scale > 0.0) {
            eyre::bail!("display.scale must be > 0");
        }
        if !(self.display.micron_per_pixel.is_finite() && self.display.micron_per_pixel > 0.0) {
            eyre::bail!("display.micron_per_pixel must be > 0");
        }

        // Mask making
        if self.mask.block_size < 3 || self.mask.block_size % 2 == 0 {
            eyre::bail!("mask.block_size must be odd and >= 3");
        }
        if !self.mask.threshold.is_finite() {
            eyre::bail!("mask.threshold must be finite");
        }

        // Image processing
        if !finite_non_negative(self.imgproc.track_too_far) {
            eyre::bail!("imgproc.track_too_far must be >= 0");
        }
        if !finite_non_negative(self.imgproc.convex_size) {
            eyre::bail!("imgproc.convex_size must be >= 0");
        }
        if !finite_non_negative(self.imgproc.persistence) {
            eyre::bail!("imgproc.persistence must be >= 0");
        }

        // Control
        if self.control.marker_size == 0 {
            eyre::bail!("control.marker_size must be > 0");
        }
        if self.control.auto_horz_excl < 0 || self.control.auto_vert_excl < 0 {
            eyre::bail!("control.auto_*_excl margins must be >= 0");
        }
        if !finite_non_negative(self.control.model_cov) {
            eyre::bail!("control.model_cov must be >= 0");
        }
        if !finite_non_negative(self.control.disturbance_cov) {
            eyre::bail!("control.disturbance_cov must be >= 0");
        }
        if !self.control.disturbance_corr.is_finite() {
            eyre::bail!("control.disturbance_corr must be finite");
        }
        if self.control.inlet_requests.iter().any(|v| !v.is_finite()) {
            eyre::bail!("control.inlet_requests must be finite");
        }

        // Neck
        if !self.neck.desire.is_finite() {
            eyre::bail!("neck.desire must be finite");
        }
        if !finite_non_negative(self.neck.threshold) {
            eyre::bail!("neck.threshold must be >= 0");
        }
        if !(self.neck.lower_gain.is_finite() && self.neck.higher_gain.is_finite()) {
            eyre::bail!("neck gains must be finite");
        }

        // Channel requests
        let mut expected: Option<usize> = None;
        for (name, len) in self.channels.arrays() {
            if len == 0 {
                continue;
            }
            match expected {
                None => expected = Some(len),
                Some(e) if e != len => {
                    eyre::bail!("channels.{name} has {len} entries, expected {e}");
                }
                Some(_) => {}
            }
        }

        // Runner
        if self.runner.cycle_hz == 0 {
            eyre::bail!("runner.cycle_hz must be > 0");
        }
        if self.runner.cycle_timeout_ms == 0 {
            eyre::bail!("runner.cycle_timeout_ms must be > 0");
        }

        // Simulated rig
        if self.rig.lanes == 0 {
            eyre::bail!("rig.lanes must be >= 1");
        }
        if self.rig.lane_height < 8 || self.rig.wall < 4 {
            eyre::bail!("rig.lane_height must be >= 8 and rig.wall >= 4");
        }
        if self.rig.marker_size == 0 || self.rig.marker_size >= self.rig.lane_height {
            eyre::bail!("rig.marker_size must be > 0 and smaller than rig.lane_height");
        }
        if self.rig.width <= 2 * self.rig.margin + self.rig.trunk_width + 4 * self.rig.marker_size {
            eyre::bail!("rig.width is too small for the configured margin and trunk");
        }
        if !self.rig.response.is_finite() {
            eyre::bail!("rig.response must be finite");
        }

        Ok(())
    }
}
