//! Runtime configuration for the control engine.
//!
//! These are the settings snapshot the owner hands to the engine with every
//! cycle. They are separate from the TOML-deserialized config in
//! `dropctl_config`; see `conversions` for the mapping.

use crate::types::Point2;

/// What a cycle computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Rebuild the droplet mask from the background and the seed line.
    MaskMaking,
    /// Erode the droplet mask into the channel mask and apply cut lines.
    ChannelCutting,
    /// Normal operation: segmentation and/or closed-loop control.
    #[default]
    Operate,
}

/// Overlay layers drawn on the annotated frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawFlags {
    pub channels: bool,
    pub droplets: bool,
    pub markers: bool,
    pub necks: bool,
}

impl Default for DrawFlags {
    fn default() -> Self {
        Self {
            channels: true,
            droplets: true,
            markers: true,
            necks: true,
        }
    }
}

/// Droplet mask construction.
#[derive(Debug, Clone)]
pub struct MaskCfg {
    /// Adaptive threshold neighbourhood (odd).
    pub block_size: u32,
    /// Offset below the local mean that still counts as wall.
    pub threshold: f64,
    /// Opening size; erosion uses `open_size + 3`, dilation `open_size`.
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

/// Channel mask construction and separation.
#[derive(Debug, Clone)]
pub struct ChannelCutCfg {
    pub erode_size: u32,
    pub cut_thickness: u32,
    pub min_area: usize,
}

impl Default for ChannelCutCfg {
    fn default() -> Self {
        Self {
            erode_size: 3,
            cut_thickness: 8,
            min_area: 20,
        }
    }
}

/// Per-cycle segmentation.
#[derive(Debug, Clone)]
pub struct ImgprocCfg {
    pub threshold: u8,
    pub erode_size: u32,
    pub contour_size: usize,
    pub track_too_far: f64,
    pub convex_size: f64,
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

/// Marker boxes, auto-catch margins and estimator noise.
#[derive(Debug, Clone)]
pub struct ControlCfg {
    pub marker_size: u32,
    pub auto_horz_excl: i32,
    pub auto_vert_excl: i32,
    pub model_cov: f64,
    pub disturbance_cov: f64,
    pub disturbance_corr: f64,
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
        }
    }
}

/// Neck-width feedback shaping.
#[derive(Debug, Clone)]
pub struct NeckCfg {
    pub desire: f64,
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

/// Per-channel operator requests; missing entries read as `false`.
#[derive(Debug, Clone, Default)]
pub struct ChannelRequests {
    pub auto_catch: Vec<bool>,
    pub use_neck: Vec<bool>,
    pub link: Vec<bool>,
    pub inverse_link: Vec<bool>,
    /// `true`: a neck channel follows the direct request with `+`, else `-`.
    pub neck_direction: Vec<bool>,
}

#[inline]
fn flag(v: &[bool], i: usize) -> bool {
    v.get(i).copied().unwrap_or(false)
}

impl ChannelRequests {
    pub fn auto_catch(&self, i: usize) -> bool {
        flag(&self.auto_catch, i)
    }
    pub fn use_neck(&self, i: usize) -> bool {
        flag(&self.use_neck, i)
    }
    pub fn link(&self, i: usize) -> bool {
        flag(&self.link, i)
    }
    pub fn inverse_link(&self, i: usize) -> bool {
        flag(&self.inverse_link, i)
    }
    pub fn neck_forward(&self, i: usize) -> bool {
        flag(&self.neck_direction, i)
    }
}

/// Straight segment in display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Segment {
    pub start: Point2,
    pub end: Point2,
}

impl Segment {
    pub const fn new(start: Point2, end: Point2) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f64 {
        self.start.distance(self.end)
    }

    pub fn unscale(&self, scale: f64) -> Self {
        Self::new(self.start.unscale(scale), self.end.unscale(scale))
    }
}

/// Pointer input gathered since the previous cycle, in display coordinates.
#[derive(Debug, Clone, Default)]
pub struct PointerEvents {
    pub left_click: Option<Point2>,
    pub right_click: Option<Point2>,
    /// Drag since the previous cycle: `start` is the previous pointer
    /// position and `end` the current one.
    pub drag: Option<Segment>,
    /// User-drawn lines. The first one is the seed/scale line, the rest are
    /// channel cuts.
    pub lines: Vec<Segment>,
}

/// Complete settings snapshot for one cycle.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub mode: Mode,
    pub imgproc_on: bool,
    pub ctrl_on: bool,
    pub draw: DrawFlags,
    pub display_scale: f64,
    pub mask: MaskCfg,
    pub channel: ChannelCutCfg,
    pub imgproc: ImgprocCfg,
    pub control: ControlCfg,
    pub neck: NeckCfg,
    pub requests: ChannelRequests,
    pub pointer: PointerEvents,
    /// Open-loop inlet values, one per plant input.
    pub inlet_requests: Vec<f64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            mode: Mode::Operate,
            imgproc_on: false,
            ctrl_on: false,
            draw: DrawFlags::default(),
            display_scale: 1.0,
            mask: MaskCfg::default(),
            channel: ChannelCutCfg::default(),
            imgproc: ImgprocCfg::default(),
            control: ControlCfg::default(),
            neck: NeckCfg::default(),
            requests: ChannelRequests::default(),
            pointer: PointerEvents::default(),
            inlet_requests: Vec::new(),
        }
    }
}

impl EngineSettings {
    /// Display-to-camera scale factor, falling back to 1 for bad values.
    pub fn scale(&self) -> f64 {
        if self.display_scale.is_finite() && self.display_scale > 0.0 {
            self.display_scale
        } else {
            1.0
        }
    }

    /// User lines converted to camera coordinates.
    pub fn camera_lines(&self) -> Vec<Segment> {
        let s = self.scale();
        self.pointer.lines.iter().map(|l| l.unscale(s)).collect()
    }
}
