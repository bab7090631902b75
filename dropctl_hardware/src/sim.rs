use crate::error::HwError;
use dropctl_traits::{Camera, Frame, PumpBank};
use std::sync::{Arc, Mutex, MutexGuard};

/// Geometry and gray levels of the simulated rig.
///
/// Lanes are horizontal bands stacked vertically and separated by walls. A
/// vertical trunk on the left joins all lanes into one connected network,
/// so a single seed point floods every lane until the trunk is cut.
#[derive(Debug, Clone, PartialEq)]
pub struct RigLayout {
    pub lanes: usize,
    pub width: u32,
    pub lane_height: u32,
    pub wall: u32,
    pub margin: u32,
    pub trunk_width: u32,
    pub marker_size: u32,
    /// Marker displacement per grabbed frame per unit of inlet pressure (pixels)
    pub response: f64,
    pub wall_level: u8,
    pub interior_level: u8,
    pub marker_level: u8,
}

impl Default for RigLayout {
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
            wall_level: 50,
            interior_level: 200,
            marker_level: 60,
        }
    }
}

/// Straight segment in camera pixel coordinates.
pub type Segment = ((f64, f64), (f64, f64));

impl RigLayout {
    pub fn height(&self) -> u32 {
        let lanes = u32::try_from(self.lanes).unwrap_or(u32::MAX);
        2 * self.margin + lanes * self.lane_height + lanes.saturating_sub(1) * self.wall
    }

    pub fn lane_top(&self, lane: usize) -> u32 {
        let lane = u32::try_from(lane).unwrap_or(u32::MAX);
        self.margin + lane * (self.lane_height + self.wall)
    }

    pub fn lane_center_y(&self, lane: usize) -> u32 {
        self.lane_top(lane) + self.lane_height / 2
    }

    fn trunk_span(&self) -> (u32, u32) {
        let last = self.lanes.saturating_sub(1);
        (self.lane_top(0), self.lane_top(last) + self.lane_height)
    }

    /// True for pixels inside a lane or the trunk.
    pub fn is_interior(&self, x: u32, y: u32) -> bool {
        let in_lane_x = x >= self.margin && x < self.width.saturating_sub(self.margin);
        let in_lane = (0..self.lanes).any(|lane| {
            let top = self.lane_top(lane);
            y >= top && y < top + self.lane_height
        });
        let (t0, t1) = self.trunk_span();
        let in_trunk = x >= self.margin && x < self.margin + self.trunk_width && y >= t0 && y < t1;
        (in_lane_x && in_lane) || in_trunk
    }

    /// Empty network, no markers.
    pub fn background(&self) -> Frame {
        let (w, h) = (self.width, self.height());
        let mut pixels = Vec::with_capacity((w as usize) * (h as usize));
        for y in 0..h {
            for x in 0..w {
                pixels.push(if self.is_interior(x, y) {
                    self.interior_level
                } else {
                    self.wall_level
                });
            }
        }
        Frame::new(w, h, pixels)
    }

    /// Short segment starting inside lane 0, away from the trunk and markers.
    /// Its start seeds the mask flood fill.
    pub fn seed_line(&self) -> Segment {
        let x = f64::from(self.margin + self.trunk_width + 2 * self.marker_size);
        let y = f64::from(self.lane_center_y(0));
        ((x, y), (x + 10.0, y))
    }

    /// Vertical cut through the trunk that splits the network into lanes.
    pub fn trunk_cut(&self) -> Segment {
        let x = f64::from(self.margin) + f64::from(self.trunk_width) / 2.0;
        let (t0, t1) = self.trunk_span();
        ((x, f64::from(t0.saturating_sub(2))), (x, f64::from(t1 + 2)))
    }

    /// Leftmost and rightmost marker centre positions that stay in the lane.
    pub fn marker_travel(&self) -> (f64, f64) {
        let half = f64::from(self.marker_size);
        let lo = f64::from(self.margin + self.trunk_width) + 2.0 * half;
        let hi = f64::from(self.width.saturating_sub(self.margin)) - 2.0 * half;
        (lo, hi)
    }
}

#[derive(Debug)]
struct RigState {
    positions: Vec<f64>,
    pressures: Vec<f64>,
    markers_visible: bool,
    frames: u64,
}

/// Shared simulated rig; hand out a camera and a pump bank that act on the
/// same physical state.
#[derive(Debug, Clone)]
pub struct SimulatedRig {
    layout: RigLayout,
    state: Arc<Mutex<RigState>>,
}

fn lock(state: &Mutex<RigState>) -> Result<MutexGuard<'_, RigState>, HwError> {
    state.lock().map_err(|_| HwError::Poisoned)
}

impl SimulatedRig {
    pub fn new(layout: RigLayout) -> Self {
        let start = f64::from(layout.width) / 2.0;
        let state = RigState {
            positions: vec![start; layout.lanes],
            pressures: vec![0.0; layout.lanes],
            markers_visible: true,
            frames: 0,
        };
        Self {
            layout,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn layout(&self) -> &RigLayout {
        &self.layout
    }

    pub fn camera(&self) -> SimulatedCamera {
        SimulatedCamera {
            rig: self.clone(),
        }
    }

    pub fn pumps(&self) -> SimulatedPumps {
        SimulatedPumps {
            rig: self.clone(),
        }
    }

    pub fn set_markers_visible(&self, visible: bool) -> Result<(), HwError> {
        lock(&self.state)?.markers_visible = visible;
        Ok(())
    }

    pub fn marker_position(&self, lane: usize) -> Option<f64> {
        lock(&self.state).ok()?.positions.get(lane).copied()
    }

    pub fn set_marker_position(&self, lane: usize, x: f64) -> Result<(), HwError> {
        let (lo, hi) = self.layout.marker_travel();
        let mut st = lock(&self.state)?;
        match st.positions.get_mut(lane) {
            Some(p) => {
                *p = x.clamp(lo, hi);
                Ok(())
            }
            None => Err(HwError::Camera(format!("no lane {lane}"))),
        }
    }

    pub fn pressures(&self) -> Vec<f64> {
        lock(&self.state)
            .map(|st| st.pressures.clone())
            .unwrap_or_default()
    }

    pub fn frames_grabbed(&self) -> u64 {
        lock(&self.state).map(|st| st.frames).unwrap_or(0)
    }

    fn render(&self, st: &RigState) -> Frame {
        let mut frame = self.layout.background();
        if !st.markers_visible {
            return frame;
        }
        let size = i64::from(self.layout.marker_size);
        let w = i64::from(frame.width);
        let h = i64::from(frame.height);
        for (lane, x) in st.positions.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let cx = x.round() as i64;
            let cy = i64::from(self.layout.lane_center_y(lane));
            let x0 = cx - size / 2;
            let y0 = cy - size / 2;
            for y in y0..y0 + size {
                for x in x0..x0 + size {
                    if (0..w).contains(&x) && (0..h).contains(&y) {
                        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                        let idx = (y * w + x) as usize;
                        frame.pixels[idx] = self.layout.marker_level;
                    }
                }
            }
        }
        frame
    }
}

/// Camera view of a `SimulatedRig`. Each grab advances the marker physics
/// by one step before rendering.
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    rig: SimulatedRig,
}

impl Camera for SimulatedCamera {
    fn grab(
        &mut self,
        _timeout: std::time::Duration,
    ) -> Result<Frame, Box<dyn std::error::Error + Send + Sync>> {
        let (lo, hi) = self.rig.layout.marker_travel();
        let response = self.rig.layout.response;
        let mut st = lock(&self.rig.state)?;
        let pressures = st.pressures.clone();
        for (pos, p) in st.positions.iter_mut().zip(pressures) {
            *pos = (*pos + response * p).clamp(lo, hi);
        }
        st.frames += 1;
        let frame = self.rig.render(&st);
        tracing::trace!(frame = st.frames, "simulated frame");
        Ok(frame)
    }
}

/// Inlet pumps of a `SimulatedRig`, one per lane.
#[derive(Debug, Clone)]
pub struct SimulatedPumps {
    rig: SimulatedRig,
}

impl PumpBank for SimulatedPumps {
    fn inlets(&self) -> usize {
        self.rig.layout.lanes
    }

    fn write(&mut self, values: &[f64]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let expected = self.inlets();
        if values.len() != expected {
            return Err(Box::new(HwError::InletCount {
                expected,
                got: values.len(),
            }));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(Box::new(HwError::Pump(format!("non-finite inlet value {bad}"))));
        }
        let mut st = lock(&self.rig.state)?;
        st.pressures.copy_from_slice(values);
        Ok(())
    }
}
