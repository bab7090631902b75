//! Dual-observer integral controller.
//!
//! One step runs a discrete Kalman filter on the augmented (state plus
//! input disturbance) model and a Luenberger observer on the continuous
//! model side by side, then closes an integral loop on the tracking error.
//! Vectors are carried between cycles in plant coordinates; each step
//! gathers the slice the selected controller covers and scatters it back.

use crate::arbiter::Transition;
use crate::bank::{Controller, PlantDims};
use crate::config::{ChannelRequests, ControlCfg, NeckCfg, Segment};
use crate::error::EngineError;
use crate::types::{BoxRect, FlowDirection, Point2};
use nalgebra::{DMatrix, DVector};

/// Diagonal of the error covariance prior after a transition.
pub const PRIOR_COVARIANCE: f64 = 1000.0;

const PINV_EPS: f64 = 1e-12;

/// Pixel position projected onto the flow axis, in microns.
pub fn screen_to_ctrl(p: Point2, direction: FlowDirection, micron_per_pixel: f64) -> f64 {
    direction.project(p) * micron_per_pixel
}

/// Measurement correction from a neck width.
///
/// The error is the neck width in microns minus the desired width. Inside
/// `threshold` of the target the lower gain applies, beyond it the higher
/// gain; the curve is continuous and zero at the target.
pub fn neck_to_ctrl(neck_px: f64, micron_per_pixel: f64, cfg: &NeckCfg) -> f64 {
    let err = neck_px * micron_per_pixel - cfg.desire;
    let thr = cfg.threshold.max(0.0);
    if err.abs() <= thr {
        cfg.lower_gain * err
    } else {
        err.signum() * (cfg.lower_gain * thr + cfg.higher_gain * (err.abs() - thr))
    }
}

/// Where an active channel's measurement comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sensor {
    Marker { centroid: Point2, rect: BoxRect },
    Neck { distance_px: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveChannel {
    pub index: usize,
    pub direction: FlowDirection,
    pub sensor: Sensor,
}

/// Per-step inputs besides the carried state.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    /// Active channels in activation order.
    pub channels: &'a [ActiveChannel],
    /// Pointer drag in camera coordinates.
    pub drag: Option<Segment>,
    pub requests: &'a ChannelRequests,
    pub control: &'a ControlCfg,
    pub neck: &'a NeckCfg,
    pub micron_per_pixel: f64,
    pub sample_period: f64,
}

/// Named output vectors published every cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlSignals {
    pub ground: Vec<f64>,
    pub correction: Vec<f64>,
    pub reference: Vec<f64>,
    pub output: Vec<f64>,
    pub output_luenberger: Vec<f64>,
    pub output_kalman: Vec<f64>,
    pub output_raw: Vec<f64>,
    pub output_offset: Vec<f64>,
    pub state_kalman: Vec<f64>,
    pub disturbance: Vec<f64>,
    pub state_luenberger: Vec<f64>,
    pub state_integral: Vec<f64>,
    pub command: Vec<f64>,
    /// Actuator values: ground + correction + command, or the open-loop
    /// inlet requests when control is off.
    pub inlet_write: Vec<f64>,
}

impl ControlSignals {
    pub fn named(&self) -> [(&'static str, &[f64]); 14] {
        [
            ("ground", &self.ground),
            ("correction", &self.correction),
            ("reference", &self.reference),
            ("output", &self.output),
            ("output_luenberger", &self.output_luenberger),
            ("output_kalman", &self.output_kalman),
            ("output_raw", &self.output_raw),
            ("output_offset", &self.output_offset),
            ("state_kalman", &self.state_kalman),
            ("disturbance", &self.disturbance),
            ("state_luenberger", &self.state_luenberger),
            ("state_integral", &self.state_integral),
            ("command", &self.command),
            ("inlet_write", &self.inlet_write),
        ]
    }

    /// Signals with only the actuator vector set.
    pub fn open_loop(inlets: &[f64]) -> Self {
        Self {
            inlet_write: inlets.to_vec(),
            ..Self::default()
        }
    }
}

/// Carried control state, sized to the plant.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    pub ground: Vec<f64>,
    pub correction: Vec<f64>,
    pub reference: Vec<f64>,
    pub output: Vec<f64>,
    pub output_raw: Vec<f64>,
    pub output_offset: Vec<f64>,
    pub output_luenberger: Vec<f64>,
    pub output_kalman: Vec<f64>,
    pub state_kalman: Vec<f64>,
    pub disturbance: Vec<f64>,
    pub state_luenberger: Vec<f64>,
    pub state_integral: Vec<f64>,
    pub command: Vec<f64>,
    posterior: DMatrix<f64>,
    process_noise: DMatrix<f64>,
    sensor_noise: DMatrix<f64>,
}

impl ControlState {
    /// Fresh state with `ground` set to the open-loop inlet values.
    pub fn new(plant: PlantDims, inlet_requests: &[f64]) -> Result<Self, EngineError> {
        if inlet_requests.len() != plant.inputs {
            return Err(EngineError::Precondition(
                "inlet requests must hold one value per plant input",
            ));
        }
        Ok(Self {
            ground: inlet_requests.to_vec(),
            correction: vec![0.0; plant.inputs],
            reference: vec![0.0; plant.outputs],
            output: vec![0.0; plant.outputs],
            output_raw: vec![0.0; plant.outputs],
            output_offset: vec![0.0; plant.outputs],
            output_luenberger: vec![0.0; plant.outputs],
            output_kalman: vec![0.0; plant.outputs],
            state_kalman: vec![0.0; plant.states],
            disturbance: vec![0.0; plant.inputs],
            state_luenberger: vec![0.0; plant.states],
            state_integral: vec![0.0; plant.outputs],
            command: vec![0.0; plant.inputs],
            posterior: DMatrix::zeros(0, 0),
            process_noise: DMatrix::zeros(0, 0),
            sensor_noise: DMatrix::zeros(0, 0),
        })
    }

    pub fn plant(&self) -> PlantDims {
        PlantDims {
            states: self.state_kalman.len(),
            inputs: self.ground.len(),
            outputs: self.reference.len(),
        }
    }

    /// Zero everything a release invalidates; `ground` and `correction`
    /// survive.
    pub fn zero_carried(&mut self) {
        for v in [
            &mut self.reference,
            &mut self.output,
            &mut self.output_luenberger,
            &mut self.output_raw,
            &mut self.output_offset,
            &mut self.output_kalman,
            &mut self.state_kalman,
            &mut self.disturbance,
            &mut self.state_luenberger,
            &mut self.state_integral,
            &mut self.command,
        ] {
            v.fill(0.0);
        }
    }

    pub fn posterior(&self) -> &DMatrix<f64> {
        &self.posterior
    }

    /// Ground plus accumulated correction; the open-loop values to adopt
    /// when control is switched off.
    pub fn regurgitate(&self) -> Vec<f64> {
        self.ground.iter().zip(&self.correction).map(|(g, c)| g + c).collect()
    }

    pub fn inlet_write(&self) -> Vec<f64> {
        self.regurgitate()
            .iter()
            .zip(&self.command)
            .map(|(gc, u)| gc + u)
            .collect()
    }

    pub fn signals(&self) -> ControlSignals {
        ControlSignals {
            ground: self.ground.clone(),
            correction: self.correction.clone(),
            reference: self.reference.clone(),
            output: self.output.clone(),
            output_luenberger: self.output_luenberger.clone(),
            output_kalman: self.output_kalman.clone(),
            output_raw: self.output_raw.clone(),
            output_offset: self.output_offset.clone(),
            state_kalman: self.state_kalman.clone(),
            disturbance: self.disturbance.clone(),
            state_luenberger: self.state_luenberger.clone(),
            state_integral: self.state_integral.clone(),
            command: self.command.clone(),
            inlet_write: self.inlet_write(),
        }
    }

    fn reset_covariances(&mut self, ctrl: &Controller, control: &ControlCfg, micron_per_pixel: f64) {
        let (n, m, p) = (ctrl.n, ctrl.m, ctrl.p);
        let aug = n + m;
        self.posterior = DMatrix::identity(aug, aug) * PRIOR_COVARIANCE;
        self.process_noise = DMatrix::from_fn(aug, aug, |r, c| match (r == c, r < n) {
            (true, true) => control.model_cov,
            (true, false) => control.disturbance_cov,
            _ => 0.0,
        });
        self.sensor_noise = DMatrix::identity(p, p) * (micron_per_pixel.powi(2) / 12.0);
    }

    fn covariances_fit(&self, ctrl: &Controller) -> bool {
        let aug = ctrl.n + ctrl.m;
        self.posterior.shape() == (aug, aug)
            && self.process_noise.shape() == (aug, aug)
            && self.sensor_noise.shape() == (ctrl.p, ctrl.p)
    }

    fn fits(&self, ctrl: &Controller) -> bool {
        let plant = self.plant();
        ctrl.m <= plant.inputs
            && ctrl.output_idx.iter().all(|&i| i < plant.outputs)
            && ctrl.state_idx.iter().all(|&i| i < plant.states)
    }
}

/// Innovation covariance inverse, falling back to the pseudo-inverse.
fn invert(s: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    s.clone()
        .try_inverse()
        .filter(|inv| inv.iter().all(|v| v.is_finite()))
        .or_else(|| s.clone().pseudo_inverse(PINV_EPS).ok())
}

fn gather(src: &[f64], idx: &[usize]) -> DVector<f64> {
    DVector::from_iterator(idx.len(), idx.iter().map(|&i| src[i]))
}

/// Run one control step for the controller matching the active channels.
/// Clears `transition` when done.
pub fn step(
    state: &mut ControlState,
    ctrl: &Controller,
    transition: &mut Transition,
    input: &StepInput<'_>,
) -> Result<(), EngineError> {
    if !state.fits(ctrl) {
        return Err(EngineError::Precondition(
            "control state does not match the loaded controller bank",
        ));
    }
    let rows = input
        .channels
        .iter()
        .map(|ch| ctrl.row_of(ch.index))
        .collect::<Option<Vec<usize>>>()
        .filter(|r| r.len() == ctrl.p)
        .ok_or(EngineError::Precondition(
            "active channels do not match the selected controller",
        ))?;
    let (n, m, p) = (ctrl.n, ctrl.m, ctrl.p);
    let mpp = input.micron_per_pixel;

    if transition.any() || !state.covariances_fit(ctrl) {
        state.reset_covariances(ctrl, input.control, mpp);
    }
    if transition.releasing {
        state.zero_carried();
    }

    let mut r = gather(&state.reference, &ctrl.output_idx);
    let mut y_raw = gather(&state.output_raw, &ctrl.output_idx);
    let mut y_off = gather(&state.output_offset, &ctrl.output_idx);
    let mut z = gather(&state.state_integral, &ctrl.output_idx);
    let mut xl = gather(&state.state_luenberger, &ctrl.state_idx);
    let mut xe = DVector::zeros(n + m);
    for (i, &s) in ctrl.state_idx.iter().enumerate() {
        xe[i] = state.state_kalman[s];
    }
    for i in 0..m {
        xe[n + i] = state.disturbance[i];
    }
    let u = DVector::from_iterator(m, state.command.iter().take(m).copied());

    // Direct request: a drag that starts and ends inside one measuring
    // marker's box moves that channel's reference.
    let mut dr = DVector::zeros(p);
    let mut direct: Option<(usize, usize)> = None;
    if let Some(drag) = input.drag {
        for (k, ch) in input.channels.iter().enumerate() {
            if let Sensor::Marker { rect, .. } = ch.sensor {
                if rect.contains(drag.start) && rect.contains(drag.end) {
                    dr[rows[k]] = screen_to_ctrl(drag.end.minus(drag.start), ch.direction, mpp);
                    direct = Some((k, rows[k]));
                    break;
                }
            }
        }
    }
    if let Some((dk, drow)) = direct {
        let delta = dr[drow];
        for (k, ch) in input.channels.iter().enumerate() {
            if k != dk && input.requests.link(ch.index) {
                dr[rows[k]] = if input.requests.inverse_link(ch.index) { -delta } else { delta };
            }
        }
    }
    r += &dr;

    let mut y = DVector::zeros(p);
    for (k, ch) in input.channels.iter().enumerate() {
        let row = rows[k];
        y[row] = match ch.sensor {
            Sensor::Marker { centroid, .. } => screen_to_ctrl(centroid, ch.direction, mpp),
            Sensor::Neck { .. } => match direct {
                Some((dk, drow)) if dk != k => {
                    if input.requests.neck_forward(ch.index) {
                        y_raw[row] + dr[drow]
                    } else {
                        y_raw[row] - dr[drow]
                    }
                }
                _ => y_raw[row],
            },
        };
    }
    if transition.any() {
        y_off += &y - &y_raw;
    }
    y_raw.copy_from(&y);
    for (k, ch) in input.channels.iter().enumerate() {
        if let Sensor::Neck { distance_px } = ch.sensor {
            y[rows[k]] += neck_to_ctrl(distance_px, mpp, input.neck);
        }
    }
    y -= &y_off;

    // Kalman filter on the augmented model.
    let pp = &ctrl.ad * &state.posterior * ctrl.ad.transpose()
        + &ctrl.wd * &state.process_noise * ctrl.wd.transpose();
    let innovation_cov = &ctrl.cd * &pp * ctrl.cd.transpose() + &state.sensor_noise;
    let xp = &ctrl.ad * &xe + &ctrl.bd * &u;
    let yk = &ctrl.cd * &xp;
    match invert(&innovation_cov) {
        Some(s_inv) => {
            let k = &pp * ctrl.cd.transpose() * s_inv;
            state.posterior = (DMatrix::<f64>::identity(n + m, n + m) - &k * &ctrl.cd) * &pp;
            xe = &xp + &k * (&y - &yk);
        }
        None => {
            tracing::warn!(p, "innovation covariance not invertible, skipping Kalman correction");
            state.posterior = pp;
            xe = xp;
        }
    }

    // Luenberger observer on the continuous model.
    let yl = &ctrl.c * &xl + &ctrl.d * &u;
    xl = &ctrl.a * &xl + &ctrl.b * &u + &ctrl.h * (&y - &yl);

    z += (&y - &r) * input.sample_period;
    let u = -(&ctrl.k1 * &xl) - &ctrl.k2 * &z;

    for (i, &o) in ctrl.output_idx.iter().enumerate() {
        state.reference[o] = r[i];
        state.output[o] = y[i];
        state.output_luenberger[o] = yl[i];
        state.output_raw[o] = y_raw[i];
        state.output_offset[o] = y_off[i];
        state.output_kalman[o] = yk[i];
        state.state_integral[o] = z[i];
    }
    for (i, &s) in ctrl.state_idx.iter().enumerate() {
        state.state_luenberger[s] = xl[i];
        state.state_kalman[s] = xe[i];
    }
    for i in 0..m {
        state.command[i] = u[i];
        state.disturbance[i] = xe[n + i];
        state.correction[i] += input.control.disturbance_corr * state.disturbance[i];
    }

    *transition = Transition::default();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::fixtures::controller;
    use rstest::rstest;

    fn plant(n: usize) -> PlantDims {
        PlantDims {
            states: n,
            inputs: n,
            outputs: n,
        }
    }

    fn marker_channel(index: usize, x: f64) -> ActiveChannel {
        let c = Point2::new(x, 5.0);
        ActiveChannel {
            index,
            direction: FlowDirection::PosX,
            sensor: Sensor::Marker {
                centroid: c,
                rect: BoxRect::centered(c, 10),
            },
        }
    }

    struct Fixture {
        requests: ChannelRequests,
        control: ControlCfg,
        neck: NeckCfg,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                requests: ChannelRequests::default(),
                control: ControlCfg::default(),
                neck: NeckCfg::default(),
            }
        }

        fn input<'a>(&'a self, channels: &'a [ActiveChannel], drag: Option<Segment>) -> StepInput<'a> {
            StepInput {
                channels,
                drag,
                requests: &self.requests,
                control: &self.control,
                neck: &self.neck,
                micron_per_pixel: 2.0,
                sample_period: 0.05,
            }
        }
    }

    #[rstest]
    #[case(0.0, 0.0)]
    #[case(1.0, 5.0)]
    #[case(0.3, 0.9)]
    fn neck_at_desired_width_is_neutral(#[case] lower: f64, #[case] higher: f64) {
        let cfg = NeckCfg {
            desire: 40.0,
            threshold: 10.0,
            lower_gain: lower,
            higher_gain: higher,
        };
        assert_eq!(neck_to_ctrl(20.0, 2.0, &cfg), 0.0);
    }

    #[test]
    fn neck_gain_is_piecewise_and_continuous() {
        let cfg = NeckCfg {
            desire: 40.0,
            threshold: 10.0,
            lower_gain: 0.1,
            higher_gain: 1.0,
        };
        assert!((neck_to_ctrl(25.0, 2.0, &cfg) - 1.0).abs() < 1e-12);
        assert!((neck_to_ctrl(15.0, 2.0, &cfg) + 1.0).abs() < 1e-12);
        assert!((neck_to_ctrl(30.0, 2.0, &cfg) - 11.0).abs() < 1e-12);
        assert!((neck_to_ctrl(10.0, 2.0, &cfg) + 11.0).abs() < 1e-12);
    }

    #[test]
    fn screen_projection_scales_by_direction() {
        let p = Point2::new(3.0, -4.0);
        assert_eq!(screen_to_ctrl(p, FlowDirection::NegX, 2.0), -6.0);
        assert_eq!(screen_to_ctrl(p, FlowDirection::PosY, 0.5), -2.0);
    }

    #[test]
    fn ground_must_cover_every_input() {
        assert!(ControlState::new(plant(2), &[1.0]).is_err());
        let s = ControlState::new(plant(2), &[1.0, 2.0]).expect("state");
        assert_eq!(s.inlet_write(), vec![1.0, 2.0]);
    }

    #[test]
    fn selection_is_bumpless_and_offset_stays_fixed() {
        let fx = Fixture::new();
        let ctrl = controller(&[0], 1);
        let mut state = ControlState::new(plant(1), &[0.5]).expect("state");
        let mut tr = Transition {
            selecting: true,
            releasing: true,
        };
        let chans = [marker_channel(0, 10.0)];
        step(&mut state, &ctrl, &mut tr, &fx.input(&chans, None)).expect("step");
        assert_eq!(tr, Transition::default());
        assert_eq!(state.output_offset, vec![20.0]);
        assert_eq!(state.output, vec![0.0]);

        let moved = [marker_channel(0, 12.0)];
        for _ in 0..3 {
            step(&mut state, &ctrl, &mut tr, &fx.input(&moved, None)).expect("step");
            assert_eq!(state.output_offset, vec![20.0]);
            assert!((state.output[0] - (state.output_raw[0] - state.output_offset[0])).abs() < 1e-12);
        }
        assert_eq!(state.output_raw, vec![24.0]);
        assert!(state.state_integral[0] > 0.0);
        assert!(state.command[0] < 0.0);
    }

    #[test]
    fn posterior_is_carried_between_steps() {
        let fx = Fixture::new();
        let ctrl = controller(&[0], 1);
        let mut state = ControlState::new(plant(1), &[0.0]).expect("state");
        let mut tr = Transition {
            selecting: true,
            releasing: false,
        };
        let chans = [marker_channel(0, 10.0)];
        step(&mut state, &ctrl, &mut tr, &fx.input(&chans, None)).expect("step");
        let first = state.posterior().clone();
        assert!(first[(0, 0)] < PRIOR_COVARIANCE);
        step(&mut state, &ctrl, &mut tr, &fx.input(&chans, None)).expect("step");
        assert!(state.posterior()[(0, 0)] < first[(0, 0)] + 1.0 + 1e-9);
        assert_ne!(state.posterior(), &first);
    }

    #[test]
    fn release_zeroes_all_but_ground_and_correction() {
        let mut fx = Fixture::new();
        fx.control.disturbance_corr = 0.5;
        let ctrl = controller(&[0], 1);
        let mut state = ControlState::new(plant(1), &[1.0]).expect("state");
        let mut tr = Transition {
            selecting: true,
            releasing: false,
        };
        for x in [10.0, 11.0, 13.0] {
            step(&mut state, &ctrl, &mut tr, &fx.input(&[marker_channel(0, x)], None)).expect("step");
        }
        let correction = state.correction.clone();
        state.zero_carried();
        assert_eq!(state.ground, vec![1.0]);
        assert_eq!(state.correction, correction);
        assert_eq!(state.command, vec![0.0]);
        assert_eq!(state.output_offset, vec![0.0]);
        assert_eq!(state.regurgitate(), vec![1.0 + correction[0]]);
    }

    #[test]
    fn drag_moves_reference_and_links_follow() {
        let mut fx = Fixture::new();
        fx.requests.link = vec![false, true];
        fx.requests.inverse_link = vec![false, true];
        let ctrl = controller(&[0, 1], 2);
        let mut state = ControlState::new(plant(2), &[0.0, 0.0]).expect("state");
        let mut tr = Transition::default();
        let chans = [marker_channel(0, 10.0), marker_channel(1, 40.0)];
        let drag = Segment::new(Point2::new(9.0, 5.0), Point2::new(12.0, 5.0));
        step(&mut state, &ctrl, &mut tr, &fx.input(&chans, Some(drag))).expect("step");
        assert_eq!(state.reference, vec![6.0, -6.0]);

        let outside = Segment::new(Point2::new(9.0, 5.0), Point2::new(30.0, 5.0));
        step(&mut state, &ctrl, &mut tr, &fx.input(&chans, Some(outside))).expect("step");
        assert_eq!(state.reference, vec![6.0, -6.0]);
    }

    #[test]
    fn neck_channel_follows_direct_request() {
        let mut fx = Fixture::new();
        fx.requests.neck_direction = vec![false, true];
        fx.neck.lower_gain = 0.0;
        fx.neck.higher_gain = 0.0;
        let ctrl = controller(&[0, 1], 2);
        let mut state = ControlState::new(plant(2), &[0.0, 0.0]).expect("state");
        let mut tr = Transition::default();
        let chans = [
            marker_channel(0, 10.0),
            ActiveChannel {
                index: 1,
                direction: FlowDirection::PosX,
                sensor: Sensor::Neck { distance_px: 20.0 },
            },
        ];
        let drag = Segment::new(Point2::new(9.0, 5.0), Point2::new(11.0, 5.0));
        step(&mut state, &ctrl, &mut tr, &fx.input(&chans, Some(drag))).expect("step");
        assert_eq!(state.output_raw, vec![20.0, 4.0]);
        step(&mut state, &ctrl, &mut tr, &fx.input(&chans, None)).expect("step");
        assert_eq!(state.output_raw[1], 4.0);
    }

    #[test]
    fn singular_innovation_keeps_numbers_finite() {
        let fx = Fixture::new();
        let mut ctrl = controller(&[0], 1);
        ctrl.cd = DMatrix::zeros(1, 2);
        let mut state = ControlState::new(plant(1), &[0.0]).expect("state");
        let mut tr = Transition {
            selecting: true,
            releasing: true,
        };
        let chans = [marker_channel(0, 10.0)];
        let mut input = fx.input(&chans, None);
        input.micron_per_pixel = 0.0;
        step(&mut state, &ctrl, &mut tr, &input).expect("step");
        assert!(state.signals().named().iter().all(|(_, v)| v.iter().all(|x| x.is_finite())));
    }

    #[test]
    fn mismatched_channels_are_a_precondition_error() {
        let fx = Fixture::new();
        let ctrl = controller(&[0], 1);
        let mut state = ControlState::new(plant(2), &[0.0, 0.0]).expect("state");
        let mut tr = Transition::default();
        let chans = [marker_channel(1, 10.0)];
        let err = step(&mut state, &ctrl, &mut tr, &fx.input(&chans, None)).unwrap_err();
        assert!(matches!(err, EngineError::Precondition(_)));
    }
}
