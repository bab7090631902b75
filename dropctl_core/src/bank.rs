//! Controller bank: precomputed linear controllers keyed by the set of
//! channels they control.
//!
//! Every legal activation set is enumerated in advance by the bank, so
//! feasibility of a candidate set is a map lookup on its sorted layout.

use nalgebra::DMatrix;
use std::collections::HashMap;

/// Dimensions of the full plant every controller is a slice of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlantDims {
    pub states: usize,
    pub inputs: usize,
    pub outputs: usize,
}

/// One controller of the bank. Matrices are immutable after loading.
#[derive(Debug, Clone, PartialEq)]
pub struct Controller {
    pub n: usize,
    pub m: usize,
    pub p: usize,
    /// Non-zero when the calibration marked the model uncontrollable or
    /// unobservable.
    pub unco_unob: i32,
    /// Plant output (channel) index of each controller output.
    pub output_idx: Vec<usize>,
    /// Plant state index of each controller state.
    pub state_idx: Vec<usize>,
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
    pub c: DMatrix<f64>,
    pub d: DMatrix<f64>,
    pub k1: DMatrix<f64>,
    pub k2: DMatrix<f64>,
    pub h: DMatrix<f64>,
    pub ad: DMatrix<f64>,
    pub bd: DMatrix<f64>,
    pub cd: DMatrix<f64>,
    pub wd: DMatrix<f64>,
}

impl Controller {
    /// Row of this controller's output vector that measures `channel`.
    pub fn row_of(&self, channel: usize) -> Option<usize> {
        self.output_idx.iter().position(|&c| c == channel)
    }

    /// Sorted channel layout; the bank's lookup key.
    pub fn layout(&self) -> Vec<usize> {
        sorted(&self.output_idx)
    }

    pub fn is_usable(&self) -> bool {
        self.unco_unob == 0
    }
}

fn sorted(channels: &[usize]) -> Vec<usize> {
    let mut v = channels.to_vec();
    v.sort_unstable();
    v
}

#[derive(Debug, Clone, Default)]
pub struct ControllerBank {
    controllers: Vec<Controller>,
    by_layout: HashMap<Vec<usize>, usize>,
    sample_period: f64,
    plant: PlantDims,
}

impl ControllerBank {
    /// Build a bank from already-checked controllers. Controllers flagged
    /// uncontrollable/unobservable are kept but never returned by `lookup`;
    /// a later controller with the same layout as an earlier one is ignored.
    pub fn new(controllers: Vec<Controller>, sample_period: f64, plant: PlantDims) -> Self {
        let mut by_layout = HashMap::new();
        for (i, c) in controllers.iter().enumerate() {
            if !c.is_usable() {
                tracing::warn!(
                    controller = i,
                    unco_unob = c.unco_unob,
                    "controller excluded from activation lookup"
                );
                continue;
            }
            if by_layout.contains_key(&c.layout()) {
                tracing::warn!(controller = i, layout = ?c.layout(), "duplicate controller layout ignored");
                continue;
            }
            by_layout.insert(c.layout(), i);
        }
        Self {
            controllers,
            by_layout,
            sample_period,
            plant,
        }
    }

    /// Whether some controller covers exactly `channels`, in any order.
    /// The empty set is always feasible.
    pub fn supports(&self, channels: &[usize]) -> bool {
        channels.is_empty() || self.by_layout.contains_key(&sorted(channels))
    }

    pub fn lookup(&self, channels: &[usize]) -> Option<&Controller> {
        self.by_layout
            .get(&sorted(channels))
            .and_then(|&i| self.controllers.get(i))
    }

    pub fn get(&self, ordinal: usize) -> Option<&Controller> {
        self.controllers.get(ordinal)
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub fn sample_period(&self) -> f64 {
        self.sample_period
    }

    pub fn plant(&self) -> PlantDims {
        self.plant
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}
