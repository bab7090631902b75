//! Rig hardware backends.
//!
//! Only the simulated rig ships today: a comb-shaped channel network seen
//! by a synthetic camera, with one dark marker per lane whose position
//! integrates that lane's inlet pressure.
pub mod error;
pub mod sim;

pub use sim::{RigLayout, SimulatedCamera, SimulatedPumps, SimulatedRig};
