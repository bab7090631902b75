#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Droplet rig control engine (hardware-agnostic).
//!
//! This crate turns camera frames into actuator commands. All hardware
//! interactions go through `dropctl_traits::Camera` and
//! `dropctl_traits::PumpBank`.
//!
//! ## Pipeline
//!
//! One cycle runs, in order:
//!
//! - **Segmentation** (`vision`): background difference, hole filling and
//!   the stable masks give marker and droplet blobs; droplets get kink and
//!   neck detection.
//! - **Tracking** (`tracker`): markers inherit identities from the previous
//!   frame by nearest-centroid matching.
//! - **Association** (`association`): each channel's occupying droplet.
//! - **Arbitration** (`arbiter`): which channels are under control, always
//!   matching a controller of the `bank`.
//! - **Control** (`observer`): Kalman filter and Luenberger observer with
//!   integral feedback on the selected controller.
//! - **Rendering** (`render`): annotated colour frame.
//!
//! `Engine` owns the state between cycles; `EngineWorker` runs it on a
//! dedicated thread with latest-wins snapshot handoff, and `runner` ties a
//! camera and pump bank to the worker.

pub mod arbiter;
pub mod association;
pub mod bank;
pub mod channel;
pub mod config;
pub mod conversions;
pub mod engine;
pub mod error;
pub mod hw_error;
pub mod mocks;
pub mod observer;
pub mod render;
pub mod runner;
pub mod tracker;
pub mod types;
pub mod util;
pub mod vision;
pub mod worker;

pub use arbiter::{ActivationSet, Arbiter, Transition};
pub use bank::{Controller, ControllerBank, PlantDims};
pub use channel::{Channel, Follow};
pub use config::{
    ChannelCutCfg, ChannelRequests, ControlCfg, DrawFlags, EngineSettings, ImgprocCfg, MaskCfg,
    Mode, NeckCfg, PointerEvents, Segment,
};
pub use engine::{BankSummary, CycleReport, Engine};
pub use error::{EngineError, Report, Result};
pub use observer::{ControlSignals, ControlState};
pub use runner::{RunOptions, RunSummary, run_rig};
pub use tracker::{Marker, MarkerStream};
pub use types::{BoxRect, FlowDirection, Point2};
pub use worker::{EngineWorker, Snapshot};
