//! `From` implementations bridging `dropctl_config` types to `dropctl_core` types.
//!
//! The controller bank goes through `TryFrom` because the file's matrices are
//! re-checked against the declared dimensions before anything is installed.

use crate::bank::{Controller, ControllerBank, PlantDims};
use crate::config::{
    ChannelCutCfg, ChannelRequests, ControlCfg, DrawFlags, EngineSettings, ImgprocCfg, MaskCfg,
    Mode, NeckCfg, PointerEvents,
};
use crate::error::EngineError;
use crate::runner::RunOptions;
use dropctl_config::bank::{BankFile, ControllerEntry, MatrixEntry};
use dropctl_traits::Frame;
use image::GrayImage;
use nalgebra::DMatrix;
use std::time::Duration;

// ── MaskCfg ──────────────────────────────────────────────────────────────────

impl From<&dropctl_config::MaskCfg> for MaskCfg {
    fn from(c: &dropctl_config::MaskCfg) -> Self {
        Self {
            block_size: c.block_size,
            threshold: c.threshold,
            open_size: c.open_size,
        }
    }
}

// ── ChannelCutCfg ────────────────────────────────────────────────────────────

impl From<&dropctl_config::ChannelCfg> for ChannelCutCfg {
    fn from(c: &dropctl_config::ChannelCfg) -> Self {
        Self {
            erode_size: c.erode_size,
            cut_thickness: c.cut_thickness,
            min_area: c.min_area,
        }
    }
}

// ── ImgprocCfg ───────────────────────────────────────────────────────────────

impl From<&dropctl_config::ImgprocCfg> for ImgprocCfg {
    fn from(c: &dropctl_config::ImgprocCfg) -> Self {
        Self {
            threshold: c.threshold,
            erode_size: c.erode_size,
            contour_size: c.contour_size,
            track_too_far: c.track_too_far,
            convex_size: c.convex_size,
            persistence: c.persistence,
        }
    }
}

// ── ControlCfg ───────────────────────────────────────────────────────────────

impl From<&dropctl_config::ControlCfg> for ControlCfg {
    fn from(c: &dropctl_config::ControlCfg) -> Self {
        Self {
            marker_size: c.marker_size,
            auto_horz_excl: c.auto_horz_excl,
            auto_vert_excl: c.auto_vert_excl,
            model_cov: c.model_cov,
            disturbance_cov: c.disturbance_cov,
            disturbance_corr: c.disturbance_corr,
        }
    }
}

// ── NeckCfg ──────────────────────────────────────────────────────────────────

impl From<&dropctl_config::NeckCfg> for NeckCfg {
    fn from(c: &dropctl_config::NeckCfg) -> Self {
        Self {
            desire: c.desire,
            threshold: c.threshold,
            lower_gain: c.lower_gain,
            higher_gain: c.higher_gain,
        }
    }
}

// ── ChannelRequests ──────────────────────────────────────────────────────────

impl From<&dropctl_config::ChannelRequestsCfg> for ChannelRequests {
    fn from(c: &dropctl_config::ChannelRequestsCfg) -> Self {
        Self {
            auto_catch: c.auto_catch.clone(),
            use_neck: c.use_neck.clone(),
            link: c.link.clone(),
            inverse_link: c.inverse_link.clone(),
            neck_direction: c.neck_direction.clone(),
        }
    }
}

// ── EngineSettings ───────────────────────────────────────────────────────────

/// Starting snapshot: operate mode with both stages off and no pointer input.
impl From<&dropctl_config::Config> for EngineSettings {
    fn from(c: &dropctl_config::Config) -> Self {
        Self {
            mode: Mode::Operate,
            imgproc_on: false,
            ctrl_on: false,
            draw: DrawFlags::default(),
            display_scale: c.display.scale,
            mask: (&c.mask).into(),
            channel: (&c.channel).into(),
            imgproc: (&c.imgproc).into(),
            control: (&c.control).into(),
            neck: (&c.neck).into(),
            requests: (&c.channels).into(),
            pointer: PointerEvents::default(),
            inlet_requests: c.control.inlet_requests.clone(),
        }
    }
}

// ── RunOptions ───────────────────────────────────────────────────────────────

impl From<&dropctl_config::RunnerCfg> for RunOptions {
    fn from(c: &dropctl_config::RunnerCfg) -> Self {
        Self {
            cycles: None,
            cycle_hz: c.cycle_hz,
            timeout: Duration::from_millis(c.cycle_timeout_ms),
            shutdown: None,
        }
    }
}

// ── Controller bank ──────────────────────────────────────────────────────────

fn matrix(e: &MatrixEntry) -> DMatrix<f64> {
    DMatrix::from_row_slice(e.rows, e.cols, &e.data)
}

impl From<&ControllerEntry> for Controller {
    fn from(e: &ControllerEntry) -> Self {
        Self {
            n: e.n,
            m: e.m,
            p: e.p,
            unco_unob: e.unco_unob,
            output_idx: e.output_idx.clone(),
            state_idx: e.state_idx.clone(),
            a: matrix(&e.a),
            b: matrix(&e.b),
            c: matrix(&e.c),
            d: matrix(&e.d),
            k1: matrix(&e.k1),
            k2: matrix(&e.k2),
            h: matrix(&e.h),
            ad: matrix(&e.ad),
            bd: matrix(&e.bd),
            cd: matrix(&e.cd),
            wd: matrix(&e.wd),
        }
    }
}

impl TryFrom<&BankFile> for ControllerBank {
    type Error = EngineError;

    fn try_from(file: &BankFile) -> Result<Self, Self::Error> {
        file.validate()
            .map_err(|e| EngineError::Calibration(e.to_string()))?;
        let controllers: Vec<Controller> = file
            .controllers()
            .into_iter()
            .map(|(ordinal, entry)| {
                tracing::debug!(
                    controller = ordinal,
                    n = entry.n,
                    m = entry.m,
                    p = entry.p,
                    outputs = ?entry.output_idx,
                    "controller loaded"
                );
                Controller::from(entry)
            })
            .collect();
        Ok(Self::new(
            controllers,
            file.sample_period,
            PlantDims {
                states: file.num_plant_state,
                inputs: file.num_plant_input,
                outputs: file.num_plant_output,
            },
        ))
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Take ownership of a camera frame as an 8-bit grayscale image.
pub fn frame_to_gray(frame: Frame) -> Result<GrayImage, EngineError> {
    let (w, h) = (frame.width, frame.height);
    GrayImage::from_raw(w, h, frame.pixels).ok_or_else(|| {
        EngineError::Hardware(format!("frame buffer does not match {w}x{h}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_bank_converts() {
        let text = include_str!("../../etc/bank_two_lanes.toml");
        let file = dropctl_config::bank::parse_bank(text).expect("bank parses");
        let bank = ControllerBank::try_from(&file).expect("bank converts");
        assert_eq!(bank.len(), 3);
        assert!(bank.supports(&[0]) && bank.supports(&[1]) && bank.supports(&[1, 0]));
        let pair = bank.lookup(&[0, 1]).expect("pair");
        assert_eq!(pair.ad.shape(), (pair.n + pair.m, pair.n + pair.m));
        assert_eq!(pair.cd.shape(), (pair.p, pair.n + pair.m));
    }

    #[test]
    fn invalid_bank_is_a_calibration_error() {
        let mut file = dropctl_config::bank::parse_bank(include_str!("../../etc/bank_two_lanes.toml"))
            .expect("bank parses");
        file.num_ctrl = 7;
        assert!(matches!(
            ControllerBank::try_from(&file),
            Err(EngineError::Calibration(_))
        ));
    }

    #[test]
    fn short_frame_is_rejected() {
        assert!(frame_to_gray(Frame::new(4, 4, vec![0; 15])).is_err());
        let img = frame_to_gray(Frame::new(4, 2, vec![7; 8])).expect("frame");
        assert_eq!(img.dimensions(), (4, 2));
    }

    #[test]
    fn default_config_maps_to_settings() {
        let cfg = dropctl_config::Config::default();
        let s = EngineSettings::from(&cfg);
        assert_eq!(s.mask.block_size, cfg.mask.block_size);
        assert_eq!(s.inlet_requests, cfg.control.inlet_requests);
        assert!(!s.ctrl_on);
    }
}
