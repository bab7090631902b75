//! Owned engine state and the per-cycle pipeline.
//!
//! `Engine` holds everything that lives across cycles: the background, the
//! stable masks, the channels, the controller bank, tracker and arbiter
//! state, and the carried control vectors. One-time operations and
//! `run_cycle` all take `&mut self`; the worker thread serialises them.

use crate::arbiter::{ActivationSet, Arbiter, ArbiterInput, Observations};
use crate::association::associate;
use crate::bank::{ControllerBank, PlantDims};
use crate::channel::{self, Channel, Follow};
use crate::config::{EngineSettings, Mode};
use crate::error::EngineError;
use crate::observer::{self, ActiveChannel, ControlSignals, ControlState, Sensor, StepInput};
use crate::render::{self, Scene};
use crate::tracker::{Detection, IdentityMinter, Marker, assign_identities};
use crate::types::FlowDirection;
use crate::vision::{self, Droplet, masks};
use dropctl_config::bank::BankFile;
use eyre::WrapErr;
use image::{GrayImage, RgbImage};
use std::path::Path;
use std::time::Instant;

/// Everything one cycle publishes, handed over by value.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub mode: Mode,
    pub signals: ControlSignals,
    pub annotated: RgbImage,
    pub activation: Vec<usize>,
    pub markers: Vec<Marker>,
    pub droplets: Vec<Droplet>,
    pub elapsed_us: u64,
}

/// What a freshly loaded bank provides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BankSummary {
    pub controllers: usize,
    pub usable: usize,
    pub sample_period: f64,
    pub plant: PlantDims,
}

impl BankSummary {
    pub fn of(bank: &ControllerBank) -> Self {
        Self {
            controllers: bank.len(),
            usable: bank.controllers().iter().filter(|c| c.is_usable()).count(),
            sample_period: bank.sample_period(),
            plant: bank.plant(),
        }
    }
}

#[derive(Debug)]
pub struct Engine {
    settings: EngineSettings,
    micron_per_pixel: f64,
    background: Option<GrayImage>,
    droplet_mask: Option<GrayImage>,
    /// Eroded droplet mask; marker candidates must fall inside it.
    marker_mask: Option<GrayImage>,
    /// Marker mask with the cut lines removed.
    all_channels: Option<GrayImage>,
    channels: Vec<Channel>,
    bank: ControllerBank,
    arbiter: Arbiter,
    minter: IdentityMinter,
    markers: Vec<Marker>,
    droplets: Vec<Droplet>,
    control: Option<ControlState>,
    cycle: u64,
}

impl Engine {
    pub fn new(settings: EngineSettings, micron_per_pixel: f64) -> Self {
        Self {
            settings,
            micron_per_pixel,
            background: None,
            droplet_mask: None,
            marker_mask: None,
            all_channels: None,
            channels: Vec::new(),
            bank: ControllerBank::default(),
            arbiter: Arbiter::default(),
            minter: IdentityMinter::default(),
            markers: Vec::new(),
            droplets: Vec::new(),
            control: None,
            cycle: 0,
        }
    }

    /// Replace the settings snapshot wholesale.
    pub fn set_settings(&mut self, settings: EngineSettings) {
        self.settings = settings;
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn micron_per_pixel(&self) -> f64 {
        self.micron_per_pixel
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn bank(&self) -> &ControllerBank {
        &self.bank
    }

    pub fn activation(&self) -> &ActivationSet {
        self.arbiter.active()
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn control_state(&self) -> Option<&ControlState> {
        self.control.as_ref()
    }

    pub fn droplet_mask(&self) -> Option<&GrayImage> {
        self.droplet_mask.as_ref()
    }

    pub fn all_channels(&self) -> Option<&GrayImage> {
        self.all_channels.as_ref()
    }

    // ── One-time operations ─────────────────────────────────────────────

    pub fn capture_background(&mut self, frame: GrayImage) {
        tracing::info!(width = frame.width(), height = frame.height(), "background captured");
        self.background = Some(frame);
    }

    /// Set the pixel scale from the first user line, which spans
    /// `micron_length` microns on the chip.
    pub fn calibrate_scale(&mut self, micron_length: f64) -> Result<f64, EngineError> {
        let line = self
            .settings
            .pointer
            .lines
            .first()
            .ok_or(EngineError::Precondition("scale calibration needs a user line"))?;
        let display_px = line.length();
        if !(micron_length.is_finite() && micron_length > 0.0) || display_px <= 0.0 {
            return Err(EngineError::Calibration(format!(
                "cannot calibrate {micron_length} um over a {display_px} px line"
            )));
        }
        self.micron_per_pixel = micron_length * self.settings.scale() / display_px;
        tracing::info!(micron_per_pixel = self.micron_per_pixel, "scale calibrated");
        Ok(self.micron_per_pixel)
    }

    /// Split the cut channel mask into channels; returns how many.
    pub fn separate_channels(&mut self) -> Result<usize, EngineError> {
        let all = self
            .all_channels
            .as_ref()
            .ok_or(EngineError::Precondition("no channel mask; run channel cutting first"))?;
        self.arbiter.reset(&mut self.channels);
        self.channels = channel::separate(all, self.settings.channel.min_area);
        tracing::info!(channels = self.channels.len(), "channels separated");
        Ok(self.channels.len())
    }

    pub fn sort_channels(
        &mut self,
        new_indices: &[usize],
        directions: &[FlowDirection],
    ) -> Result<(), EngineError> {
        channel::sort(&mut self.channels, new_indices, directions)?;
        self.arbiter.reset(&mut self.channels);
        tracing::info!(order = ?new_indices, "channels sorted");
        Ok(())
    }

    /// Install a new controller bank. On error the previous bank stays.
    /// Any activation and carried control state is dropped.
    pub fn load_bank(&mut self, file: &BankFile) -> Result<BankSummary, EngineError> {
        let bank = ControllerBank::try_from(file)?;
        self.bank = bank;
        self.arbiter.reset(&mut self.channels);
        self.control = None;
        let summary = BankSummary::of(&self.bank);
        tracing::info!(
            controllers = summary.controllers,
            usable = summary.usable,
            sample_period = summary.sample_period,
            "controller bank loaded"
        );
        Ok(summary)
    }

    pub fn load_bank_path(&mut self, path: &Path) -> crate::error::Result<BankSummary> {
        let file = dropctl_config::bank::load_bank(path)
            .wrap_err_with(|| format!("load controller bank {}", path.display()))?;
        Ok(self.load_bank(&file)?)
    }

    pub fn init_imgproc(&mut self) -> Result<(), EngineError> {
        self.require_imgproc()?;
        self.minter.reset();
        self.markers.clear();
        self.droplets.clear();
        Ok(())
    }

    /// Forget tracking and activation state.
    pub fn finalize_imgproc(&mut self) {
        self.minter.reset();
        self.markers.clear();
        self.droplets.clear();
        self.arbiter.reset(&mut self.channels);
    }

    /// Start closed-loop control from the current open-loop inlet values.
    pub fn init_ctrl(&mut self) -> Result<(), EngineError> {
        self.require_ctrl()?;
        self.control = Some(ControlState::new(self.bank.plant(), &self.settings.inlet_requests)?);
        self.arbiter.transition.selecting = true;
        self.arbiter.transition.releasing = true;
        tracing::info!(inlets = self.settings.inlet_requests.len(), "control initialised");
        Ok(())
    }

    /// Stop closed-loop control. Returns ground + correction, the values the
    /// owner should adopt as its new open-loop inlet requests.
    pub fn finalize_ctrl(&mut self) -> Result<Vec<f64>, EngineError> {
        self.require_ctrl()?;
        self.arbiter.transition = Default::default();
        let state = self
            .control
            .as_ref()
            .ok_or(EngineError::Precondition("control was never initialised"))?;
        Ok(state.regurgitate())
    }

    fn require_imgproc(&self) -> Result<(), EngineError> {
        if self.background.is_none() {
            return Err(EngineError::Precondition("no background captured"));
        }
        if self.droplet_mask.is_none() || self.marker_mask.is_none() {
            return Err(EngineError::Precondition("masks not built; run mask making and channel cutting"));
        }
        if self.channels.is_empty() {
            return Err(EngineError::Precondition("no channels separated"));
        }
        Ok(())
    }

    fn require_ctrl(&self) -> Result<(), EngineError> {
        if self.channels.is_empty() {
            return Err(EngineError::Precondition("no channels separated"));
        }
        if self.bank.is_empty() {
            return Err(EngineError::Precondition("no controllers loaded"));
        }
        if self.settings.inlet_requests.is_empty() {
            return Err(EngineError::Precondition("no inlet requests"));
        }
        Ok(())
    }

    // ── Cycle ───────────────────────────────────────────────────────────

    /// Run one full cycle on `frame` with the current settings.
    #[allow(clippy::cast_possible_truncation)]
    pub fn run_cycle(&mut self, frame: &GrayImage) -> Result<CycleReport, EngineError> {
        let start = Instant::now();
        self.cycle += 1;
        let scale = self.settings.scale();
        let mut signals = ControlSignals::open_loop(&self.settings.inlet_requests);

        let annotated = match self.settings.mode {
            Mode::MaskMaking => {
                let mask = self.make_droplet_mask()?;
                let out = render::render_mask(&mask, &[], 1, scale);
                self.droplet_mask = Some(mask);
                out
            }
            Mode::ChannelCutting => {
                let dm = self
                    .droplet_mask
                    .as_ref()
                    .ok_or(EngineError::Precondition("no droplet mask; run mask making first"))?;
                let marker_mask = masks::channel_mask(dm, self.settings.channel.erode_size);
                let lines = self.settings.camera_lines();
                let cuts = lines.get(1..).unwrap_or_default();
                let all = masks::apply_cuts(&marker_mask, cuts, self.settings.channel.cut_thickness);
                let out = render::render_mask(&all, cuts, self.settings.channel.cut_thickness, scale);
                self.marker_mask = Some(marker_mask);
                self.all_channels = Some(all);
                out
            }
            Mode::Operate => {
                if self.settings.imgproc_on {
                    self.process_frame(frame)?;
                }
                if self.settings.ctrl_on {
                    signals = self.control_step()?;
                }
                render::render_scene(&Scene {
                    raw: frame,
                    channels: &self.channels,
                    droplets: &self.droplets,
                    markers: &self.markers,
                    draw: self.settings.draw,
                    scale,
                })
            }
        };

        let elapsed_us = start.elapsed().as_micros().min(u128::from(u64::MAX)) as u64;
        tracing::trace!(cycle = self.cycle, elapsed_us, "cycle complete");
        Ok(CycleReport {
            cycle: self.cycle,
            mode: self.settings.mode,
            signals,
            annotated,
            activation: self.arbiter.active().as_slice().to_vec(),
            markers: self.markers.clone(),
            droplets: self.droplets.clone(),
            elapsed_us,
        })
    }

    fn make_droplet_mask(&self) -> Result<GrayImage, EngineError> {
        let bg = self
            .background
            .as_ref()
            .ok_or(EngineError::Precondition("no background captured"))?;
        let seed = self
            .settings
            .camera_lines()
            .first()
            .map(|l| l.start)
            .ok_or(EngineError::Precondition("mask making needs a seed line"))?;
        masks::droplet_mask(bg, seed, &self.settings.mask)
    }

    /// Segmentation, tracking, association and arbitration.
    fn process_frame(&mut self, frame: &GrayImage) -> Result<(), EngineError> {
        self.require_imgproc()?;
        let (Some(bg), Some(dm), Some(mm)) = (&self.background, &self.droplet_mask, &self.marker_mask) else {
            return Err(EngineError::Precondition("masks not built"));
        };
        let cfg = &self.settings.imgproc;
        let seg = vision::segment(frame, bg, mm, dm, cfg)?;

        let detections = seg.markers.iter().map(Detection::from).collect();
        let previous = std::mem::take(&mut self.markers);
        let markers = assign_identities(
            detections,
            &previous,
            cfg.track_too_far,
            self.settings.control.marker_size,
            &mut self.minter,
        );
        associate(&mut self.channels, &seg.droplets);

        let scale = self.settings.scale();
        let pointer = &self.settings.pointer;
        self.arbiter.update(
            &mut self.channels,
            &Observations {
                markers: &markers,
                previous_markers: &previous,
                droplets: &seg.droplets,
            },
            &ArbiterInput {
                requests: &self.settings.requests,
                left_click: pointer.left_click.map(|p| p.unscale(scale)),
                right_click: pointer.right_click.map(|p| p.unscale(scale)),
                auto_margin: (self.settings.control.auto_horz_excl, self.settings.control.auto_vert_excl),
            },
            &self.bank,
        );
        self.markers = markers;
        self.droplets = seg.droplets;
        Ok(())
    }

    fn control_step(&mut self) -> Result<ControlSignals, EngineError> {
        self.require_ctrl()?;
        let state = self
            .control
            .as_mut()
            .ok_or(EngineError::Precondition("control not initialised; call init_ctrl"))?;
        let active = self.arbiter.active().as_slice().to_vec();
        if !active.is_empty() {
            let ctrl = self
                .bank
                .lookup(&active)
                .ok_or_else(|| EngineError::State(format!("no controller for active channels {active:?}")))?;
            let channels = active
                .iter()
                .map(|&i| active_channel(&self.channels, &self.markers, &self.droplets, i))
                .collect::<Result<Vec<_>, _>>()?;
            let scale = self.settings.scale();
            observer::step(
                state,
                ctrl,
                &mut self.arbiter.transition,
                &StepInput {
                    channels: &channels,
                    drag: self.settings.pointer.drag.map(|d| d.unscale(scale)),
                    requests: &self.settings.requests,
                    control: &self.settings.control,
                    neck: &self.settings.neck,
                    micron_per_pixel: self.micron_per_pixel,
                    sample_period: self.bank.sample_period(),
                },
            )?;
        }
        Ok(state.signals())
    }
}

fn active_channel(
    channels: &[Channel],
    markers: &[Marker],
    droplets: &[Droplet],
    index: usize,
) -> Result<ActiveChannel, EngineError> {
    let ch = channels
        .get(index)
        .ok_or_else(|| EngineError::State(format!("active channel {index} does not exist")))?;
    let sensor = match ch.follow {
        Follow::Marker(k) => markers.get(k).map(|m| Sensor::Marker {
            centroid: m.centroid,
            rect: m.rect,
        }),
        Follow::Neck(k) => droplets.get(k).map(|d| Sensor::Neck {
            distance_px: d.neck_distance,
        }),
        Follow::Idle => None,
    }
    .ok_or_else(|| EngineError::State(format!("active channel {index} has nothing to measure")))?;
    Ok(ActiveChannel {
        index,
        direction: ch.direction,
        sensor,
    })
}
