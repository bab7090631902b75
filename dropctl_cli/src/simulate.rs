//! Simulated rig session: calibration bring-up, activation, then the
//! closed-loop rig loop with per-cycle reporting.

use dropctl_config::RigCfg;
use dropctl_core::conversions::frame_to_gray;
use dropctl_core::error::Result as CoreResult;
use dropctl_core::hw_error::map_hw_error;
use dropctl_core::util::LatencyStats;
use dropctl_core::{
    CycleReport, Engine, EngineSettings, EngineWorker, FlowDirection, Mode, Point2, RunOptions,
    RunSummary, Segment, Snapshot, run_rig,
};
use dropctl_hardware::{RigLayout, SimulatedCamera, SimulatedRig};
use dropctl_traits::Camera;
use dropctl_traits::clock::MonotonicClock;
use eyre::WrapErr;
use image::GrayImage;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Largest drag applied in one cycle; a drag has to stay inside the
/// marker's box to count as a direct request.
const MAX_DRAG_PX: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct SimulateArgs {
    pub bank: PathBuf,
    pub cycles: u64,
    pub open_loop: bool,
    pub step: Option<f64>,
    pub stats: bool,
    pub json: bool,
}

pub fn rig_layout(c: &RigCfg) -> RigLayout {
    RigLayout {
        lanes: c.lanes,
        width: c.width,
        lane_height: c.lane_height,
        wall: c.wall,
        margin: c.margin,
        trunk_width: c.trunk_width,
        marker_size: c.marker_size,
        response: c.response,
        ..RigLayout::default()
    }
}

fn display_segment(((x0, y0), (x1, y1)): ((f64, f64), (f64, f64)), scale: f64) -> Segment {
    Segment::new(
        Point2::new(x0 * scale, y0 * scale),
        Point2::new(x1 * scale, y1 * scale),
    )
}

fn grab(camera: &mut SimulatedCamera, opts: &RunOptions) -> CoreResult<GrayImage> {
    let frame = camera
        .grab(opts.timeout)
        .map_err(|e| map_hw_error(e.as_ref()))
        .wrap_err("grab frame")?;
    Ok(frame_to_gray(frame)?)
}

/// Background, masks, channels, bank and tracking, in that order.
fn bring_up(
    rig: &SimulatedRig,
    camera: &mut SimulatedCamera,
    worker: &EngineWorker,
    base: &EngineSettings,
    bank: PathBuf,
    opts: &RunOptions,
) -> CoreResult<()> {
    let layout = rig.layout();
    let scale = base.scale();

    rig.set_markers_visible(false)?;
    let background = grab(camera, opts)?;
    worker.call(move |e| e.capture_background(background))?;
    rig.set_markers_visible(true)?;

    let mut settings = base.clone();
    settings.pointer.lines = vec![
        display_segment(layout.seed_line(), scale),
        display_segment(layout.trunk_cut(), scale),
    ];
    for mode in [Mode::MaskMaking, Mode::ChannelCutting] {
        settings.mode = mode;
        worker.submit(Snapshot {
            settings: settings.clone(),
            frame: grab(camera, opts)?,
        })?;
        worker
            .recv_timeout(opts.timeout)?
            .wrap_err_with(|| format!("{mode:?} cycle"))?;
    }

    let found = worker.call(Engine::separate_channels)??;
    if found != layout.lanes {
        tracing::warn!(found, lanes = layout.lanes, "channel count differs from the rig layout");
    }
    // Number channels top to bottom; every lane flows towards +x.
    worker.call(|e| {
        let mut by_row: Vec<(usize, i32)> =
            e.channels().iter().enumerate().map(|(i, c)| (i, c.rect.y)).collect();
        by_row.sort_by_key(|&(_, y)| y);
        let mut order = vec![0; by_row.len()];
        for (rank, &(i, _)) in by_row.iter().enumerate() {
            order[i] = rank;
        }
        let directions = vec![FlowDirection::PosX; order.len()];
        e.sort_channels(&order, &directions)
    })??;

    let summary = worker.call(move |e| e.load_bank_path(&bank))??;
    tracing::info!(
        controllers = summary.controllers,
        usable = summary.usable,
        "bank ready"
    );
    worker.call(Engine::init_imgproc)??;
    Ok(())
}

fn emit_json(report: &CycleReport) {
    let signals: serde_json::Map<String, serde_json::Value> = report
        .signals
        .named()
        .iter()
        .map(|(name, v)| ((*name).to_string(), json!(v)))
        .collect();
    let markers: Vec<_> = report
        .markers
        .iter()
        .map(|m| json!({ "id": m.identity, "x": m.centroid.x, "y": m.centroid.y }))
        .collect();
    let line = json!({
        "cycle": report.cycle,
        "activation": report.activation,
        "markers": markers,
        "droplets": report.droplets.len(),
        "elapsed_us": report.elapsed_us,
        "signals": signals,
    });
    println!("{line}");
}

/// Print latency/jitter stats to stderr.
fn print_stats(stats: &LatencyStats, cycle_hz: u32) {
    let expected_period_us = dropctl_core::util::period_us(cycle_hz);
    eprintln!("\n--- Rig Stats ---");
    eprintln!("Cycles: {}", stats.cycles);
    eprintln!("Period (us): {expected_period_us}");
    eprintln!(
        "Latency min/avg/max/stdev (us): {} / {:.1} / {} / {:.1}",
        stats.min_us, stats.avg_us, stats.max_us, stats.stdev_us
    );
    eprintln!("Missed deadlines (> period): {}", stats.missed);
    eprintln!("-----------------\n");
}

pub fn run_simulate(
    cfg: &dropctl_config::Config,
    args: SimulateArgs,
    shutdown: Arc<AtomicBool>,
) -> CoreResult<RunSummary> {
    let rig = SimulatedRig::new(rig_layout(&cfg.rig));
    let mut camera = rig.camera();
    let mut pumps = rig.pumps();
    let base = EngineSettings::from(cfg);
    let mut opts = RunOptions::from(&cfg.runner);
    opts.shutdown = Some(shutdown);

    let worker = EngineWorker::spawn(Engine::new(base.clone(), cfg.display.micron_per_pixel));
    bring_up(&rig, &mut camera, &worker, &base, args.bank.clone(), &opts)?;

    // One tracking cycle lets auto-catch pick up the markers.
    let mut tracking = base.clone();
    tracking.imgproc_on = true;
    let catch_opts = RunOptions {
        cycles: Some(1),
        ..opts.clone()
    };
    run_rig(
        &mut camera,
        &mut pumps,
        &worker,
        &MonotonicClock::new(),
        &catch_opts,
        |_| tracking.clone(),
        |_| Ok(()),
    )?;
    let active = worker.call(|e| e.activation().as_slice().to_vec())?;
    tracing::info!(?active, "activation after first tracking cycle");

    let mut running = tracking;
    if !args.open_loop {
        worker.call(Engine::init_ctrl)??;
        running.ctrl_on = true;
    }

    let scale = base.scale();
    let lane_y = f64::from(rig.layout().lane_center_y(0));
    let mut remaining = args.step.unwrap_or(0.0);
    let drag_rig = rig.clone();
    let settings = move |_cycle: u64| {
        let mut s = running.clone();
        if remaining.abs() > f64::EPSILON {
            if let Some(x) = drag_rig.marker_position(0) {
                let d = remaining.clamp(-MAX_DRAG_PX, MAX_DRAG_PX);
                remaining -= d;
                let start = Point2::new(x.round(), lane_y);
                let end = Point2::new(x.round() + d, lane_y);
                s.pointer.drag = Some(Segment::new(
                    Point2::new(start.x * scale, start.y * scale),
                    Point2::new(end.x * scale, end.y * scale),
                ));
            }
        }
        s
    };

    opts.cycles = (args.cycles > 0).then_some(args.cycles);
    let json_out = args.json;
    let summary = run_rig(
        &mut camera,
        &mut pumps,
        &worker,
        &MonotonicClock::new(),
        &opts,
        settings,
        |report| {
            if json_out {
                emit_json(report);
            } else {
                tracing::debug!(
                    cycle = report.cycle,
                    active = ?report.activation,
                    write = ?report.signals.inlet_write,
                    "cycle"
                );
            }
            Ok(())
        },
    )?;

    if !args.open_loop {
        let open_loop = worker.call(Engine::finalize_ctrl)??;
        tracing::info!(inlets = ?open_loop, "control finalised");
    }
    if args.stats {
        print_stats(&summary.stats, opts.cycle_hz);
    }
    Ok(summary)
}

/// Config loads and the simulated camera delivers a frame of the
/// configured geometry.
pub fn self_check(cfg: &dropctl_config::Config) -> CoreResult<()> {
    let layout = rig_layout(&cfg.rig);
    let rig = SimulatedRig::new(layout.clone());
    let frame = grab(&mut rig.camera(), &RunOptions::from(&cfg.runner))?;
    if frame.dimensions() != (layout.width, layout.height()) {
        eyre::bail!(
            "camera frame is {:?}, expected {}x{}",
            frame.dimensions(),
            layout.width,
            layout.height()
        );
    }
    Ok(())
}
