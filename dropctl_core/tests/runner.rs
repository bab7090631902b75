use dropctl_core::mocks::{DeadCamera, RecordingPumps, StaticCamera};
use dropctl_core::{Engine, EngineError, EngineSettings, EngineWorker, RunOptions, run_rig};
use dropctl_traits::Frame;
use dropctl_traits::clock::MonotonicClock;
use rstest::rstest;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

fn camera() -> StaticCamera {
    StaticCamera {
        frame: Frame::new(8, 6, vec![120; 48]),
    }
}

fn open_loop(inlets: &[f64]) -> impl FnMut(u64) -> EngineSettings {
    let inlets = inlets.to_vec();
    move |_| {
        let mut s = EngineSettings::default();
        s.inlet_requests.clone_from(&inlets);
        s
    }
}

fn opts(cycles: u64) -> RunOptions {
    RunOptions {
        cycles: Some(cycles),
        cycle_hz: 1000,
        timeout: Duration::from_secs(2),
        shutdown: None,
    }
}

fn worker() -> EngineWorker {
    EngineWorker::spawn(Engine::new(EngineSettings::default(), 1.0))
}

#[rstest]
#[case(1)]
#[case(4)]
fn open_loop_writes_inlet_requests(#[case] cycles: u64) {
    let worker = worker();
    let mut pumps = RecordingPumps::new(2);
    let mut seen = 0;
    let summary = run_rig(
        &mut camera(),
        &mut pumps,
        &worker,
        &MonotonicClock::new(),
        &opts(cycles),
        open_loop(&[0.5, -0.5]),
        |report| {
            seen += 1;
            assert_eq!(report.annotated.dimensions(), (8, 6));
            Ok(())
        },
    )
    .expect("run completes");

    assert_eq!(summary.cycles, cycles);
    assert_eq!(seen, cycles);
    assert_eq!(summary.stats.cycles, usize::try_from(cycles).expect("small"));
    assert_eq!(summary.last_write, vec![0.5, -0.5]);
    let writes = pumps.writes();
    assert_eq!(writes.len(), usize::try_from(cycles).expect("small"));
    assert!(writes.iter().all(|w| w == &[0.5, -0.5]));
}

#[test]
fn empty_actuator_vector_skips_the_pumps() {
    let worker = worker();
    let mut pumps = RecordingPumps::new(2);
    let summary = run_rig(
        &mut camera(),
        &mut pumps,
        &worker,
        &MonotonicClock::new(),
        &opts(2),
        open_loop(&[]),
        |_| Ok(()),
    )
    .expect("run completes");
    assert_eq!(summary.cycles, 2);
    assert!(pumps.writes().is_empty());
}

#[test]
fn dead_camera_bubbles_a_timeout() {
    let worker = worker();
    let err = run_rig(
        &mut DeadCamera,
        &mut RecordingPumps::new(2),
        &worker,
        &MonotonicClock::new(),
        &opts(3),
        open_loop(&[0.0, 0.0]),
        |_| Ok(()),
    )
    .expect_err("camera never delivers");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::Timeout(_))
    ));
    assert!(format!("{err:#}").contains("grab frame"));
}

#[test]
fn inlet_count_mismatch_is_a_state_error() {
    let worker = worker();
    let mut pumps = RecordingPumps::new(3);
    let err = run_rig(
        &mut camera(),
        &mut pumps,
        &worker,
        &MonotonicClock::new(),
        &opts(1),
        open_loop(&[1.0, 2.0]),
        |_| Ok(()),
    )
    .expect_err("two values for three inlets");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::State(_))
    ));
    assert!(pumps.writes().is_empty());
}

#[test]
fn shutdown_flag_stops_before_the_first_cycle() {
    let worker = worker();
    let mut pumps = RecordingPumps::new(1);
    let mut o = opts(100);
    o.shutdown = Some(Arc::new(AtomicBool::new(true)));
    let summary = run_rig(
        &mut camera(),
        &mut pumps,
        &worker,
        &MonotonicClock::new(),
        &o,
        open_loop(&[1.0]),
        |_| Ok(()),
    )
    .expect("stopped cleanly");
    assert_eq!(summary.cycles, 0);
    assert!(pumps.writes().is_empty());
}

#[test]
fn callback_error_stops_the_loop() {
    let worker = worker();
    let mut pumps = RecordingPumps::new(1);
    let err = run_rig(
        &mut camera(),
        &mut pumps,
        &worker,
        &MonotonicClock::new(),
        &opts(10),
        open_loop(&[1.0]),
        |report| {
            if report.cycle == 2 {
                eyre::bail!("consumer gave up");
            }
            Ok(())
        },
    )
    .expect_err("callback fails on cycle 2");
    assert!(err.to_string().contains("consumer gave up"));
    assert_eq!(pumps.writes().len(), 2);
}
