use dropctl_hardware::error::HwError;
use dropctl_hardware::{RigLayout, SimulatedRig};
use dropctl_traits::{Camera, PumpBank};
use rstest::rstest;
use std::time::Duration;

#[test]
fn background_has_interior_and_walls() {
    let layout = RigLayout::default();
    let bg = layout.background();
    assert!(bg.is_consistent());
    assert_eq!(bg.height, layout.height());

    let (sx, sy) = layout.seed_line().0;
    let idx = (sy as u32 * bg.width + sx as u32) as usize;
    assert_eq!(bg.pixels[idx], layout.interior_level);
    assert_eq!(bg.pixels[0], layout.wall_level);
}

#[rstest]
#[case(0)]
#[case(1)]
fn markers_are_drawn_in_their_lane(#[case] lane: usize) {
    let rig = SimulatedRig::new(RigLayout::default());
    let mut cam = rig.camera();
    let frame = cam.grab(Duration::from_millis(10)).expect("grab");
    let layout = rig.layout();
    let x = rig.marker_position(lane).expect("lane exists").round() as u32;
    let y = layout.lane_center_y(lane);
    let idx = (y * frame.width + x) as usize;
    assert_eq!(frame.pixels[idx], layout.marker_level);
}

#[test]
fn hidden_markers_leave_background() {
    let rig = SimulatedRig::new(RigLayout::default());
    rig.set_markers_visible(false).expect("toggle");
    let frame = rig.camera().grab(Duration::ZERO).expect("grab");
    assert_eq!(frame, rig.layout().background());
}

#[test]
fn pressure_moves_marker_on_next_grab() {
    let rig = SimulatedRig::new(RigLayout::default());
    let mut cam = rig.camera();
    let mut pumps = rig.pumps();
    let before = rig.marker_position(0).expect("lane 0");
    pumps.write(&[4.0, 0.0]).expect("write");
    cam.grab(Duration::ZERO).expect("grab");
    let after = rig.marker_position(0).expect("lane 0");
    assert!((after - before - 2.0).abs() < 1e-9, "moved {}", after - before);
    assert_eq!(rig.marker_position(1), Some(before));
    assert_eq!(rig.frames_grabbed(), 1);
}

#[test]
fn pump_rejects_wrong_inlet_count() {
    let rig = SimulatedRig::new(RigLayout::default());
    let mut pumps = rig.pumps();
    let err = pumps.write(&[1.0]).expect_err("too few values");
    let hw = err.downcast_ref::<HwError>().expect("typed error");
    assert!(matches!(hw, HwError::InletCount { expected: 2, got: 1 }));
}

#[test]
fn marker_travel_is_clamped() {
    let rig = SimulatedRig::new(RigLayout::default());
    rig.set_marker_position(0, -500.0).expect("set");
    let (lo, _) = rig.layout().marker_travel();
    assert_eq!(rig.marker_position(0), Some(lo));
}
