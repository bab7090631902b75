use dropctl_core::conversions::frame_to_gray;
use dropctl_core::tracker::{Detection, MarkerStream};
use dropctl_core::{Engine, EngineSettings, Mode, Point2, Segment};
use dropctl_hardware::RigLayout;
use proptest::prelude::*;

fn segment(((x0, y0), (x1, y1)): ((f64, f64), (f64, f64))) -> Segment {
    Segment::new(Point2::new(x0, y0), Point2::new(x1, y1))
}

/// Mask making and channel cutting on an empty rig; returns the channel count.
fn channels_for(layout: &RigLayout) -> usize {
    let mut settings = EngineSettings::default();
    settings.channel.cut_thickness = 10;
    settings.pointer.lines = vec![segment(layout.seed_line()), segment(layout.trunk_cut())];
    let mut engine = Engine::new(settings.clone(), 1.0);
    let background = frame_to_gray(layout.background()).expect("background");
    engine.capture_background(background.clone());

    for mode in [Mode::MaskMaking, Mode::ChannelCutting] {
        settings.mode = mode;
        engine.set_settings(settings.clone());
        engine.run_cycle(&background).expect("calibration cycle");
    }
    engine.separate_channels().expect("separate")
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 16, .. ProptestConfig::default() })]

    #[test]
    fn one_channel_per_lane(lanes in 1usize..=3, lane_height in 14u32..=22) {
        let layout = RigLayout { lanes, lane_height, ..RigLayout::default() };
        prop_assert_eq!(channels_for(&layout), lanes);
    }

    #[test]
    fn slow_markers_keep_their_identity(
        start in prop::collection::vec((0.0f64..200.0, 0.0f64..200.0), 1..5),
        steps in prop::collection::vec((-1.0f64..1.0, -1.0f64..1.0), 1..10),
    ) {
        // Markers 20 px apart at least, each moving under 2 px per frame.
        let spread: Vec<Point2> = start
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| Point2::new(x / 10.0 + 40.0 * i as f64, y / 10.0))
            .collect();
        let frames = (0..=steps.len()).map(|k| {
            spread
                .iter()
                .map(|p| {
                    let (dx, dy) = steps[..k].iter().fold((0.0, 0.0), |(ax, ay), &(sx, sy)| (ax + sx, ay + sy));
                    Detection { centroid: Point2::new(p.x + dx, p.y + dy), contour: Vec::new() }
                })
                .collect::<Vec<_>>()
        });
        let mut first_ids: Option<Vec<u64>> = None;
        for markers in MarkerStream::new(frames, 10.0, 10) {
            let ids: Vec<u64> = markers.iter().map(|m| m.identity).collect();
            match &first_ids {
                None => first_ids = Some(ids),
                Some(expected) => prop_assert_eq!(&ids, expected),
            }
        }
    }
}
