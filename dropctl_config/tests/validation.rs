use dropctl_config::load_toml;
use rstest::rstest;

fn base() -> &'static str {
    r#"
[display]
scale = 2.0
micron_per_pixel = 1.5

[mask]
block_size = 15
threshold = 5.0
open_size = 1

[control]
marker_size = 10
inlet_requests = [0.0, 0.0]

[runner]
cycle_hz = 20
cycle_timeout_ms = 500
"#
}

#[test]
fn accepts_reference_config() {
    let cfg = load_toml(base()).expect("parse TOML");
    cfg.validate().expect("valid");
    assert_eq!(cfg.display.scale, 2.0);
    assert_eq!(cfg.control.inlet_requests.len(), 2);
}

#[test]
fn shipped_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../etc/dropctl.toml");
    let text = std::fs::read_to_string(path).expect("read etc/dropctl.toml");
    let cfg = load_toml(&text).expect("parse");
    cfg.validate().expect("shipped config validates");
    assert_eq!(cfg.channels.auto_catch, vec![true, true]);
}

#[rstest]
#[case("[display]\nscale = 0.0", "display.scale must be > 0")]
#[case("[display]\nmicron_per_pixel = -1.0", "display.micron_per_pixel must be > 0")]
#[case("[mask]\nblock_size = 14", "mask.block_size must be odd")]
#[case("[mask]\nblock_size = 1", "mask.block_size must be odd")]
#[case("[imgproc]\ntrack_too_far = -2.0", "imgproc.track_too_far must be >= 0")]
#[case("[control]\nmarker_size = 0", "control.marker_size must be > 0")]
#[case("[control]\nmodel_cov = -1.0", "control.model_cov must be >= 0")]
#[case("[neck]\nthreshold = -0.5", "neck.threshold must be >= 0")]
#[case("[runner]\ncycle_hz = 0", "runner.cycle_hz must be > 0")]
#[case("[rig]\nlanes = 0", "rig.lanes must be >= 1")]
#[case("[rig]\nmarker_size = 40", "rig.marker_size must be > 0")]
fn rejects_out_of_range(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(
        err.to_string().contains(needle),
        "expected '{needle}' in '{err}'"
    );
}

#[test]
fn unknown_types_fail_to_parse() {
    let err = load_toml("[mask]\nblock_size = \"wide\"").expect_err("type error");
    assert!(err.to_string().contains("block_size"));
}
