use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

/// Workspace root, where the shipped `etc/` lives.
fn root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn dropctl() -> Command {
    let mut cmd = Command::cargo_bin("dropctl").unwrap();
    cmd.current_dir(root()).arg("--log-level").arg("warn");
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["simulate", "--cycles", "5"], 0, "Simulation complete: 5 cycles", "stdout")]
#[case(&["simulate", "--cycles", "3", "--open-loop"], 0, "inlet write [0.0, 0.0]", "stdout")]
#[case(&["inspect-bank", "--bank", "etc/bank_two_lanes.toml"], 0, "3 controllers", "stdout")]
#[case(&["self-check"], 0, "OK", "stdout")]
#[case(&["inspect-bank"], 2, "required", "stderr")]
#[case(&["simulate", "--bank", "etc/missing_bank.toml"], 5, "controller bank", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let mut cmd = dropctl();
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[test]
fn json_lines_carry_every_signal() {
    let out = dropctl()
        .args(["--json", "simulate", "--cycles", "3", "--step", "6"])
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8(out.stdout).unwrap();
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    for line in &lines {
        assert_eq!(line["activation"].as_array().unwrap().len(), 2);
        assert_eq!(line["markers"].as_array().unwrap().len(), 2);
        for name in ["ground", "correction", "reference", "output", "command", "inlet_write"] {
            assert_eq!(line["signals"][name].as_array().unwrap().len(), 2, "{name}");
        }
    }
    // The six pixel step arrives as a four and a two pixel drag.
    assert_eq!(lines[0]["signals"]["reference"][0].as_f64(), Some(4.0));
    assert_eq!(lines[1]["signals"]["reference"][0].as_f64(), Some(6.0));
    assert_eq!(lines[2]["signals"]["reference"][1].as_f64(), Some(0.0));
}

#[test]
fn inspect_bank_json_lists_layouts() {
    let out = dropctl()
        .args(["--json", "inspect-bank", "--bank", "etc/bank_two_lanes.toml"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let layouts: Vec<Vec<u64>> = v["controllers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| {
            c["channels"]
                .as_array()
                .unwrap()
                .iter()
                .map(|i| i.as_u64().unwrap())
                .collect()
        })
        .collect();
    assert_eq!(layouts, vec![vec![0], vec![1], vec![0, 1]]);
    assert_eq!(v["plant"]["inputs"], 2);
}

#[test]
fn missing_config_is_explained() {
    let dir = tempdir().unwrap();
    dropctl()
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .arg("self-check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("What happened: The config file could not be read"));
}

#[test]
fn invalid_config_is_reported_as_json() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, "[mask]\nblock_size = 4\n").unwrap();
    let out = dropctl()
        .arg("--json")
        .arg("--config")
        .arg(&cfg)
        .arg("self-check")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["reason"], "Config");
    assert!(v["message"].as_str().unwrap().contains("block_size"));
}

#[test]
fn broken_bank_fails_inspection() {
    let dir = tempdir().unwrap();
    let bank = dir.path().join("bank.toml");
    let text = fs::read_to_string(root().join("etc/bank_two_lanes.toml")).unwrap();
    fs::write(&bank, text.replace("numCtrl = 3", "numCtrl = 4")).unwrap();
    dropctl()
        .arg("inspect-bank")
        .arg("--bank")
        .arg(&bank)
        .assert()
        .code(5)
        .stderr(predicate::str::contains("numCtrl"));
}
