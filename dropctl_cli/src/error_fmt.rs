//! Human-readable error descriptions and structured JSON error formatting.

use dropctl_core::EngineError;
use dropctl_hardware::error::HwError;

/// Short stable name for the JSON `reason` field.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(e) = err.downcast_ref::<EngineError>() {
        return match e {
            EngineError::Precondition(_) => "Precondition",
            EngineError::Calibration(_) => "Calibration",
            EngineError::Hardware(_) => "Hardware",
            EngineError::HardwareFault(_) => "HardwareFault",
            EngineError::Timeout(_) => "Timeout",
            EngineError::State(_) => "State",
            EngineError::WorkerStopped => "WorkerStopped",
        };
    }
    if err.downcast_ref::<HwError>().is_some() {
        return "Hardware";
    }
    let lower = err.to_string().to_ascii_lowercase();
    if lower.contains("controller bank") {
        return "Calibration";
    }
    if lower.contains("config") {
        return "Config";
    }
    "Error"
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(e) = err.downcast_ref::<EngineError>() {
        return match e {
            EngineError::Timeout(what) => format!(
                "What happened: Timed out waiting for {what}.\nLikely causes: Camera not delivering frames, or a cycle taking longer than runner.cycle_timeout_ms.\nHow to fix: Check the camera connection, lower runner.cycle_hz, or raise runner.cycle_timeout_ms."
            ),
            EngineError::Calibration(msg) => format!(
                "What happened: The controller bank was rejected ({msg}).\nLikely causes: Matrix sizes that do not match n, m and p, or indices beyond the plant dimensions.\nHow to fix: Regenerate the bank or fix the reported [ctrl.*] table, then reload it."
            ),
            EngineError::Precondition(msg) => format!(
                "What happened: An operation ran before its inputs were ready ({msg}).\nLikely causes: Calibration steps run out of order.\nHow to fix: Capture the background, make masks, cut and separate channels, and load a bank before starting control."
            ),
            EngineError::Hardware(msg) | EngineError::HardwareFault(msg) => format!(
                "What happened: Rig hardware reported an error ({msg}).\nLikely causes: Pump count not matching the plant inputs, or a disconnected device.\nHow to fix: Check the [rig] section and the bank's numPlantInput, then restart."
            ),
            EngineError::State(msg) => format!(
                "What happened: Engine state is inconsistent ({msg}).\nLikely causes: Channels re-sorted or a bank swapped while control was running.\nHow to fix: Stop control, redo channel separation and bank loading, then restart."
            ),
            EngineError::WorkerStopped => "What happened: The engine worker stopped unexpectedly.\nLikely causes: A panic inside a cycle.\nHow to fix: Re-run with --log-level=debug and check the log for the failing cycle.".to_string(),
        };
    }

    if let Some(hw) = err.downcast_ref::<HwError>() {
        return format!(
            "What happened: Rig hardware reported an error ({hw}).\nLikely causes: Invalid pump values or a device that went away.\nHow to fix: Check the [rig] section of the config and restart."
        );
    }

    // String-based heuristics for errors coming from config or bank loading
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("controller bank") {
        let mut cause = String::new();
        if let Some(src) = err.source() {
            cause = format!(" ({src})");
        }
        return format!(
            "What happened: The controller bank could not be loaded{cause}.\nLikely causes: Missing file, invalid TOML, or numCtrl not matching the [ctrl.*] tables.\nHow to fix: Check the --bank path and the reported entry. Original: {msg}"
        );
    }

    if lower.contains("read config") {
        return format!(
            "What happened: The config file could not be read.\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Pass --config pointing at a readable TOML file (see etc/dropctl.toml). Original: {msg}"
        );
    }

    if lower.contains("invalid configuration") || lower.contains("parse config") {
        let detail = err.chain().nth(1).map(ToString::to_string).unwrap_or_default();
        return format!(
            "What happened: Configuration is invalid ({detail}).\nLikely causes: A value out of range or per-channel arrays of different lengths.\nHow to fix: Edit the TOML config and try again."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per failure class; anything else returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match reason_name(err) {
        "Timeout" => 3,
        "Hardware" | "HardwareFault" => 4,
        "Calibration" => 5,
        "Precondition" | "State" => 6,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;
    json!({ "reason": reason_name(err), "message": humanize(err) }).to_string()
}
