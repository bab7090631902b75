//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "dropctl", version, about = "Droplet rig controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/dropctl.toml")]
    pub config: PathBuf,

    /// Log and report as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bring up the simulated rig and run closed-loop cycles
    Simulate {
        /// Controller bank TOML
        #[arg(long, value_name = "FILE", default_value = "etc/bank_two_lanes.toml")]
        bank: PathBuf,
        /// Closed-loop cycles to run after activation (0 runs until Ctrl-C)
        #[arg(long, default_value_t = 50)]
        cycles: u64,
        /// Keep control off; inlet requests are written unchanged
        #[arg(long, action = ArgAction::SetTrue)]
        open_loop: bool,
        /// Move lane 0's reference by this many pixels, a few pixels per cycle
        #[arg(long, value_name = "PX", allow_hyphen_values = true)]
        step: Option<f64>,
        /// Print cycle latency stats
        #[arg(long, action = ArgAction::SetTrue)]
        stats: bool,
    },
    /// Validate a controller bank and list its controllers
    InspectBank {
        /// Controller bank TOML
        #[arg(long, value_name = "FILE")]
        bank: PathBuf,
    },
    /// Quick health check: config loads and the simulated camera delivers frames
    SelfCheck,
}
