#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod cli;
mod error_fmt;
mod simulate;

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::simulate::{SimulateArgs, run_simulate, self_check};
use clap::Parser;
use dropctl_core::ControllerBank;
use eyre::{Result, WrapErr};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let json = cli.json;
    let _ = JSON_MODE.set(json);

    if let Err(e) = run(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn load_config(path: &Path) -> Result<dropctl_config::Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = dropctl_config::load_toml(&text).wrap_err("parse config")?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

/// Console logs go to stderr so stdout stays clean for JSON lines. An
/// optional file sink writes JSON lines with the configured rotation.
fn init_tracing(json: bool, level: &str, logging: &dropctl_config::Logging) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .or_else(|_| EnvFilter::try_new(logging.level.as_deref().unwrap_or("info")))
        .wrap_err("log level")?;

    let console = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file = match logging.file.as_deref() {
        Some(path) => {
            let path = Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name"))?;
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("install tracing subscriber")?;
    Ok(())
}

fn inspect_bank(path: &Path, json: bool) -> Result<()> {
    let file = dropctl_config::bank::load_bank(path)
        .wrap_err_with(|| format!("load controller bank {}", path.display()))?;
    let bank = ControllerBank::try_from(&file)?;
    let plant = bank.plant();
    if json {
        let controllers: Vec<_> = bank
            .controllers()
            .iter()
            .enumerate()
            .map(|(i, c)| {
                json!({
                    "ordinal": i,
                    "channels": c.layout(),
                    "n": c.n,
                    "m": c.m,
                    "p": c.p,
                    "usable": c.is_usable(),
                })
            })
            .collect();
        println!(
            "{}",
            json!({
                "sample_period": bank.sample_period(),
                "plant": { "states": plant.states, "inputs": plant.inputs, "outputs": plant.outputs },
                "controllers": controllers,
            })
        );
    } else {
        println!(
            "{} controllers, sample period {} s, plant {} states / {} inputs / {} outputs",
            bank.len(),
            bank.sample_period(),
            plant.states,
            plant.inputs,
            plant.outputs
        );
        for (i, c) in bank.controllers().iter().enumerate() {
            println!(
                "  ctrl.{i}: channels {:?} n={} m={} p={}{}",
                c.layout(),
                c.n,
                c.m,
                c.p,
                if c.is_usable() { "" } else { " (unusable)" }
            );
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli.config)?;
    init_tracing(cli.json, &cli.log_level, &cfg.logging)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
            tracing::warn!(error = %e, "failed to install Ctrl-C handler");
        }
    }

    match cli.cmd {
        Commands::Simulate {
            bank,
            cycles,
            open_loop,
            step,
            stats,
        } => {
            let summary = run_simulate(
                &cfg,
                SimulateArgs {
                    bank,
                    cycles,
                    open_loop,
                    step,
                    stats,
                    json: cli.json,
                },
                shutdown,
            )?;
            if !cli.json {
                println!(
                    "Simulation complete: {} cycles, inlet write {:?}",
                    summary.cycles, summary.last_write
                );
            }
        }
        Commands::InspectBank { bank } => inspect_bank(&bank, cli.json)?,
        Commands::SelfCheck => {
            self_check(&cfg)?;
            println!("OK");
        }
    }
    Ok(())
}
