//! Probe QC CLI
//!
//! Command-line entry point for multi-probe quality control.

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;

use probe_qc::cli::commands::run_pipeline;
use probe_qc::cli::Cli;
use probe_qc::config::RunMode;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    info!("Probe QC v{}", env!("CARGO_PKG_VERSION"));

    let mode = RunMode::from(cli.mode);
    run_pipeline(&cli).with_context(|| format!("{} run failed", mode))?;
    Ok(())
}
