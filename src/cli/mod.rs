//! CLI Module
//!
//! Command-line interface for the probe QC pipeline.

pub mod commands;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::RunMode;

/// Probe QC - stage kilosort outputs, run quality metrics, export summaries
#[derive(Parser, Debug)]
#[command(name = "probe-qc")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Recording config (defaults to $PROBE_QC_CONFIG, then
    /// configs/recording_config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Which probes to run and where results go
    #[arg(long, value_enum, default_value_t = ModeArg::Batch)]
    pub mode: ModeArg,

    /// Probe letter for single-probe mode
    #[arg(long)]
    pub target_probe: Option<String>,

    /// Replace existing staged folders and export files
    #[arg(long)]
    pub overwrite: bool,

    /// Parameter override applied above all config values (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Use the built-in mock engine instead of the configured bridge
    #[arg(long)]
    pub mock_engine: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    /// All six probes
    Batch,
    /// One probe, chosen with --target-probe
    #[value(name = "single-probe", alias = "single_probe")]
    SingleProbe,
    /// Re-run of the NP2.0 probes
    #[value(name = "np20-rerun", alias = "np20_rerun")]
    Np20Rerun,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Batch => RunMode::Batch,
            ModeArg::SingleProbe => RunMode::SingleProbe,
            ModeArg::Np20Rerun => RunMode::Np20Rerun,
        }
    }
}
