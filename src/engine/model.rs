//! Metrics engine trait and core types
//!
//! Defines the interface the batch runner drives. The engine itself (spike
//! waveform extraction, quality metrics, unit classification) lives outside
//! this crate.

use std::path::Path;

use crate::config::ProbeId;
use crate::error::Result;
use crate::metrics::UnitMetrics;
use crate::params::{EngineParams, ParameterSet};

/// Everything the engine needs to analyze one staged probe.
#[derive(Debug, Clone, Copy)]
pub struct EngineRequest<'a> {
    pub probe: ProbeId,
    /// Staged kilosort directory
    pub ks_dir: &'a Path,
    /// Where the engine may write its own intermediate files
    pub save_path: &'a Path,
    pub raw_file: &'a Path,
    pub meta_file: &'a Path,
    pub params: &'a ParameterSet,
}

/// What the engine hands back for one probe.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// One row per unit, including `maxChannels`
    pub metrics: UnitMetrics,
    /// Parameters as the engine finally used them, possibly augmented
    pub params: EngineParams,
    /// Categorical unit type per row (GOOD, MUA, NOISE, ...)
    pub unit_types: Vec<String>,
}

/// Trait every metrics engine implements.
pub trait MetricsEngine: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Engine defaults for a staged directory, before any override.
    fn default_parameters(
        &self,
        ks_dir: &Path,
        raw_file: &Path,
        meta_file: &Path,
    ) -> Result<ParameterSet>;

    /// Compute metrics and unit types for one probe.
    ///
    /// Blocking; may take minutes for long recordings.
    fn run(&self, request: &EngineRequest<'_>) -> Result<EngineOutput>;
}
