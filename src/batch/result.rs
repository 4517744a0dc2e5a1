//! Per-probe run outcomes

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::ProbeId;
use crate::error::QcError;
use crate::metrics::UnitMetrics;
use crate::params::{EngineParams, ParameterSet};

pub const STATUS_OK: &str = "OK";
pub const STATUS_FAILED: &str = "FAILED";

/// Everything a successful probe run produced.
#[derive(Debug, Clone)]
pub struct ProbeRun {
    pub probe: ProbeId,
    pub staged_dir: PathBuf,
    pub save_path: PathBuf,
    /// Metrics, with ROI columns when labeling ran
    pub metrics: UnitMetrics,
    /// Parameters handed to the engine
    pub resolved: ParameterSet,
    /// Parameters as echoed back by the engine
    pub params: EngineParams,
    pub unit_types: Vec<String>,
    pub roi_labels: Option<Vec<String>>,
    pub roi_label_file: Option<PathBuf>,
}

/// A probe that did not make it through the pipeline.
#[derive(Debug)]
pub struct ProbeFailure {
    pub probe: ProbeId,
    pub error: QcError,
    pub staged_dir: PathBuf,
    pub save_path: PathBuf,
}

#[derive(Debug)]
pub enum RunResult {
    Ok(Box<ProbeRun>),
    Failed(ProbeFailure),
}

impl RunResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, RunResult::Ok(_))
    }

    pub fn status(&self) -> &'static str {
        match self {
            RunResult::Ok(_) => STATUS_OK,
            RunResult::Failed(_) => STATUS_FAILED,
        }
    }

    pub fn run(&self) -> Option<&ProbeRun> {
        match self {
            RunResult::Ok(run) => Some(run),
            RunResult::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&QcError> {
        match self {
            RunResult::Ok(_) => None,
            RunResult::Failed(failure) => Some(&failure.error),
        }
    }

    pub fn staged_dir(&self) -> &Path {
        match self {
            RunResult::Ok(run) => &run.staged_dir,
            RunResult::Failed(failure) => &failure.staged_dir,
        }
    }

    pub fn save_path(&self) -> &Path {
        match self {
            RunResult::Ok(run) => &run.save_path,
            RunResult::Failed(failure) => &failure.save_path,
        }
    }
}

/// One result per requested probe, in probe order.
#[derive(Debug, Default)]
pub struct BatchResults {
    results: BTreeMap<ProbeId, RunResult>,
}

impl BatchResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, probe: ProbeId, result: RunResult) {
        self.results.insert(probe, result);
    }

    pub fn get(&self, probe: ProbeId) -> Option<&RunResult> {
        self.results.get(&probe)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn probes(&self) -> impl Iterator<Item = ProbeId> + '_ {
        self.results.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProbeId, &RunResult)> {
        self.results.iter().map(|(p, r)| (*p, r))
    }

    pub fn ok_count(&self) -> usize {
        self.results.values().filter(|r| r.is_ok()).count()
    }

    pub fn failed_probes(&self) -> Vec<ProbeId> {
        self.results
            .iter()
            .filter(|(_, r)| !r.is_ok())
            .map(|(p, _)| *p)
            .collect()
    }
}
