//! Mock metrics engine for testing
//!
//! Produces deterministic metrics without touching the staged data, so the
//! orchestration, labeling and export paths can be exercised end to end.

use std::collections::BTreeSet;
use std::path::Path;

use log::debug;
use serde_json::json;

use crate::config::ProbeId;
use crate::engine::model::{EngineOutput, EngineRequest, MetricsEngine};
use crate::error::{QcError, Result};
use crate::metrics::{Column, UnitMetrics, MAX_CHANNEL_COLUMN};
use crate::params::{ParamValue, ParameterSet};

/// Unit type labels cycled across units.
pub const MOCK_UNIT_TYPES: [&str; 4] = ["GOOD", "MUA", "NOISE", "NON-SOMA"];

/// Deterministic stand-in for the real engine.
#[derive(Debug, Clone)]
pub struct MockEngine {
    units: usize,
    channel_count: usize,
    unit_types: Vec<String>,
    failing: BTreeSet<ProbeId>,
    panicking: BTreeSet<ProbeId>,
    short_labels: BTreeSet<ProbeId>,
    echo_cluster_ids: bool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            units: 6,
            channel_count: 384,
            unit_types: MOCK_UNIT_TYPES.iter().map(|s| s.to_string()).collect(),
            failing: BTreeSet::new(),
            panicking: BTreeSet::new(),
            short_labels: BTreeSet::new(),
            echo_cluster_ids: true,
        }
    }

    pub fn with_units(mut self, units: usize) -> Self {
        self.units = units;
        self
    }

    /// Units are spread over channels `0..channel_count`.
    pub fn with_channel_count(mut self, channel_count: usize) -> Self {
        self.channel_count = channel_count.max(1);
        self
    }

    pub fn with_unit_types(mut self, types: &[&str]) -> Self {
        self.unit_types = types.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Return an engine error for this probe.
    pub fn failing_on(mut self, probe: ProbeId) -> Self {
        self.failing.insert(probe);
        self
    }

    /// Panic inside `run` for this probe.
    pub fn panicking_on(mut self, probe: ProbeId) -> Self {
        self.panicking.insert(probe);
        self
    }

    /// Return one unit-type label fewer than there are units for this probe.
    pub fn with_short_labels_on(mut self, probe: ProbeId) -> Self {
        self.short_labels.insert(probe);
        self
    }

    /// Do not echo `unique_templates`.
    pub fn without_cluster_ids(mut self) -> Self {
        self.echo_cluster_ids = false;
        self
    }

    /// Cluster ids the mock assigns: gaps on purpose, as kilosort leaves them.
    pub fn cluster_ids(&self) -> Vec<i64> {
        (0..self.units as i64).map(|i| i * 2 + 1).collect()
    }

    fn metrics(&self) -> Result<UnitMetrics> {
        let n = self.units;
        UnitMetrics::new(self.cluster_ids())
            .with_column(
                MAX_CHANNEL_COLUMN,
                Column::Numeric((0..n).map(|i| (i % self.channel_count) as f64).collect()),
            )?
            .with_column(
                "nSpikes",
                Column::Numeric((0..n).map(|i| 500.0 + 100.0 * i as f64).collect()),
            )?
            .with_column(
                "rawAmplitude",
                Column::Numeric((0..n).map(|i| 40.0 + 2.5 * i as f64).collect()),
            )?
            .with_column(
                "signalToNoiseRatio",
                Column::Numeric((0..n).map(|i| 2.0 + 0.5 * i as f64).collect()),
            )
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn default_parameters(
        &self,
        ks_dir: &Path,
        raw_file: &Path,
        meta_file: &Path,
    ) -> Result<ParameterSet> {
        let defaults = json!({
            "ephysKilosortPath": ks_dir.to_string_lossy(),
            "rawFile": raw_file.to_string_lossy(),
            "ephysMetaFile": meta_file.to_string_lossy(),
            "kilosort_version": 4,
            "ephys_sample_rate": 30000,
            "nChannels": self.channel_count,
            "extractRaw": false,
            "minSNR": 5.0,
            "maxDrift": 100,
            "plotDetails": false
        });
        match defaults {
            serde_json::Value::Object(map) => Ok(ParameterSet::from_map(map)),
            _ => Ok(ParameterSet::new()),
        }
    }

    fn run(&self, request: &EngineRequest<'_>) -> Result<EngineOutput> {
        debug!("Mock engine running probe {}", request.probe);

        if self.panicking.contains(&request.probe) {
            panic!("mock engine panic on probe {}", request.probe);
        }
        if self.failing.contains(&request.probe) {
            return Err(QcError::Engine {
                reason: format!("mock failure on probe {}", request.probe),
            });
        }

        let metrics = self.metrics()?;

        let mut unit_types: Vec<String> = (0..self.units)
            .map(|i| self.unit_types[i % self.unit_types.len().max(1)].clone())
            .collect();
        if self.short_labels.contains(&request.probe) {
            unit_types.pop();
        }

        let mut params: crate::params::EngineParams = request
            .params
            .iter()
            .map(|(k, v)| (k.clone(), ParamValue::from(v)))
            .collect();
        params.insert(
            "ephysKilosortPath".to_string(),
            ParamValue::Path(request.ks_dir.to_path_buf()),
        );
        params.insert(
            "savePath".to_string(),
            ParamValue::Path(request.save_path.to_path_buf()),
        );
        if self.echo_cluster_ids {
            params.insert(
                "unique_templates".to_string(),
                ParamValue::Array(self.cluster_ids().iter().map(|id| *id as f64).collect()),
            );
        }

        Ok(EngineOutput {
            metrics,
            params,
            unit_types,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request<'a>(probe: ProbeId, params: &'a ParameterSet, dir: &'a Path) -> EngineRequest<'a> {
        EngineRequest {
            probe,
            ks_dir: dir,
            save_path: dir,
            raw_file: dir,
            meta_file: dir,
            params,
        }
    }

    #[test]
    fn test_output_shapes_agree() {
        let engine = MockEngine::new().with_units(5).with_unit_types(&["GOOD", "MUA"]);
        let params = ParameterSet::new().with_param("minSNR", 3.5);
        let dir = PathBuf::from("/staged/kilosort4_A");
        let output = engine.run(&request(ProbeId::A, &params, &dir)).unwrap();

        assert_eq!(output.metrics.len(), 5);
        assert_eq!(output.unit_types, vec!["GOOD", "MUA", "GOOD", "MUA", "GOOD"]);
        assert_eq!(
            output.params.get("unique_templates").and_then(ParamValue::as_int_vec),
            Some(vec![1, 3, 5, 7, 9])
        );
        assert!(matches!(output.params.get("minSNR"), Some(ParamValue::Float(v)) if *v == 3.5));
    }

    #[test]
    fn test_failure_list() {
        let engine = MockEngine::new().failing_on(ProbeId::B);
        let params = ParameterSet::new();
        let dir = PathBuf::from("/staged");

        assert!(engine.run(&request(ProbeId::A, &params, &dir)).is_ok());
        let err = engine.run(&request(ProbeId::B, &params, &dir)).unwrap_err();
        assert_eq!(err.error_code(), "ENGINE_ERROR");
    }

    #[test]
    fn test_defaults_carry_paths() {
        let engine = MockEngine::new();
        let defaults = engine
            .default_parameters(Path::new("/ks"), Path::new("/raw.dat"), Path::new("/s.oebin"))
            .unwrap();
        assert_eq!(defaults.get_str("rawFile"), Some("/raw.dat"));
        assert_eq!(defaults.get_bool("extractRaw"), Some(false));
    }
}
