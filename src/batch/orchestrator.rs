//! Per-probe pipeline and the batch loop around it

use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, error, info, warn};
use serde_json::{Map, Value};

use crate::batch::result::{BatchResults, ProbeFailure, ProbeRun, RunResult};
use crate::config::{ProbeRecord, RunMode};
use crate::engine::{EngineOutput, EngineRequest, MetricsEngine};
use crate::error::{QcError, Result};
use crate::geometry::{label_units, GeometrySource, TipEnd, ROI_LABEL_COLUMN};
use crate::metrics::{UnitMetrics, PHY_CLUSTER_ID_COLUMN, UNIT_ID_COLUMN};
use crate::params::{EngineParams, OverrideLayer, ParameterResolver, ParameterSet, Tier};

/// Per-cluster ROI labels written next to the staged sort.
pub const ROI_LABEL_FILE: &str = "cluster_roi_label.tsv";
/// Engine save folder inside a staged directory.
pub const SAVE_DIR: &str = "bombcell";
/// Echoed parameter holding the cluster id of each metrics row.
pub const UNIQUE_TEMPLATES_PARAM: &str = "unique_templates";

/// One probe ready to analyze.
#[derive(Debug, Clone)]
pub struct ProbeJob {
    pub record: ProbeRecord,
    pub staged_dir: PathBuf,
    /// Preset, config and user layers; engine defaults are added at run time
    pub layers: Vec<OverrideLayer>,
}

/// Engine save path for a staged directory and mode.
pub fn save_path_for(staged_dir: &Path, mode: RunMode) -> PathBuf {
    staged_dir.join(SAVE_DIR).join(mode.as_str())
}

/// Runs the engine over a set of probes, isolating failures per probe.
pub struct BatchRunner<'a> {
    engine: &'a dyn MetricsEngine,
    geometry: &'a dyn GeometrySource,
    resolver: ParameterResolver,
    mode: RunMode,
    tip_end: TipEnd,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        engine: &'a dyn MetricsEngine,
        geometry: &'a dyn GeometrySource,
        mode: RunMode,
    ) -> Self {
        Self {
            engine,
            geometry,
            resolver: ParameterResolver::all(),
            mode,
            tip_end: TipEnd::Min,
        }
    }

    pub fn with_resolver(mut self, resolver: ParameterResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_tip_end(mut self, tip_end: TipEnd) -> Self {
        self.tip_end = tip_end;
        self
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Analyze every job, returning exactly one result per job.
    ///
    /// An unregistered probe or mode is a configuration error for the whole
    /// batch and is reported before any engine work starts.
    pub fn run(&self, jobs: &[ProbeJob]) -> Result<BatchResults> {
        for job in jobs {
            self.resolver.check_registered(job.record.id, self.mode)?;
        }

        let mut results = BatchResults::new();
        for job in jobs {
            let probe = job.record.id;
            let save_path = save_path_for(&job.staged_dir, self.mode);
            info!(
                "=== Probe {} ({}) [{}] ===",
                probe, job.record.region, self.mode
            );
            let start = Instant::now();

            let result = match self.run_probe(job, &save_path) {
                Ok(run) => {
                    info!(
                        "Probe {} finished: {} units in {:.1}s",
                        probe,
                        run.metrics.len(),
                        start.elapsed().as_secs_f64()
                    );
                    RunResult::Ok(Box::new(run))
                }
                Err(e) => {
                    error!("Probe {} failed [{}]: {}", probe, e.error_code(), e);
                    RunResult::Failed(ProbeFailure {
                        probe,
                        error: e,
                        staged_dir: job.staged_dir.clone(),
                        save_path,
                    })
                }
            };
            results.insert(probe, result);
        }

        let failed = results.failed_probes();
        if failed.is_empty() {
            info!("All {} probes completed", results.len());
        } else {
            warn!(
                "{} of {} probes failed: {:?}",
                failed.len(),
                results.len(),
                failed
            );
        }
        Ok(results)
    }

    fn run_probe(&self, job: &ProbeJob, save_path: &Path) -> Result<ProbeRun> {
        let record = &job.record;
        fs::create_dir_all(save_path).map_err(|e| QcError::FileWrite {
            path: save_path.to_path_buf(),
            source: e,
        })?;

        let raw_file = &record.raw_file;
        let meta_file = &record.meta_file;
        let defaults = self
            .engine
            .default_parameters(&job.staged_dir, raw_file, meta_file)?;

        let mut layers = vec![
            OverrideLayer::new(Tier::Base, "engine_defaults", defaults.as_map().clone()),
            OverrideLayer::new(Tier::Base, "extract_raw", extract_raw()),
        ];
        layers.extend(job.layers.iter().cloned());
        let resolved = self.resolver.resolve(record.id, self.mode, &layers)?;
        log_overrides(record, &defaults, &resolved, &job.layers);

        let request = EngineRequest {
            probe: record.id,
            ks_dir: &job.staged_dir,
            save_path,
            raw_file,
            meta_file,
            params: &resolved,
        };
        let output = self.call_engine(&request)?;
        let EngineOutput {
            metrics,
            params,
            unit_types,
        } = output;

        if unit_types.len() != metrics.len() {
            return Err(QcError::Mismatch {
                probe: record.id.to_string(),
                reason: format!(
                    "{} unit type labels for {} metric rows",
                    unit_types.len(),
                    metrics.len()
                ),
            });
        }

        let mut run = ProbeRun {
            probe: record.id,
            staged_dir: job.staged_dir.clone(),
            save_path: save_path.to_path_buf(),
            metrics,
            resolved,
            params,
            unit_types,
            roi_labels: None,
            roi_label_file: None,
        };

        match record.roi_boundary_um {
            Some(boundary) => self.apply_roi(&mut run, boundary)?,
            None => debug!("Probe {}: no ROI boundary, skipping labels", record.id),
        }
        Ok(run)
    }

    fn call_engine(&self, request: &EngineRequest<'_>) -> Result<EngineOutput> {
        let engine = self.engine;
        match catch_unwind(AssertUnwindSafe(|| engine.run(request))) {
            Ok(result) => result,
            Err(panic_info) => {
                let message = if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else {
                    "unknown panic".to_string()
                };
                Err(QcError::Engine {
                    reason: format!("{} engine panicked: {}", engine.name(), message),
                })
            }
        }
    }

    fn apply_roi(&self, run: &mut ProbeRun, boundary: f64) -> Result<()> {
        let probe = run.probe.to_string();
        let geometry = self.geometry.channel_geometry(&run.staged_dir)?;
        let labeled = label_units(&run.metrics, &geometry, boundary, self.tip_end)?;

        let labels: Vec<String> = labeled
            .text(ROI_LABEL_COLUMN)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        let cluster_ids = cluster_ids(&probe, &run.params, &labeled)?;

        if labels.len() != cluster_ids.len() || labels.len() != labeled.len() {
            return Err(QcError::Mismatch {
                probe,
                reason: format!(
                    "{} ROI labels, {} cluster ids, {} units",
                    labels.len(),
                    cluster_ids.len(),
                    labeled.len()
                ),
            });
        }

        let in_roi = labels
            .iter()
            .filter(|l| l.as_str() == crate::geometry::IN_ROI)
            .count();
        info!(
            "Probe {}: {} of {} units within {} um of the tip",
            run.probe,
            in_roi,
            labels.len(),
            boundary
        );

        let path = run.staged_dir.join(ROI_LABEL_FILE);
        write_roi_labels(&path, &cluster_ids, &labels)?;
        debug!("Wrote {}", path.display());

        run.metrics = labeled;
        run.roi_labels = Some(labels);
        run.roi_label_file = Some(path);
        Ok(())
    }
}

fn extract_raw() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("extractRaw".to_string(), Value::Bool(true));
    map
}

fn log_overrides(
    record: &ProbeRecord,
    defaults: &ParameterSet,
    resolved: &ParameterSet,
    layers: &[OverrideLayer],
) {
    for layer in layers.iter().filter(|l| !l.is_empty()) {
        let mut keys: Vec<&str> = layer.values.keys().map(String::as_str).collect();
        keys.sort_unstable();
        info!(
            "Probe {}: applying {} ({} keys): {}",
            record.id,
            layer.name,
            keys.len(),
            keys.join(", ")
        );
    }

    let changed: Vec<String> = resolved
        .iter()
        .filter(|(key, value)| defaults.get(key) != Some(*value))
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    if !changed.is_empty() {
        info!(
            "Probe {}: final overridden values: {}",
            record.id,
            changed.join(", ")
        );
    }
}

/// Cluster id of each metrics row.
fn cluster_ids(probe: &str, params: &EngineParams, metrics: &UnitMetrics) -> Result<Vec<i64>> {
    if let Some(ids) = params
        .get(UNIQUE_TEMPLATES_PARAM)
        .and_then(|value| value.as_int_vec())
    {
        return Ok(ids);
    }
    if let Some(column) = metrics.numeric(PHY_CLUSTER_ID_COLUMN) {
        let ids: Option<Vec<i64>> = column
            .iter()
            .map(|v| (v.is_finite() && v.fract() == 0.0).then_some(*v as i64))
            .collect();
        if let Some(ids) = ids {
            return Ok(ids);
        }
    }
    Err(QcError::MissingClusterIds {
        probe: probe.to_string(),
    })
}

fn write_roi_labels(path: &Path, cluster_ids: &[i64], labels: &[String]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    writer.write_record([UNIT_ID_COLUMN, ROI_LABEL_COLUMN])?;
    for (id, label) in cluster_ids.iter().zip(labels) {
        writer.write_record([id.to_string().as_str(), label.as_str()])?;
    }
    writer.flush().map_err(|e| QcError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeId;
    use crate::engine::MockEngine;
    use crate::geometry::{ChannelGeometry, KilosortGeometry, CHANNEL_POSITIONS_FILE};
    use crate::params::ParamValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn job(root: &Path, probe: ProbeId, roi: Option<f64>) -> ProbeJob {
        let staged_dir = root.join(format!("kilosort4_{}", probe));
        fs::create_dir_all(&staged_dir).unwrap();
        ProbeJob {
            record: ProbeRecord {
                id: probe,
                kilosort_dir: root.join("src"),
                raw_file: root.join("continuous.dat"),
                meta_file: root.join("structure.oebin"),
                region: "test region".to_string(),
                roi_boundary_um: roi,
            },
            staged_dir,
            layers: vec![],
        }
    }

    fn shank() -> ChannelGeometry {
        // 10 um pitch, tip at y = 0
        ChannelGeometry::new((0..8).map(|i| [16.0, 10.0 * i as f64]).collect())
    }

    #[test]
    fn test_failure_is_isolated() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new().failing_on(ProbeId::B);
        let geometry = shank();
        let runner = BatchRunner::new(&engine, &geometry, RunMode::Batch);
        let jobs: Vec<ProbeJob> = [ProbeId::A, ProbeId::B, ProbeId::C]
            .iter()
            .map(|p| job(temp.path(), *p, None))
            .collect();

        let results = runner.run(&jobs).unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.get(ProbeId::A).unwrap().is_ok());
        assert!(results.get(ProbeId::C).unwrap().is_ok());
        let failed = results.get(ProbeId::B).unwrap();
        assert_eq!(failed.status(), "FAILED");
        assert_eq!(failed.error().unwrap().error_code(), "ENGINE_ERROR");
        assert_eq!(
            failed.save_path(),
            temp.path().join("kilosort4_B").join("bombcell").join("batch")
        );
    }

    #[test]
    fn test_engine_panic_becomes_failure() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new().panicking_on(ProbeId::D);
        let geometry = shank();
        let runner = BatchRunner::new(&engine, &geometry, RunMode::Np20Rerun);
        let jobs = vec![job(temp.path(), ProbeId::D, None), job(temp.path(), ProbeId::A, None)];

        let results = runner.run(&jobs).unwrap();

        assert_eq!(results.failed_probes(), vec![ProbeId::D]);
        let err = results.get(ProbeId::D).unwrap().error().unwrap();
        assert!(err.to_string().contains("panicked"));
    }

    #[test]
    fn test_resolved_params_start_from_engine_defaults() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let geometry = shank();
        let runner = BatchRunner::new(&engine, &geometry, RunMode::Batch);
        let mut job = job(temp.path(), ProbeId::E, None);
        let mut user = Map::new();
        user.insert("minSNR".to_string(), Value::from(2.5));
        job.layers.push(OverrideLayer::new(Tier::User, "user", user));

        let results = runner.run(&[job]).unwrap();
        let run = results.get(ProbeId::E).unwrap().run().unwrap();

        assert_eq!(run.resolved.get_bool("extractRaw"), Some(true));
        assert_eq!(run.resolved.get_f64("minSNR"), Some(2.5));
        assert_eq!(run.resolved.get_f64("maxDrift"), Some(100.0));
        assert!(matches!(run.params.get("savePath"), Some(ParamValue::Path(_))));
        assert!(run.save_path.is_dir());
    }

    #[test]
    fn test_roi_labels_written() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new().with_units(4).with_channel_count(8);
        let geometry = shank();
        let runner = BatchRunner::new(&engine, &geometry, RunMode::Batch);

        let results = runner.run(&[job(temp.path(), ProbeId::A, Some(15.0))]).unwrap();
        let run = results.get(ProbeId::A).unwrap().run().unwrap();

        // units sit on channels 0..4 -> distances 0, 10, 20, 30
        assert_eq!(
            run.roi_labels.as_deref().unwrap(),
            ["IN_ROI", "IN_ROI", "OUTSIDE_ROI", "OUTSIDE_ROI"]
        );
        let tsv = fs::read_to_string(temp.path().join("kilosort4_A").join(ROI_LABEL_FILE)).unwrap();
        assert_eq!(
            tsv,
            "cluster_id\troi_label\n1\tIN_ROI\n3\tIN_ROI\n5\tOUTSIDE_ROI\n7\tOUTSIDE_ROI\n"
        );
    }

    #[test]
    fn test_roi_without_cluster_ids_fails_probe() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new().with_channel_count(8).without_cluster_ids();
        let geometry = shank();
        let runner = BatchRunner::new(&engine, &geometry, RunMode::Batch);

        let results = runner.run(&[job(temp.path(), ProbeId::F, Some(50.0))]).unwrap();
        let err = results.get(ProbeId::F).unwrap().error().unwrap();
        assert_eq!(err.error_code(), "MISSING_CLUSTER_IDS");
    }

    #[test]
    fn test_channel_outside_geometry_fails_probe() {
        let temp = TempDir::new().unwrap();
        // 12 units spread over 384 channels, geometry only has 8
        let engine = MockEngine::new().with_units(12);
        let geometry = shank();
        let runner = BatchRunner::new(&engine, &geometry, RunMode::Batch);

        let results = runner.run(&[job(temp.path(), ProbeId::C, Some(50.0))]).unwrap();
        let err = results.get(ProbeId::C).unwrap().error().unwrap();
        assert_eq!(err.error_code(), "CHANNEL_OUT_OF_RANGE");
    }

    #[test]
    fn test_label_count_mismatch() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new().with_short_labels_on(ProbeId::A);
        let geometry = shank();
        let runner = BatchRunner::new(&engine, &geometry, RunMode::Batch);

        let results = runner.run(&[job(temp.path(), ProbeId::A, None)]).unwrap();
        let err = results.get(ProbeId::A).unwrap().error().unwrap();
        assert_eq!(err.error_code(), "MISMATCH");
    }

    /// Counts engine calls so tests can tell whether any engine work ran.
    struct CountingEngine {
        inner: MockEngine,
        calls: AtomicUsize,
    }

    impl MetricsEngine for CountingEngine {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn default_parameters(
            &self,
            ks_dir: &Path,
            raw_file: &Path,
            meta_file: &Path,
        ) -> Result<ParameterSet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.default_parameters(ks_dir, raw_file, meta_file)
        }

        fn run(&self, request: &EngineRequest<'_>) -> Result<EngineOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.run(request)
        }
    }

    #[test]
    fn test_unregistered_probe_rejected_before_engine_work() {
        let temp = TempDir::new().unwrap();
        let engine = CountingEngine {
            inner: MockEngine::new(),
            calls: AtomicUsize::new(0),
        };
        let geometry = shank();
        let runner = BatchRunner::new(&engine, &geometry, RunMode::Batch)
            .with_resolver(ParameterResolver::new([ProbeId::A], RunMode::ALL));
        let jobs = vec![job(temp.path(), ProbeId::A, None), job(temp.path(), ProbeId::B, None)];

        let err = runner.run(&jobs).unwrap_err();

        assert_eq!(err.error_code(), "CONFIGURATION");
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("probe_id=B"));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unregistered_mode_rejected() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let geometry = shank();
        let runner = BatchRunner::new(&engine, &geometry, RunMode::Np20Rerun)
            .with_resolver(ParameterResolver::new(ProbeId::ALL, [RunMode::Batch]));

        let err = runner.run(&[job(temp.path(), ProbeId::A, None)]).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION");
    }

    #[test]
    fn test_corrupt_geometry_fails_only_its_probe() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new().with_units(4).with_channel_count(8);
        let runner = BatchRunner::new(&engine, &KilosortGeometry, RunMode::Batch);

        let bad = job(temp.path(), ProbeId::A, Some(15.0));
        let header = "{'descr': '<f8', 'fortran_order': False, 'shape': (4611686018427387904, 2), }\n";
        let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&[0u8; 64]);
        fs::write(bad.staged_dir.join(CHANNEL_POSITIONS_FILE), bytes).unwrap();
        let good = job(temp.path(), ProbeId::C, None);

        let results = runner.run(&[bad, good]).unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.get(ProbeId::C).unwrap().is_ok());
        let err = results.get(ProbeId::A).unwrap().error().unwrap();
        assert_eq!(err.error_code(), "GEOMETRY_READ");
    }
}
