//! Per-probe export artifacts

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};

use crate::batch::{BatchResults, ProbeRun, RunResult, STATUS_FAILED, STATUS_OK};
use crate::config::ProbeId;
use crate::error::{QcError, Result};
use crate::export::summary::{
    unit_type_counts, write_batch_summary, SummaryRow, BATCH_SUMMARY_FILE, STATUS_EXPORT_FAILED,
};
use crate::geometry::ROI_LABEL_COLUMN;
use crate::metrics::UNIT_ID_COLUMN;
use crate::params::params_to_json;

pub const ERROR_FILE: &str = "ERROR.txt";
pub const UNIT_TYPE_COLUMN: &str = "Bombcell_unit_type";

/// What export did for one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeExport {
    pub status: String,
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub error: Option<String>,
}

/// Outcome of exporting a whole batch.
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub output_root: PathBuf,
    pub summary_path: PathBuf,
    pub probes: BTreeMap<ProbeId, ProbeExport>,
}

impl ExportReport {
    pub fn status(&self, probe: ProbeId) -> Option<&str> {
        self.probes.get(&probe).map(|p| p.status.as_str())
    }
}

/// The three artifact paths for a successful probe.
pub fn artifact_paths(dir: &Path, probe: ProbeId) -> [PathBuf; 3] {
    let label = probe.label();
    [
        dir.join(format!("{}_quality_metrics.csv", label)),
        dir.join(format!("{}_unit_type_counts.csv", label)),
        dir.join(format!("{}_param.json", label)),
    ]
}

/// Write every probe's artifacts under `output_root/Probe_<P>/`, then the
/// batch summary.
///
/// Export problems for one probe are recorded in its summary row and do not
/// stop the others.
pub fn export_results(
    results: &BatchResults,
    output_root: &Path,
    probes: &[ProbeId],
    overwrite: bool,
) -> Result<ExportReport> {
    fs::create_dir_all(output_root).map_err(|e| QcError::FileWrite {
        path: output_root.to_path_buf(),
        source: e,
    })?;

    let mut rows = Vec::with_capacity(probes.len());
    let mut exports = BTreeMap::new();

    for &probe in probes {
        let dir = output_root.join(probe.label());
        fs::create_dir_all(&dir).map_err(|e| QcError::FileWrite {
            path: dir.clone(),
            source: e,
        })?;

        let (row, export) = match results.get(probe) {
            Some(RunResult::Ok(run)) => export_run(run, &dir, overwrite),
            Some(failed @ RunResult::Failed(_)) => {
                let message = failed
                    .error()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                export_failure(
                    probe,
                    &dir,
                    failed.staged_dir(),
                    failed.save_path(),
                    message,
                    overwrite,
                )?
            }
            None => {
                warn!("Probe {} has no result to export", probe);
                export_failure(
                    probe,
                    &dir,
                    Path::new(""),
                    Path::new(""),
                    format!("probe {} was not run", probe),
                    overwrite,
                )?
            }
        };
        rows.push(row);
        exports.insert(probe, export);
    }

    let summary_path = output_root.join(BATCH_SUMMARY_FILE);
    write_batch_summary(&summary_path, &rows)?;
    info!("Wrote {}", summary_path.display());

    Ok(ExportReport {
        output_root: output_root.to_path_buf(),
        summary_path,
        probes: exports,
    })
}

fn export_failure(
    probe: ProbeId,
    dir: &Path,
    ks_dir: &Path,
    save_path: &Path,
    message: String,
    overwrite: bool,
) -> Result<(SummaryRow, ProbeExport)> {
    let stale: Vec<PathBuf> = artifact_paths(dir, probe)
        .into_iter()
        .filter(|p| p.exists())
        .collect();
    if overwrite {
        for path in &stale {
            remove_stale(path)?;
        }
    } else if !stale.is_empty() {
        warn!(
            "Probe {}: artifacts from an earlier run left in {} (pass --overwrite to clear them)",
            probe,
            dir.display()
        );
    }

    let path = dir.join(ERROR_FILE);
    fs::write(&path, format!("{}\n", message)).map_err(|e| QcError::FileWrite {
        path: path.clone(),
        source: e,
    })?;
    info!("Probe {}: wrote {}", probe, path.display());

    Ok((
        SummaryRow {
            probe,
            status: STATUS_FAILED.to_string(),
            ks_dir: ks_dir.to_path_buf(),
            save_path: save_path.to_path_buf(),
            error: Some(message.clone()),
            counts: BTreeMap::new(),
        },
        ProbeExport {
            status: STATUS_FAILED.to_string(),
            dir: dir.to_path_buf(),
            files: vec![path],
            error: Some(message),
        },
    ))
}

fn export_run(run: &ProbeRun, dir: &Path, overwrite: bool) -> (SummaryRow, ProbeExport) {
    let counts = unit_type_counts(&run.unit_types);
    let mut row = SummaryRow {
        probe: run.probe,
        status: STATUS_OK.to_string(),
        ks_dir: run.staged_dir.clone(),
        save_path: run.save_path.clone(),
        error: None,
        counts: counts.iter().cloned().collect(),
    };

    match write_artifacts(run, dir, &counts, overwrite) {
        Ok(files) => {
            info!("Probe {}: exported {} files to {}", run.probe, files.len(), dir.display());
            let export = ProbeExport {
                status: row.status.clone(),
                dir: dir.to_path_buf(),
                files,
                error: None,
            };
            (row, export)
        }
        Err(e) => {
            error!("Probe {}: export failed: {}", run.probe, e);
            let message = e.to_string();
            row.status = STATUS_EXPORT_FAILED.to_string();
            row.error = Some(message.clone());
            let export = ProbeExport {
                status: STATUS_EXPORT_FAILED.to_string(),
                dir: dir.to_path_buf(),
                files: Vec::new(),
                error: Some(message),
            };
            (row, export)
        }
    }
}

fn write_artifacts(
    run: &ProbeRun,
    dir: &Path,
    counts: &[(String, usize)],
    overwrite: bool,
) -> Result<Vec<PathBuf>> {
    let [metrics_path, counts_path, param_path] = artifact_paths(dir, run.probe);

    if !overwrite {
        let existing: Vec<PathBuf> = [&metrics_path, &counts_path, &param_path]
            .into_iter()
            .filter(|p| p.exists())
            .cloned()
            .collect();
        if !existing.is_empty() {
            return Err(QcError::ArtifactExists {
                dir: dir.to_path_buf(),
                existing,
            });
        }
    }

    let targets = [metrics_path, counts_path, param_path];
    let partials = targets.clone().map(|p| partial_path(&p));
    if let Err(e) = write_partials(run, counts, &partials) {
        discard(&partials);
        return Err(e);
    }
    for (partial, target) in partials.iter().zip(&targets) {
        if let Err(e) = fs::rename(partial, target) {
            discard(&partials);
            return Err(QcError::FileWrite {
                path: target.clone(),
                source: e,
            });
        }
    }

    let error_file = dir.join(ERROR_FILE);
    if error_file.exists() {
        remove_stale(&error_file)?;
    }

    Ok(targets.to_vec())
}

/// Artifacts are written under a `.partial` suffix and renamed once all
/// three succeeded.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

fn write_partials(run: &ProbeRun, counts: &[(String, usize)], paths: &[PathBuf; 3]) -> Result<()> {
    let [metrics_path, counts_path, param_path] = paths;
    write_metrics(metrics_path, run)?;
    write_counts(counts_path, counts)?;

    let params = serde_json::to_string_pretty(&params_to_json(&run.params))?;
    fs::write(param_path, params).map_err(|e| QcError::FileWrite {
        path: param_path.clone(),
        source: e,
    })
}

fn discard(paths: &[PathBuf]) {
    for path in paths.iter().filter(|p| p.is_file()) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

fn remove_stale(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| QcError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;
    info!("Removed stale {}", path.display());
    Ok(())
}

/// Unit type first, ROI label second when present, then cluster id and the
/// remaining metric columns in table order.
fn write_metrics(path: &Path, run: &ProbeRun) -> Result<()> {
    let metrics = &run.metrics;
    let roi = metrics.column(ROI_LABEL_COLUMN);
    let rest: Vec<_> = metrics
        .columns()
        .filter(|(name, _)| *name != ROI_LABEL_COLUMN && *name != UNIT_ID_COLUMN)
        .collect();

    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec![UNIT_TYPE_COLUMN];
    if roi.is_some() {
        header.push(ROI_LABEL_COLUMN);
    }
    header.push(UNIT_ID_COLUMN);
    header.extend(rest.iter().map(|(name, _)| *name));
    writer.write_record(&header)?;

    for (row, unit_id) in metrics.unit_ids().iter().enumerate() {
        let mut record = vec![run.unit_types.get(row).cloned().unwrap_or_default()];
        if let Some(column) = roi {
            record.push(column.cell(row));
        }
        record.push(unit_id.to_string());
        record.extend(rest.iter().map(|(_, column)| column.cell(row)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_counts(path: &Path, counts: &[(String, usize)]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["unit_type", "count"])?;
    for (unit_type, count) in counts {
        writer.write_record([unit_type.as_str(), count.to_string().as_str()])?;
    }
    writer.flush()?;
    Ok(())
}
