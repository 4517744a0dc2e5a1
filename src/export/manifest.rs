//! Run manifest written beside the batch summary

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::{ProbeId, RunMode};
use crate::error::{QcError, Result};
use crate::export::writer::ExportReport;

pub const RUN_MANIFEST_FILE: &str = "run_manifest.json";

/// An exported file and its content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestProbe {
    pub probe: ProbeId,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub files: Vec<ManifestFile>,
}

/// Hex SHA-256 of a file's content.
pub fn file_sha256(path: &Path) -> Result<String> {
    let content = fs::read(path)?;
    Ok(format!("{:x}", Sha256::digest(&content)))
}

/// Who ran what, when, and how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub recording_name: String,
    pub mode: RunMode,
    pub engine: String,
    pub config_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub probes: Vec<ManifestProbe>,
    pub crate_version: String,
}

impl RunManifest {
    /// Start a manifest for a new run.
    pub fn begin(recording_name: &str, mode: RunMode, engine: &str) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            recording_name: recording_name.to_string(),
            mode,
            engine: engine.to_string(),
            config_path: None,
            started_at: Utc::now(),
            finished_at: None,
            probes: Vec::new(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_config_path(mut self, path: Option<&Path>) -> Self {
        self.config_path = path.map(Path::to_path_buf);
        self
    }

    /// Record per-probe outcomes, hash the exported files and stamp the
    /// finish time.
    pub fn finish(&mut self, report: &ExportReport) -> Result<()> {
        let mut probes = Vec::with_capacity(report.probes.len());
        for (probe, export) in &report.probes {
            let files = export
                .files
                .iter()
                .map(|path| {
                    Ok(ManifestFile {
                        path: path.clone(),
                        sha256: file_sha256(path)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            probes.push(ManifestProbe {
                probe: *probe,
                status: export.status.clone(),
                error: export.error.clone(),
                files,
            });
        }
        self.probes = probes;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(RUN_MANIFEST_FILE);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content).map_err(|e| QcError::FileWrite {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::writer::ProbeExport;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_manifest_records_outcomes() {
        let temp = TempDir::new().unwrap();
        let error_file = temp.path().join("ERROR.txt");
        fs::write(&error_file, b"boom\n").unwrap();
        let report = ExportReport {
            output_root: temp.path().to_path_buf(),
            summary_path: temp.path().join("batch_summary.csv"),
            probes: BTreeMap::from([
                (
                    ProbeId::A,
                    ProbeExport {
                        status: "OK".to_string(),
                        dir: temp.path().join("Probe_A"),
                        files: vec![],
                        error: None,
                    },
                ),
                (
                    ProbeId::B,
                    ProbeExport {
                        status: "FAILED".to_string(),
                        dir: temp.path().join("Probe_B"),
                        files: vec![error_file.clone()],
                        error: Some("boom".to_string()),
                    },
                ),
            ]),
        };

        let mut manifest = RunManifest::begin("session_01", RunMode::Batch, "mock");
        manifest.finish(&report).unwrap();
        let path = manifest.save(temp.path()).unwrap();
        let loaded = RunManifest::load(&path).unwrap();

        assert_eq!(loaded, manifest);
        assert_eq!(loaded.probes.len(), 2);
        assert_eq!(loaded.probes[1].error.as_deref(), Some("boom"));
        assert_eq!(
            loaded.probes[1].files[0].sha256,
            "8d7a531d714c4bd7121bf7d639c6191ff6495a4f1132c9ae3cdd672be0168954"
        );
        assert!(loaded.finished_at.unwrap() >= loaded.started_at);
        assert_eq!(Uuid::parse_str(&loaded.run_id).unwrap().get_version_num(), 4);
    }
}
