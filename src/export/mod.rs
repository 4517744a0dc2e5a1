//! Export of per-probe artifacts and batch summaries
//!
//! Layout under the export root:
//! - `Probe_<P>/Probe_<P>_quality_metrics.csv`, `_unit_type_counts.csv`,
//!   `_param.json`, or `ERROR.txt` for a failed probe
//! - `batch_summary.csv`
//! - `run_manifest.json`

pub mod manifest;
pub mod summary;
pub mod writer;

pub use manifest::{file_sha256, ManifestFile, ManifestProbe, RunManifest, RUN_MANIFEST_FILE};
pub use summary::{unit_type_counts, SummaryRow, BATCH_SUMMARY_FILE, STATUS_EXPORT_FAILED};
pub use writer::{artifact_paths, export_results, ExportReport, ProbeExport, ERROR_FILE};
