//! Batch orchestration
//!
//! Runs the metrics engine probe by probe. A failing probe is recorded and
//! the loop moves on.

pub mod orchestrator;
pub mod result;

pub use orchestrator::{save_path_for, BatchRunner, ProbeJob, ROI_LABEL_FILE};
pub use result::{BatchResults, ProbeFailure, ProbeRun, RunResult, STATUS_FAILED, STATUS_OK};
