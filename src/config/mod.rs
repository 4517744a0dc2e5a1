//! Configuration
//!
//! Probe identities, run modes, and the recording config file.

pub mod probe;
pub mod recording;

pub use probe::{ProbeId, ProbeRecord, RunMode};
pub use recording::{
    ModeOverrides, ProbeOverrides, Recording, RecordingConfig, CONFIG_ENV_VAR,
    DEFAULT_CONFIG_PATH,
};
