//! Error handling for probe-qc
//!
//! Errors are grouped by where they stop the run: configuration and staging
//! errors abort before analysis, everything raised inside a probe pipeline is
//! caught at the per-probe boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for probe-qc operations
pub type Result<T> = std::result::Result<T, QcError>;

/// Main error type for probe-qc operations
#[derive(Error, Debug)]
pub enum QcError {
    // Configuration Errors
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Failed to read config file: {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // Staging Errors
    #[error("Missing kilosort4 folder for probe {probe}: {path}")]
    MissingSource { probe: String, path: PathBuf },

    #[error("Destination exists: {path} (use --overwrite to replace)")]
    DestinationExists { path: PathBuf },

    #[error("Failed to stage {from} -> {to}: {source}")]
    StagingCopy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Analysis Errors
    #[error("Quality metrics are missing required column '{column}' ({context})")]
    MissingColumn { column: String, context: String },

    #[error("Found maxChannels outside valid range [0, {channel_count}) for {context}: {offending:?}")]
    ChannelOutOfRange {
        context: String,
        channel_count: usize,
        offending: Vec<f64>,
    },

    #[error("tip_position must be 'min_y' or 'max_y', got '{value}'")]
    InvalidTipEnd { value: String },

    #[error("Row count mismatch for probe {probe}: {reason}")]
    Mismatch { probe: String, reason: String },

    #[error("Could not determine cluster IDs for ROI label export for probe {probe}. Expected echoed 'unique_templates' or a 'phy_clusterID' metrics column.")]
    MissingClusterIds { probe: String },

    #[error("Column '{column}' has {actual} rows, expected {expected}")]
    ColumnLength {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid metrics table: {reason}")]
    InvalidMetrics { reason: String },

    #[error("Metrics engine error: {reason}")]
    Engine { reason: String },

    #[error("Failed to read channel geometry from {path}: {reason}")]
    GeometryRead { path: PathBuf, reason: String },

    // Export Errors
    #[error("Refusing to overwrite export files in {dir}: {existing:?}")]
    ArtifactExists { dir: PathBuf, existing: Vec<PathBuf> },

    #[error("Failed to write file: {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl QcError {
    /// Shorthand for a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        QcError::Configuration {
            reason: reason.into(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            QcError::Configuration { .. } => "CONFIGURATION",
            QcError::ConfigRead { .. } => "CONFIG_READ",
            QcError::ConfigParse { .. } => "CONFIG_PARSE",
            QcError::MissingSource { .. } => "MISSING_SOURCE",
            QcError::DestinationExists { .. } => "DESTINATION_EXISTS",
            QcError::StagingCopy { .. } => "STAGING_COPY",
            QcError::MissingColumn { .. } => "MISSING_COLUMN",
            QcError::ChannelOutOfRange { .. } => "CHANNEL_OUT_OF_RANGE",
            QcError::InvalidTipEnd { .. } => "INVALID_TIP_END",
            QcError::Mismatch { .. } => "MISMATCH",
            QcError::MissingClusterIds { .. } => "MISSING_CLUSTER_IDS",
            QcError::ColumnLength { .. } => "COLUMN_LENGTH",
            QcError::InvalidMetrics { .. } => "INVALID_METRICS",
            QcError::Engine { .. } => "ENGINE_ERROR",
            QcError::GeometryRead { .. } => "GEOMETRY_READ",
            QcError::ArtifactExists { .. } => "ARTIFACT_EXISTS",
            QcError::FileWrite { .. } => "FILE_WRITE",
            QcError::Io(_) => "IO_ERROR",
            QcError::Serialization(_) => "SERIALIZATION_ERROR",
            QcError::Csv(_) => "CSV_ERROR",
        }
    }

    /// Check if this error is contained at a per-probe boundary.
    ///
    /// Configuration and staging errors are fatal for the whole run.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            QcError::Configuration { .. }
                | QcError::ConfigRead { .. }
                | QcError::ConfigParse { .. }
                | QcError::MissingSource { .. }
                | QcError::DestinationExists { .. }
                | QcError::StagingCopy { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = QcError::config("unknown probe 'Z'");
        assert_eq!(err.error_code(), "CONFIGURATION");
        assert!(err.to_string().contains("unknown probe 'Z'"));
    }

    #[test]
    fn test_recoverability_split() {
        let staging = QcError::DestinationExists {
            path: PathBuf::from("/tmp/kilosort4_A"),
        };
        assert!(!staging.is_recoverable());

        let analysis = QcError::Mismatch {
            probe: "B".to_string(),
            reason: "3 labels for 4 units".to_string(),
        };
        assert!(analysis.is_recoverable());
        assert!(QcError::ArtifactExists {
            dir: PathBuf::from("/out/Probe_B"),
            existing: vec![],
        }
        .is_recoverable());
    }
}
