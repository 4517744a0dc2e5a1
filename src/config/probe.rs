//! Probe identifiers and run modes

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QcError;

/// One physical probe, identified by its letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProbeId {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl ProbeId {
    /// Every probe slot on the rig, in acquisition order.
    pub const ALL: [ProbeId; 6] = [
        ProbeId::A,
        ProbeId::B,
        ProbeId::C,
        ProbeId::D,
        ProbeId::E,
        ProbeId::F,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::F => "F",
        }
    }

    /// Probe-scoped prefix used for export directories and file names.
    pub fn label(&self) -> String {
        format!("Probe_{}", self.as_str())
    }
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeId {
    type Err = QcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            "E" => Ok(Self::E),
            "F" => Ok(Self::F),
            _ => Err(QcError::config(format!(
                "Unknown probe '{}'. Expected one of: A, B, C, D, E, F",
                s
            ))),
        }
    }
}

/// Which workflow a run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Every probe on the rig
    Batch,
    /// One probe chosen on the command line
    SingleProbe,
    /// Region-specific re-run over the NP2.0 probes
    Np20Rerun,
}

impl RunMode {
    pub const ALL: [RunMode; 3] = [RunMode::Batch, RunMode::SingleProbe, RunMode::Np20Rerun];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::SingleProbe => "single_probe",
            Self::Np20Rerun => "np20_rerun",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Batch => "Analyze all probes with default staging and export roots",
            Self::SingleProbe => "Analyze one target probe",
            Self::Np20Rerun => "Re-run the NP2.0 probes with region-specific settings",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = QcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "batch" => Ok(Self::Batch),
            "single_probe" => Ok(Self::SingleProbe),
            "np20_rerun" | "region_specific_rerun" => Ok(Self::Np20Rerun),
            _ => Err(QcError::config(format!(
                "Unknown mode '{}'. Expected one of: batch, single_probe, np20_rerun",
                s
            ))),
        }
    }
}

/// Everything the pipeline needs to know about one probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub id: ProbeId,
    /// Kilosort4 output directory before staging.
    pub kilosort_dir: PathBuf,
    /// Raw `continuous.dat` for this probe.
    pub raw_file: PathBuf,
    /// Open Ephys `structure.oebin` shared by the recording.
    pub meta_file: PathBuf,
    /// Brain region description, for logs.
    pub region: String,
    /// ROI extent in microns from the tip; `None` disables labeling.
    pub roi_boundary_um: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_parse_is_case_insensitive() {
        assert_eq!("c".parse::<ProbeId>().unwrap(), ProbeId::C);
        assert_eq!(" F ".parse::<ProbeId>().unwrap(), ProbeId::F);
    }

    #[test]
    fn test_unknown_probe_is_configuration_error() {
        let err = "G".parse::<ProbeId>().unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION");
    }

    #[test]
    fn test_mode_aliases() {
        assert_eq!("single-probe".parse::<RunMode>().unwrap(), RunMode::SingleProbe);
        assert_eq!("np20_rerun".parse::<RunMode>().unwrap(), RunMode::Np20Rerun);
        assert_eq!(
            "region-specific-rerun".parse::<RunMode>().unwrap(),
            RunMode::Np20Rerun
        );
        assert!("nightly".parse::<RunMode>().is_err());
    }

    #[test]
    fn test_probe_label() {
        assert_eq!(ProbeId::B.label(), "Probe_B");
    }
}
