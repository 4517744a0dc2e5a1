//! Recording configuration
//!
//! The on-disk config is a small JSON document naming the recording and any
//! per-probe or per-mode parameter overrides. Everything else (stream names,
//! brain regions, Open Ephys layout) has defaults matching the rig. Loading
//! resolves the document into a [`Recording`] with every path a run needs.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::probe::{ProbeId, ProbeRecord, RunMode};
use crate::engine::BridgeConfig;
use crate::error::{QcError, Result};
use crate::geometry::TipEnd;

/// Environment variable consulted when no `--config` is given.
pub const CONFIG_ENV_VAR: &str = "PROBE_QC_CONFIG";
/// Fallback config location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "configs/recording_config.json";

pub const DEFAULT_CONTINUOUS_SUBPATH: &str = "Record Node 103/experiment1/recording1/continuous";
pub const DEFAULT_STRUCTURE_OEBIN_SUBPATH: &str =
    "Record Node 103/experiment1/recording1/structure.oebin";
pub const DEFAULT_NP20_PROBES: [ProbeId; 3] = [ProbeId::A, ProbeId::C, ProbeId::D];

/// Raw data file name inside each probe stream directory.
pub const CONTINUOUS_DAT_FILE: &str = "continuous.dat";
/// Spike-sorting output directory inside each probe stream directory.
pub const KILOSORT_DIR: &str = "kilosort4";

fn default_stream_name(probe: ProbeId) -> &'static str {
    match probe {
        ProbeId::A => "Neuropix-PXI-100.ProbeA",
        ProbeId::B => "Neuropix-PXI-100.ProbeB-AP",
        ProbeId::C => "Neuropix-PXI-100.ProbeC",
        ProbeId::D => "Neuropix-PXI-100.ProbeD",
        ProbeId::E => "Neuropix-PXI-100.ProbeE-AP",
        ProbeId::F => "Neuropix-PXI-100.ProbeF-AP",
    }
}

fn default_brain_region(probe: ProbeId) -> &'static str {
    match probe {
        ProbeId::A => "NP2.0 Simplex Lobule & Interposed Nucleus",
        ProbeId::B => "NP1.0 Pontine Nuclei",
        ProbeId::C => "NP2.0 Motor Cortex",
        ProbeId::D => "NP2.0 Ventral Anterior Lateral complex of the thalamus",
        ProbeId::E => "NP1.0 Substantia Nigra (SNR)",
        ProbeId::F => "NP1.0 Reticular Nucleus",
    }
}

/// Per-probe override block as written in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawProbeOverrides {
    #[serde(default)]
    pub all_modes: Map<String, Value>,
    #[serde(default)]
    pub modes: BTreeMap<String, Map<String, Value>>,
}

/// Per-mode override block as written in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawModeOverrides {
    #[serde(default)]
    pub all: Map<String, Value>,
    #[serde(default)]
    pub probes: BTreeMap<String, Map<String, Value>>,
}

/// The config document exactly as it appears on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingConfig {
    #[serde(default)]
    pub recording_name: String,
    #[serde(default)]
    pub recordings_root: String,
    #[serde(default)]
    pub probe_stream_names: BTreeMap<String, String>,
    #[serde(default)]
    pub probe_brain_regions: BTreeMap<String, String>,
    #[serde(default)]
    pub probe_recording_roi: BTreeMap<String, Option<f64>>,
    #[serde(default)]
    pub np20_probes: Option<Vec<String>>,
    #[serde(default)]
    pub open_ephys_continuous_subpath: Option<String>,
    #[serde(default)]
    pub structure_oebin_subpath: Option<String>,
    #[serde(default)]
    pub probe_param_overrides: BTreeMap<String, RawProbeOverrides>,
    #[serde(default)]
    pub mode_param_overrides: BTreeMap<String, RawModeOverrides>,
    #[serde(default)]
    pub custom_channel_map_notes: String,
    /// Which shank end counts as the tip: `min_y` (default) or `max_y`.
    #[serde(default)]
    pub tip_position: Option<String>,
    /// Built-in parameter preset applied beneath config overrides.
    #[serde(default)]
    pub parameter_preset: Option<String>,
    /// How to reach the external metrics engine.
    #[serde(default)]
    pub engine: Option<BridgeConfig>,
}

impl RecordingConfig {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| QcError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| QcError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Overrides for one probe, keyed by typed mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeOverrides {
    pub all_modes: Map<String, Value>,
    pub modes: BTreeMap<RunMode, Map<String, Value>>,
}

/// Overrides for one mode, keyed by typed probe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModeOverrides {
    pub all: Map<String, Value>,
    pub probes: BTreeMap<ProbeId, Map<String, Value>>,
}

/// A fully resolved recording: validated names plus every derived path.
#[derive(Debug, Clone)]
pub struct Recording {
    pub config_path: Option<PathBuf>,
    pub recording_name: String,
    pub recordings_root: PathBuf,
    pub recording_root: PathBuf,
    pub continuous_root: PathBuf,
    pub structure_oebin: PathBuf,
    pub probe_stream_names: BTreeMap<ProbeId, String>,
    pub probe_regions: BTreeMap<ProbeId, String>,
    pub probe_recording_roi: BTreeMap<ProbeId, Option<f64>>,
    pub np20_probes: Vec<ProbeId>,
    pub probe_dirs: BTreeMap<ProbeId, PathBuf>,
    pub continuous_dat_paths: BTreeMap<ProbeId, PathBuf>,
    pub probe_kilosort_dirs: BTreeMap<ProbeId, PathBuf>,
    pub bombcell_default_root: PathBuf,
    pub bombcell_np20_root: PathBuf,
    pub bombcell_singleprobe_root: PathBuf,
    pub probe_param_overrides: BTreeMap<ProbeId, ProbeOverrides>,
    pub mode_param_overrides: BTreeMap<RunMode, ModeOverrides>,
    pub custom_channel_map_notes: String,
    pub tip_end: TipEnd,
    pub parameter_preset: Option<String>,
    pub engine: Option<BridgeConfig>,
}

/// Convert string keys from the config file into typed keys, rejecting
/// anything unknown.
fn typed_keys<K, V>(raw: BTreeMap<String, V>) -> Result<BTreeMap<K, V>>
where
    K: FromStr<Err = QcError> + Ord,
{
    raw.into_iter()
        .map(|(key, value)| Ok((key.parse::<K>()?, value)))
        .collect()
}

impl Recording {
    /// Load the config at `path`, or from [`CONFIG_ENV_VAR`], or from
    /// [`DEFAULT_CONFIG_PATH`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => env::var(CONFIG_ENV_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };
        debug!("Loading recording config from {}", path.display());

        let raw = RecordingConfig::load(&path)?;
        let mut recording = Self::from_config(raw)?;
        recording.config_path = Some(path);
        Ok(recording)
    }

    /// Validate a parsed config and derive the recording layout.
    pub fn from_config(raw: RecordingConfig) -> Result<Self> {
        if raw.recording_name.trim().is_empty() || raw.recordings_root.trim().is_empty() {
            return Err(QcError::config(
                "Config must include non-empty 'recording_name' and 'recordings_root'.",
            ));
        }

        let recordings_root = PathBuf::from(&raw.recordings_root);
        let recording_root = recordings_root.join(&raw.recording_name);

        let mut probe_stream_names: BTreeMap<ProbeId, String> = ProbeId::ALL
            .iter()
            .map(|p| (*p, default_stream_name(*p).to_string()))
            .collect();
        probe_stream_names.extend(typed_keys::<ProbeId, _>(raw.probe_stream_names)?);

        let mut probe_regions: BTreeMap<ProbeId, String> = ProbeId::ALL
            .iter()
            .map(|p| (*p, default_brain_region(*p).to_string()))
            .collect();
        probe_regions.extend(typed_keys::<ProbeId, _>(raw.probe_brain_regions)?);

        let mut probe_recording_roi: BTreeMap<ProbeId, Option<f64>> =
            ProbeId::ALL.iter().map(|p| (*p, None)).collect();
        probe_recording_roi.extend(typed_keys::<ProbeId, _>(raw.probe_recording_roi)?);

        let np20_probes = match raw.np20_probes {
            Some(names) => names
                .iter()
                .map(|n| n.parse::<ProbeId>())
                .collect::<Result<Vec<_>>>()?,
            None => DEFAULT_NP20_PROBES.to_vec(),
        };

        let continuous_root = recording_root.join(
            raw.open_ephys_continuous_subpath
                .as_deref()
                .unwrap_or(DEFAULT_CONTINUOUS_SUBPATH),
        );
        let structure_oebin = recording_root.join(
            raw.structure_oebin_subpath
                .as_deref()
                .unwrap_or(DEFAULT_STRUCTURE_OEBIN_SUBPATH),
        );

        let probe_dirs: BTreeMap<ProbeId, PathBuf> = probe_stream_names
            .iter()
            .map(|(p, stream)| (*p, continuous_root.join(stream)))
            .collect();
        let continuous_dat_paths = probe_dirs
            .iter()
            .map(|(p, dir)| (*p, dir.join(CONTINUOUS_DAT_FILE)))
            .collect();
        let probe_kilosort_dirs = probe_dirs
            .iter()
            .map(|(p, dir)| (*p, dir.join(KILOSORT_DIR)))
            .collect();

        let probe_param_overrides = typed_keys::<ProbeId, _>(raw.probe_param_overrides)?
            .into_iter()
            .map(|(probe, block)| {
                Ok((
                    probe,
                    ProbeOverrides {
                        all_modes: block.all_modes,
                        modes: typed_keys(block.modes)?,
                    },
                ))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let mode_param_overrides = typed_keys::<RunMode, _>(raw.mode_param_overrides)?
            .into_iter()
            .map(|(mode, block)| {
                Ok((
                    mode,
                    ModeOverrides {
                        all: block.all,
                        probes: typed_keys(block.probes)?,
                    },
                ))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let tip_end = match raw.tip_position.as_deref() {
            Some(text) => text.parse::<TipEnd>()?,
            None => TipEnd::Min,
        };

        let bombcell_root = recording_root.join("bombcell");

        Ok(Self {
            config_path: None,
            recording_name: raw.recording_name,
            recordings_root,
            continuous_root,
            structure_oebin,
            probe_stream_names,
            probe_regions,
            probe_recording_roi,
            np20_probes,
            probe_dirs,
            continuous_dat_paths,
            probe_kilosort_dirs,
            bombcell_default_root: bombcell_root.join("bombcell_DEFAULT"),
            bombcell_np20_root: bombcell_root.join("bombcell_NP2.0"),
            bombcell_singleprobe_root: bombcell_root.join("bombcell_single_probe"),
            recording_root,
            probe_param_overrides,
            mode_param_overrides,
            custom_channel_map_notes: raw.custom_channel_map_notes,
            tip_end,
            parameter_preset: raw.parameter_preset,
            engine: raw.engine,
        })
    }

    /// Probes a mode operates on. `target` is required for single-probe runs.
    pub fn probes_for(&self, mode: RunMode, target: Option<&str>) -> Result<Vec<ProbeId>> {
        match mode {
            RunMode::SingleProbe => {
                let target = target.ok_or_else(|| {
                    QcError::config("--target-probe is required in single_probe mode")
                })?;
                Ok(vec![target.parse::<ProbeId>()?])
            }
            RunMode::Np20Rerun => Ok(self.np20_probes.clone()),
            RunMode::Batch => Ok(ProbeId::ALL.to_vec()),
        }
    }

    /// Where kilosort outputs are staged for a mode.
    pub fn staging_root(&self, mode: RunMode) -> &Path {
        match mode {
            RunMode::Batch => &self.bombcell_default_root,
            RunMode::Np20Rerun => &self.bombcell_np20_root,
            RunMode::SingleProbe => &self.bombcell_singleprobe_root,
        }
    }

    /// Where exported artifacts land for a mode.
    pub fn export_root(&self, mode: RunMode) -> PathBuf {
        match mode {
            RunMode::Batch => self.bombcell_default_root.join("batch_DEFAULT_results"),
            RunMode::Np20Rerun => self.bombcell_np20_root.join("NP2_ReRun_results"),
            RunMode::SingleProbe => self.bombcell_singleprobe_root.join("single_probe_results"),
        }
    }

    /// Build the record for one probe.
    pub fn probe_record(&self, probe: ProbeId) -> ProbeRecord {
        ProbeRecord {
            id: probe,
            kilosort_dir: self.probe_kilosort_dirs[&probe].clone(),
            raw_file: self.continuous_dat_paths[&probe].clone(),
            meta_file: self.structure_oebin.clone(),
            region: self
                .probe_regions
                .get(&probe)
                .cloned()
                .unwrap_or_else(|| "unknown region".to_string()),
            roi_boundary_um: self.probe_recording_roi.get(&probe).copied().flatten(),
        }
    }

    /// Source kilosort directories for staging.
    pub fn source_dirs(&self) -> &BTreeMap<ProbeId, PathBuf> {
        &self.probe_kilosort_dirs
    }
}
