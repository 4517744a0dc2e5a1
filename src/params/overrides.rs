//! Override layers collected from the recording config

use serde_json::{Map, Value};

use crate::config::{ProbeId, Recording, RunMode};
use crate::error::{QcError, Result};
use crate::params::merge::{OverrideLayer, Tier};
use crate::params::presets::Preset;

/// Config-file overrides for one (probe, mode), lowest precedence first.
///
/// Mode-wide values land in [`Tier::Mode`]; the mode's per-probe block and
/// the probe's own blocks land in [`Tier::ProbeMode`].
pub fn probe_mode_layers(recording: &Recording, probe: ProbeId, mode: RunMode) -> Vec<OverrideLayer> {
    let mut layers = Vec::new();

    if let Some(mode_cfg) = recording.mode_param_overrides.get(&mode) {
        layers.push(OverrideLayer::new(
            Tier::Mode,
            format!("mode_param_overrides.{}.all", mode),
            mode_cfg.all.clone(),
        ));
        if let Some(values) = mode_cfg.probes.get(&probe) {
            layers.push(OverrideLayer::new(
                Tier::ProbeMode,
                format!("mode_param_overrides.{}.probes.{}", mode, probe),
                values.clone(),
            ));
        }
    }

    if let Some(probe_cfg) = recording.probe_param_overrides.get(&probe) {
        layers.push(OverrideLayer::new(
            Tier::ProbeMode,
            format!("probe_param_overrides.{}.all_modes", probe),
            probe_cfg.all_modes.clone(),
        ));
        if let Some(values) = probe_cfg.modes.get(&mode) {
            layers.push(OverrideLayer::new(
                Tier::ProbeMode,
                format!("probe_param_overrides.{}.modes.{}", probe, mode),
                values.clone(),
            ));
        }
    }

    layers.retain(|layer| !layer.is_empty());
    layers
}

/// Every non-engine layer for one probe: preset, config, then user values.
///
/// Engine defaults are added by the batch runner once the probe is staged.
pub fn build_layers(
    recording: &Recording,
    preset: Option<&Preset>,
    probe: ProbeId,
    mode: RunMode,
    user: &Map<String, Value>,
) -> Vec<OverrideLayer> {
    let mut layers = preset
        .map(|p| p.layers(probe, mode))
        .unwrap_or_default();
    layers.extend(probe_mode_layers(recording, probe, mode));
    if !user.is_empty() {
        layers.push(OverrideLayer::new(Tier::User, "user", user.clone()));
    }
    layers
}

/// Parse `key=value` assignments from the command line.
///
/// Values are read as JSON when they parse (`3.5`, `true`, `[1,2]`), else
/// kept as plain strings. Dotted keys address nested mappings.
pub fn parse_assignments(assignments: &[String]) -> Result<Map<String, Value>> {
    let mut user = Map::new();
    for assignment in assignments {
        let (key, raw) = assignment.split_once('=').ok_or_else(|| {
            QcError::config(format!("Expected key=value override, got '{}'", assignment))
        })?;
        let key = key.trim();
        if key.is_empty() || key.split('.').any(str::is_empty) {
            return Err(QcError::config(format!(
                "Empty key in override '{}'",
                assignment
            )));
        }
        let value = serde_json::from_str(raw.trim())
            .unwrap_or_else(|_| Value::String(raw.trim().to_string()));

        let mut parts: Vec<&str> = key.split('.').collect();
        let leaf = parts.pop().unwrap_or(key);
        let mut target = &mut user;
        for part in parts {
            let slot = target
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            target = match slot {
                Value::Object(map) => map,
                _ => {
                    return Err(QcError::config(format!(
                        "Override '{}' nests under non-mapping key '{}'",
                        assignment, part
                    )))
                }
            };
        }
        target.insert(leaf.to_string(), value);
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingConfig;
    use crate::params::merge::{merge_layers, OverrideLayer};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn recording() -> Recording {
        let raw: RecordingConfig = serde_json::from_value(json!({
            "recording_name": "s",
            "recordings_root": "/r",
            "mode_param_overrides": {
                "np20_rerun": {
                    "all": { "maxDrift": 100, "minSNR": 2.0 },
                    "probes": { "C": { "maxDrift": 90 } }
                }
            },
            "probe_param_overrides": {
                "C": {
                    "all_modes": { "maxDrift": 80, "minAmplitude": 30 },
                    "modes": { "np20_rerun": { "maxDrift": 70 } }
                }
            }
        }))
        .unwrap();
        Recording::from_config(raw).unwrap()
    }

    #[test]
    fn test_config_layer_order() {
        let rec = recording();
        let layers = probe_mode_layers(&rec, ProbeId::C, RunMode::Np20Rerun);
        let names: Vec<&str> = layers.iter().map(|l| l.name.as_str()).collect();

        assert_eq!(
            names,
            vec![
                "mode_param_overrides.np20_rerun.all",
                "mode_param_overrides.np20_rerun.probes.C",
                "probe_param_overrides.C.all_modes",
                "probe_param_overrides.C.modes.np20_rerun",
            ]
        );

        let merged = merge_layers(&layers);
        assert_eq!(merged.get_f64("maxDrift"), Some(70.0));
        assert_eq!(merged.get_f64("minAmplitude"), Some(30.0));
        assert_eq!(merged.get_f64("minSNR"), Some(2.0));
    }

    #[test]
    fn test_other_mode_ignores_mode_blocks() {
        let rec = recording();
        let merged = merge_layers(&probe_mode_layers(&rec, ProbeId::C, RunMode::Batch));
        assert_eq!(merged.get_f64("maxDrift"), Some(80.0));
        assert_eq!(merged.get("minSNR"), None);
    }

    #[test]
    fn test_user_layer_wins_over_preset_and_config() {
        let rec = recording();
        let preset = Preset::openephys_155min();
        let user = parse_assignments(&["maxDrift=55".to_string()]).unwrap();
        let mut layers = vec![OverrideLayer::new(
            Tier::Base,
            "engine",
            json!({ "maxDrift": 1, "ephys_sample_rate": 30000 })
                .as_object()
                .unwrap()
                .clone(),
        )];
        layers.extend(build_layers(&rec, Some(&preset), ProbeId::C, RunMode::Np20Rerun, &user));

        let merged = merge_layers(&layers);
        assert_eq!(merged.get_f64("maxDrift"), Some(55.0));
        assert_eq!(merged.get_f64("ephys_sample_rate"), Some(30000.0));
        // config probe block beats the preset probe block
        assert_eq!(merged.get_f64("minAmplitude"), Some(30.0));
    }

    #[test]
    fn test_parse_assignments() {
        let user = parse_assignments(&[
            "minSNR=4.5".to_string(),
            "computeDrift=false".to_string(),
            "note=long session".to_string(),
            "drift.binSize=30".to_string(),
        ])
        .unwrap();

        assert_eq!(
            Value::Object(user),
            json!({
                "minSNR": 4.5,
                "computeDrift": false,
                "note": "long session",
                "drift": { "binSize": 30 }
            })
        );
    }

    #[test]
    fn test_parse_assignments_rejects_bare_words() {
        assert!(parse_assignments(&["minSNR".to_string()]).is_err());
        assert!(parse_assignments(&["=3".to_string()]).is_err());
        assert!(parse_assignments(&["a..b=3".to_string()]).is_err());
    }
}
