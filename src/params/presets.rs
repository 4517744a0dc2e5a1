//! Built-in parameter presets
//!
//! A preset is a base parameter block plus per-probe and per-mode
//! adjustments. The thresholds below are tuned for ~155 minute Open Ephys
//! Neuropixels sessions on the six-probe rig.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::config::{ProbeId, RunMode};
use crate::error::{QcError, Result};
use crate::params::merge::{OverrideLayer, ParameterResolver, Tier};
use crate::params::set::ParameterSet;

pub const OPENEPHYS_155MIN: &str = "155min_openephys";

#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub name: String,
    pub base: Map<String, Value>,
    pub probes: BTreeMap<ProbeId, Map<String, Value>>,
    pub modes: BTreeMap<RunMode, Map<String, Value>>,
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl Preset {
    /// Look a preset up by name.
    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            OPENEPHYS_155MIN => Ok(Self::openephys_155min()),
            other => Err(QcError::config(format!(
                "Unknown parameter preset '{}'. Available: {}",
                other, OPENEPHYS_155MIN
            ))),
        }
    }

    pub fn openephys_155min() -> Self {
        let base = object(json!({
            // Computation toggles
            "extractRaw": true,
            "reextractRaw": false,
            "nRawSpikesToExtract": 2000,
            "spikeWidth": 61,
            "waveformBaselineNoiseWindow": 10,

            // Stability over long sessions
            "computeDrift": true,
            "driftBinSize": 60,
            "computeTimeChunks": true,
            "deltaTimeChunk": 120,
            "presenceRatioBinSize": 120,

            // Refractory-period violations
            "hillOrLlobetMethod": 1,
            "tauR_valuesMin": 0.0015,
            "tauR_valuesMax": 0.0020,
            "tauR_valuesStep": 0.0001,
            "tauC": 0.0005,

            // Waveform shape and noise gates
            "minThreshDetectPeaksTroughs": 0.2,
            "maxNPeaks": 2,
            "maxNTroughs": 1,
            "minWvDuration": 150,
            "maxWvDuration": 850,
            "spDecayLinFit": false,
            "normalizeSpDecay": true,
            "minSpatialDecaySlopeExp": -0.004,
            "maxSpatialDecaySlopeExp": -0.0005,
            "maxWvBaselineFraction": 0.30,
            "maxScndPeakToTroughRatio_noise": 0.80,

            // Non-somatic gates
            "maxPeak1ToPeak2Ratio_nonSomatic": 3.0,
            "maxMainPeakToTroughRatio_nonSomatic": 3.0,
            "somatic": true,

            // Multi-unit and quality gates
            "minNumSpikes": 500,
            "maxPercSpikesMissing": 0.25,
            "maxRPVviolations": 0.10,
            "minPresenceRatio": 0.90,
            "maxDrift": 80,
            "minAmplitude": 40,
            "minSNR": 3.5,

            // Isolation metrics
            "computeDistanceMetrics": true,
            "nChannelsIsoDist": 8,
            "isoDmin": 20,
            "lratioMax": 0.20,
            "ssMin": 0.10
        }));

        let probes = BTreeMap::from([
            // NP2.0 simplex lobule / interposed nucleus
            (
                ProbeId::A,
                object(json!({
                    "maxNPeaks": 4,
                    "maxNTroughs": 3,
                    "minWvDuration": 120,
                    "maxWvDuration": 1400,
                    "maxWvBaselineFraction": 0.40,
                    "minAmplitude": 35,
                    "minSNR": 3.0,
                    "minPresenceRatio": 0.92,
                    "maxDrift": 70,
                    "nChannelsIsoDist": 8
                })),
            ),
            // NP1.0 pontine gray
            (
                ProbeId::B,
                object(json!({
                    "minAmplitude": 35,
                    "minSNR": 3.0,
                    "maxDrift": 110,
                    "minPresenceRatio": 0.88,
                    "maxRPVviolations": 0.08,
                    "deltaTimeChunk": 180,
                    "nChannelsIsoDist": 8
                })),
            ),
            // NP2.0 motor cortex
            (
                ProbeId::C,
                object(json!({
                    "minAmplitude": 45,
                    "minSNR": 4.0,
                    "maxPercSpikesMissing": 0.20,
                    "minPresenceRatio": 0.93,
                    "maxDrift": 60,
                    "maxRPVviolations": 0.08,
                    "nChannelsIsoDist": 6
                })),
            ),
            // NP2.0 VA/VL thalamus
            (
                ProbeId::D,
                object(json!({
                    "minNumSpikes": 300,
                    "minAmplitude": 40,
                    "minSNR": 3.5,
                    "minPresenceRatio": 0.92,
                    "maxDrift": 70,
                    "maxRPVviolations": 0.10,
                    "nChannelsIsoDist": 4
                })),
            ),
            // NP1.0 substantia nigra pars reticulata
            (
                ProbeId::E,
                object(json!({
                    "minAmplitude": 35,
                    "minSNR": 3.0,
                    "maxRPVviolations": 0.06,
                    "maxPercSpikesMissing": 0.22,
                    "minPresenceRatio": 0.88,
                    "maxDrift": 110,
                    "nChannelsIsoDist": 8
                })),
            ),
            // NP1.0 red nucleus
            (
                ProbeId::F,
                object(json!({
                    "minAmplitude": 35,
                    "minSNR": 3.0,
                    "minPresenceRatio": 0.88,
                    "maxDrift": 120,
                    "maxRPVviolations": 0.08,
                    "nChannelsIsoDist": 8
                })),
            ),
        ]);

        // Mode differences are mostly I/O; thresholds stay shared.
        let modes = RunMode::ALL.iter().map(|m| (*m, Map::new())).collect();

        Self {
            name: OPENEPHYS_155MIN.to_string(),
            base,
            probes,
            modes,
        }
    }

    /// The preset's contribution to each tier for one (probe, mode).
    pub fn layers(&self, probe: ProbeId, mode: RunMode) -> Vec<OverrideLayer> {
        let mut layers = vec![OverrideLayer::new(
            Tier::Base,
            format!("preset:{}", self.name),
            self.base.clone(),
        )];
        if let Some(values) = self.modes.get(&mode) {
            layers.push(OverrideLayer::new(
                Tier::Mode,
                format!("preset:{}:{}", self.name, mode),
                values.clone(),
            ));
        }
        if let Some(values) = self.probes.get(&probe) {
            layers.push(OverrideLayer::new(
                Tier::ProbeMode,
                format!("preset:{}:{}", self.name, probe),
                values.clone(),
            ));
        }
        layers
    }

    /// Resolver registered with exactly this preset's probes and modes.
    pub fn resolver(&self) -> ParameterResolver {
        ParameterResolver::new(self.probes.keys().copied(), self.modes.keys().copied())
    }

    /// Preset parameters for one probe and mode, with caller overrides on top.
    pub fn params(
        &self,
        probe: &str,
        mode: &str,
        user: Option<&Map<String, Value>>,
    ) -> Result<ParameterSet> {
        let probe = probe.parse::<ProbeId>()?;
        let mode = mode.parse::<RunMode>()?;
        let mut layers = self.layers(probe, mode);
        if let Some(user) = user {
            layers.push(OverrideLayer::new(Tier::User, "user", user.clone()));
        }
        self.resolver().resolve(probe, mode, &layers)
    }
}
