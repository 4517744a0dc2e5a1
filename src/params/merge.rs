//! Tiered override merging
//!
//! Parameters are resolved from an ordered list of [`OverrideLayer`]s. Each
//! layer belongs to a [`Tier`]; layers are applied lowest tier first and, within
//! a tier, in the order given. Every application is a deep merge.

use std::collections::BTreeSet;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{ProbeId, RunMode};
use crate::error::{QcError, Result};
use crate::params::set::ParameterSet;

/// Precedence tiers, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Engine defaults and preset base values
    Base,
    /// Applies to every probe in a mode
    Mode,
    /// Applies to one probe in one mode
    ProbeMode,
    /// Supplied by the caller for this run
    User,
}

/// A partial parameter mapping scoped to one tier.
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideLayer {
    pub tier: Tier,
    /// Where the layer came from, for logs.
    pub name: String,
    pub values: Map<String, Value>,
}

impl OverrideLayer {
    pub fn new(tier: Tier, name: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            tier,
            name: name.into(),
            values,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Merge `src` into `dst`.
///
/// Nested mappings present on both sides merge recursively; any other value
/// in `src` replaces the one in `dst` outright.
pub fn deep_merge(dst: &mut Map<String, Value>, src: &Map<String, Value>) {
    for (key, value) in src {
        if let (Some(Value::Object(existing)), Value::Object(incoming)) = (dst.get_mut(key), value)
        {
            deep_merge(existing, incoming);
            continue;
        }
        dst.insert(key.clone(), value.clone());
    }
}

/// Fold layers into one mapping in precedence order.
///
/// The sort is stable, so layers sharing a tier keep their given order.
pub fn merge_layers(layers: &[OverrideLayer]) -> ParameterSet {
    let mut ordered: Vec<&OverrideLayer> = layers.iter().collect();
    ordered.sort_by_key(|layer| layer.tier);

    let merged = ordered.into_iter().fold(Map::new(), |mut acc, layer| {
        deep_merge(&mut acc, &layer.values);
        acc
    });
    ParameterSet::from_map(merged)
}

/// Resolves parameter sets for registered probes and modes.
#[derive(Debug, Clone)]
pub struct ParameterResolver {
    probes: BTreeSet<ProbeId>,
    modes: BTreeSet<RunMode>,
}

impl ParameterResolver {
    pub fn new(
        probes: impl IntoIterator<Item = ProbeId>,
        modes: impl IntoIterator<Item = RunMode>,
    ) -> Self {
        Self {
            probes: probes.into_iter().collect(),
            modes: modes.into_iter().collect(),
        }
    }

    /// Resolver accepting every probe slot and every mode.
    pub fn all() -> Self {
        Self::new(ProbeId::ALL, RunMode::ALL)
    }

    pub fn is_registered(&self, probe: ProbeId, mode: RunMode) -> bool {
        self.probes.contains(&probe) && self.modes.contains(&mode)
    }

    /// Configuration error naming the unregistered probe or mode, if any.
    pub fn check_registered(&self, probe: ProbeId, mode: RunMode) -> Result<()> {
        if !self.probes.contains(&probe) {
            return Err(QcError::config(format!(
                "Unknown probe_id={}. Expected one of: {}",
                probe,
                join(self.probes.iter().map(ProbeId::as_str))
            )));
        }
        if !self.modes.contains(&mode) {
            return Err(QcError::config(format!(
                "Unknown mode={}. Expected one of: {}",
                mode,
                join(self.modes.iter().map(RunMode::as_str))
            )));
        }
        Ok(())
    }

    /// Resolve the parameters for one (probe, mode) pair.
    ///
    /// Fails before merging anything when the probe or mode is unregistered.
    pub fn resolve(
        &self,
        probe: ProbeId,
        mode: RunMode,
        layers: &[OverrideLayer],
    ) -> Result<ParameterSet> {
        self.check_registered(probe, mode)?;

        for layer in layers.iter().filter(|l| !l.is_empty()) {
            debug!(
                "Probe {} [{}] layer {:?}/{}: {} keys",
                probe,
                mode,
                layer.tier,
                layer.name,
                layer.values.len()
            );
        }
        Ok(merge_layers(layers))
    }

    /// Same as [`resolve`](Self::resolve), parsing probe and mode names first.
    pub fn resolve_named(
        &self,
        probe: &str,
        mode: &str,
        layers: &[OverrideLayer],
    ) -> Result<ParameterSet> {
        let probe = probe.parse::<ProbeId>()?;
        let mode = mode.parse::<RunMode>()?;
        self.resolve(probe, mode, layers)
    }
}

impl Default for ParameterResolver {
    fn default() -> Self {
        Self::all()
    }
}

fn join<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}

/// Build the four-tier layer list from one mapping per tier.
pub fn tiered_layers(
    base: &Map<String, Value>,
    mode: &Map<String, Value>,
    probe_mode: &Map<String, Value>,
    user: &Map<String, Value>,
) -> Vec<OverrideLayer> {
    vec![
        OverrideLayer::new(Tier::Base, "base", base.clone()),
        OverrideLayer::new(Tier::Mode, "mode", mode.clone()),
        OverrideLayer::new(Tier::ProbeMode, "probe_mode", probe_mode.clone()),
        OverrideLayer::new(Tier::User, "user", user.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_deep_merge_recurses_into_mappings() {
        let mut dst = obj(json!({ "drift": { "binSize": 60, "max": 80 }, "minSNR": 3.5 }));
        let src = obj(json!({ "drift": { "max": 70 }, "extra": true }));
        deep_merge(&mut dst, &src);

        assert_eq!(
            Value::Object(dst),
            json!({ "drift": { "binSize": 60, "max": 70 }, "minSNR": 3.5, "extra": true })
        );
    }

    #[test]
    fn test_sequences_replace_wholesale() {
        let mut dst = obj(json!({ "tauR": [0.0015, 0.002, 0.0001] }));
        deep_merge(&mut dst, &obj(json!({ "tauR": [0.001] })));
        assert_eq!(dst["tauR"], json!([0.001]));
    }

    #[test]
    fn test_scalar_replaces_mapping() {
        let mut dst = obj(json!({ "drift": { "max": 80 } }));
        deep_merge(&mut dst, &obj(json!({ "drift": false })));
        assert_eq!(dst["drift"], json!(false));
    }

    #[test]
    fn test_tier_precedence() {
        let layers = tiered_layers(
            &obj(json!({ "a": 1, "b": 1, "c": 1, "d": 1 })),
            &obj(json!({ "b": 2, "c": 2, "d": 2 })),
            &obj(json!({ "c": 3, "d": 3 })),
            &obj(json!({ "d": 4 })),
        );
        let resolved = ParameterResolver::all()
            .resolve(ProbeId::A, RunMode::Batch, &layers)
            .unwrap();

        assert_eq!(
            Value::Object(resolved.into_map()),
            json!({ "a": 1, "b": 2, "c": 3, "d": 4 })
        );
    }

    #[test]
    fn test_layer_order_is_by_tier_not_position() {
        let layers = vec![
            OverrideLayer::new(Tier::User, "user", obj(json!({ "minSNR": 5.0 }))),
            OverrideLayer::new(Tier::Base, "base", obj(json!({ "minSNR": 3.0 }))),
            OverrideLayer::new(Tier::Mode, "mode", obj(json!({ "minSNR": 4.0 }))),
        ];
        assert_eq!(merge_layers(&layers).get_f64("minSNR"), Some(5.0));
    }

    #[test]
    fn test_same_tier_keeps_insertion_order() {
        let layers = vec![
            OverrideLayer::new(Tier::ProbeMode, "first", obj(json!({ "maxDrift": 1 }))),
            OverrideLayer::new(Tier::ProbeMode, "second", obj(json!({ "maxDrift": 2 }))),
        ];
        assert_eq!(merge_layers(&layers).get_f64("maxDrift"), Some(2.0));
    }

    #[test]
    fn test_stepwise_equals_single_pass() {
        let layers = tiered_layers(
            &obj(json!({ "x": { "p": 1, "q": 1 }, "y": 1 })),
            &obj(json!({ "x": { "q": 2 } })),
            &obj(json!({ "x": { "r": 3 }, "y": [3] })),
            &obj(json!({ "z": "user" })),
        );

        let mut stepwise = Map::new();
        for layer in &layers {
            deep_merge(&mut stepwise, &layer.values);
        }
        assert_eq!(merge_layers(&layers).into_map(), stepwise);
    }

    #[test]
    fn test_resolve_is_pure() {
        let layers = tiered_layers(
            &obj(json!({ "x": { "p": 1 } })),
            &obj(json!({ "x": { "q": 2 } })),
            &Map::new(),
            &obj(json!({ "x": { "p": 9 } })),
        );
        let snapshot = layers.clone();
        let resolver = ParameterResolver::all();

        let first = resolver.resolve(ProbeId::B, RunMode::Batch, &layers).unwrap();
        let second = resolver.resolve(ProbeId::B, RunMode::Batch, &layers).unwrap();

        assert_eq!(first, second);
        assert_eq!(layers, snapshot);
    }

    #[test]
    fn test_unregistered_probe_fails_fast() {
        let resolver = ParameterResolver::new([ProbeId::A, ProbeId::C], RunMode::ALL);
        let err = resolver
            .resolve(ProbeId::B, RunMode::Batch, &[])
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION");
    }

    #[test]
    fn test_unregistered_mode_fails_fast() {
        let resolver = ParameterResolver::new(ProbeId::ALL, [RunMode::Batch]);
        assert!(resolver
            .resolve(ProbeId::A, RunMode::SingleProbe, &[])
            .is_err());
        assert!(resolver.resolve_named("a", "nightly", &[]).is_err());
        assert!(resolver.resolve_named("a", "batch", &[]).is_ok());
    }
}
