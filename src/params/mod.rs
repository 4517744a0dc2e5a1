//! Analysis parameters
//!
//! This module provides:
//! - `ParameterSet`, the resolved per-(probe, mode) parameters
//! - Tiered override layers and the deep-merge resolver
//! - Override collection from the recording config and the command line
//! - Built-in presets
//! - Engine-echoed values and their JSON-safe conversion

pub mod merge;
pub mod overrides;
pub mod presets;
mod set;
pub mod value;

pub use merge::{deep_merge, merge_layers, tiered_layers, OverrideLayer, ParameterResolver, Tier};
pub use overrides::{build_layers, parse_assignments, probe_mode_layers};
pub use presets::Preset;
pub use set::ParameterSet;
pub use value::{params_from_json, params_to_json, to_jsonable, EngineParams, ParamValue};
