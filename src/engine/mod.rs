//! Metrics engine
//!
//! The batch runner drives any [`MetricsEngine`]:
//! - [`BridgeEngine`] talks JSON to an external process
//! - [`MockEngine`] returns deterministic output for tests and dry runs

pub mod bridge;
pub mod mock;
pub mod model;

pub use bridge::{BridgeConfig, BridgeEngine};
pub use mock::MockEngine;
pub use model::{EngineOutput, EngineRequest, MetricsEngine};
