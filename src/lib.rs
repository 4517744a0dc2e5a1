//! Probe QC - quality-control orchestration for multi-probe recordings
//!
//! Stages kilosort outputs, resolves per-probe analysis parameters, drives an
//! external quality-metrics engine probe by probe, labels units against a
//! region of interest along the shank, and exports per-probe and batch
//! summaries.
//!
//! # Pipeline
//!
//! config -> staging -> batch (params -> engine -> geometry) -> export
//!
//! A probe that fails anywhere after staging is recorded and reported; the
//! others still run.

pub mod batch;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod geometry;
pub mod metrics;
pub mod params;
pub mod staging;

pub use error::{QcError, Result};
