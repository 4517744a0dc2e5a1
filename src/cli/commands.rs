//! CLI Command Implementations
//!
//! Wires config, staging, the batch runner and export into one pipeline.

use std::path::PathBuf;

use log::info;

use crate::batch::{BatchRunner, ProbeJob};
use crate::cli::Cli;
use crate::config::{Recording, RunMode};
use crate::engine::{BridgeEngine, MetricsEngine, MockEngine};
use crate::error::{QcError, Result};
use crate::export::{export_results, ExportReport, RunManifest};
use crate::geometry::{GeometrySource, KilosortGeometry};
use crate::params::{build_layers, parse_assignments, ParameterResolver, Preset};
use crate::staging::stage;

/// Options for one pipeline run, independent of how they were parsed.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    pub target_probe: Option<String>,
    pub overwrite: bool,
    /// `key=value` parameter overrides
    pub overrides: Vec<String>,
}

impl From<&Cli> for RunOptions {
    fn from(cli: &Cli) -> Self {
        Self {
            mode: cli.mode.into(),
            target_probe: cli.target_probe.clone(),
            overwrite: cli.overwrite,
            overrides: cli.set.clone(),
        }
    }
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub export: ExportReport,
    pub manifest_path: PathBuf,
}

/// Load the config, pick an engine and run the whole pipeline.
pub fn run_pipeline(cli: &Cli) -> Result<PipelineOutcome> {
    let recording = Recording::load(cli.config.as_deref())?;
    let options = RunOptions::from(cli);

    let engine: Box<dyn MetricsEngine> = if cli.mock_engine {
        Box::new(MockEngine::new())
    } else {
        let bridge = recording.engine.clone().ok_or_else(|| {
            QcError::config("Config has no 'engine' section; add one or pass --mock-engine")
        })?;
        Box::new(BridgeEngine::new(bridge))
    };

    let outcome = run_with(&recording, &options, engine.as_ref(), &KilosortGeometry)?;

    for (probe, export) in &outcome.export.probes {
        match &export.error {
            Some(error) => println!("  {} {}: {}", probe.label(), export.status, error),
            None => println!("  {} {}", probe.label(), export.status),
        }
    }
    println!("Export complete: {}", outcome.export.output_root.display());
    Ok(outcome)
}

/// Run the pipeline for a loaded recording with the given collaborators.
///
/// Configuration and staging errors abort; per-probe problems end up in the
/// export report.
pub fn run_with(
    recording: &Recording,
    options: &RunOptions,
    engine: &dyn MetricsEngine,
    geometry: &dyn GeometrySource,
) -> Result<PipelineOutcome> {
    let mode = options.mode;
    let probes = recording.probes_for(mode, options.target_probe.as_deref())?;
    let user = parse_assignments(&options.overrides)?;
    let preset = recording
        .parameter_preset
        .as_deref()
        .map(Preset::by_name)
        .transpose()?;

    info!("Recording: {}", recording.recording_name);
    info!("Mode: {} ({})", mode, mode.description());
    info!(
        "Probes: {}",
        probes.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ")
    );
    info!("Engine: {}", engine.name());
    if let Some(preset) = &preset {
        info!("Parameter preset: {}", preset.name);
    }
    if !user.is_empty() {
        info!("Command-line overrides: {}", serde_json::Value::Object(user.clone()));
    }

    let mut manifest = RunManifest::begin(&recording.recording_name, mode, engine.name())
        .with_config_path(recording.config_path.as_deref());

    let resolver = ParameterResolver::all();
    for &probe in &probes {
        resolver.check_registered(probe, mode)?;
    }

    let mut staged = stage(
        recording.source_dirs(),
        recording.staging_root(mode),
        &probes,
        options.overwrite,
    )?;

    let mut jobs = Vec::with_capacity(probes.len());
    for &probe in &probes {
        let staged_dir = staged.remove(&probe).ok_or_else(|| QcError::MissingSource {
            probe: probe.to_string(),
            path: recording.staging_root(mode).to_path_buf(),
        })?;
        jobs.push(ProbeJob {
            record: recording.probe_record(probe),
            staged_dir,
            layers: build_layers(recording, preset.as_ref(), probe, mode, &user),
        });
    }

    let runner = BatchRunner::new(engine, geometry, mode)
        .with_resolver(resolver)
        .with_tip_end(recording.tip_end);
    let results = runner.run(&jobs)?;

    let export_root = recording.export_root(mode);
    let export = export_results(&results, &export_root, &probes, options.overwrite)?;

    manifest.finish(&export)?;
    let manifest_path = manifest.save(&export_root)?;
    info!("Run {} recorded in {}", manifest.run_id, manifest_path.display());

    Ok(PipelineOutcome {
        export,
        manifest_path,
    })
}
