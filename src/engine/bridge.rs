//! Subprocess bridge to the external metrics engine
//!
//! The engine runs in its own process (typically a small Python script around
//! the quality-metrics library). Each call starts the configured command,
//! writes one JSON request to its stdin and reads one JSON response from its
//! stdout.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Instant;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::model::{EngineOutput, EngineRequest, MetricsEngine};
use crate::error::{QcError, Result};
use crate::metrics::UnitMetrics;
use crate::params::{params_from_json, ParameterSet};

/// How much of the child's stderr to keep in error messages.
const STDERR_TAIL_LINES: usize = 20;

fn default_kilosort_version() -> u32 {
    4
}

/// Bridge command as written in the recording config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_kilosort_version")]
    pub kilosort_version: u32,
}

/// Request sent to the bridge
#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    action: &'a str,
    probe: Option<&'a str>,
    ks_dir: String,
    save_path: Option<String>,
    raw_file: String,
    meta_file: String,
    kilosort_version: u32,
    param: Option<&'a ParameterSet>,
}

/// Response from the bridge
#[derive(Debug, Deserialize)]
struct BridgeResponse {
    success: bool,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    param: Map<String, Value>,
    #[serde(default)]
    quality_metrics: Option<Map<String, Value>>,
    #[serde(default)]
    unit_type_string: Vec<String>,
}

/// Metrics engine reached through a subprocess.
#[derive(Debug, Clone)]
pub struct BridgeEngine {
    config: BridgeConfig,
}

impl BridgeEngine {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn send_request(&self, request: &BridgeRequest<'_>) -> Result<BridgeResponse> {
        let payload = serde_json::to_vec(request)?;
        let start = Instant::now();

        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| QcError::Engine {
                reason: format!("cannot start '{}': {}", self.config.command, e),
            })?;

        // Feed stdin from a separate thread so a chatty child cannot block us.
        let writer = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || stdin.write_all(&payload))
        });

        let output = child.wait_with_output()?;
        if let Some(writer) = writer {
            match writer.join() {
                Ok(Err(e)) => warn!("Bridge closed stdin early: {}", e),
                Err(_) => warn!("Bridge stdin writer panicked"),
                Ok(Ok(())) => {}
            }
        }
        debug!(
            "Bridge '{}' ({}) finished in {} ms",
            self.config.command,
            request.action,
            start.elapsed().as_millis()
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            return Err(QcError::Engine {
                reason: format!("bridge exited with {}: {}", output.status, tail),
            });
        }

        let response: BridgeResponse =
            serde_json::from_slice(&output.stdout).map_err(|e| QcError::Engine {
                reason: format!("invalid response from bridge: {}", e),
            })?;

        if !response.success {
            return Err(QcError::Engine {
                reason: response
                    .error_message
                    .unwrap_or_else(|| "unknown engine error".to_string()),
            });
        }
        Ok(response)
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl MetricsEngine for BridgeEngine {
    fn name(&self) -> &str {
        "bridge"
    }

    fn default_parameters(
        &self,
        ks_dir: &Path,
        raw_file: &Path,
        meta_file: &Path,
    ) -> Result<ParameterSet> {
        let request = BridgeRequest {
            action: "defaults",
            probe: None,
            ks_dir: path_string(ks_dir),
            save_path: None,
            raw_file: path_string(raw_file),
            meta_file: path_string(meta_file),
            kilosort_version: self.config.kilosort_version,
            param: None,
        };
        let response = self.send_request(&request)?;
        Ok(ParameterSet::from_map(response.param))
    }

    fn run(&self, request: &EngineRequest<'_>) -> Result<EngineOutput> {
        let bridge_request = BridgeRequest {
            action: "run",
            probe: Some(request.probe.as_str()),
            ks_dir: path_string(request.ks_dir),
            save_path: Some(path_string(request.save_path)),
            raw_file: path_string(request.raw_file),
            meta_file: path_string(request.meta_file),
            kilosort_version: self.config.kilosort_version,
            param: Some(request.params),
        };
        let response = self.send_request(&bridge_request)?;

        let metrics = response
            .quality_metrics
            .as_ref()
            .ok_or_else(|| QcError::Engine {
                reason: "bridge response has no quality_metrics".to_string(),
            })
            .and_then(UnitMetrics::from_column_map)?;

        Ok(EngineOutput {
            metrics,
            params: params_from_json(&response.param),
            unit_types: response.unit_type_string,
        })
    }
}
