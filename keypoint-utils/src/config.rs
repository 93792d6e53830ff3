//! Persisted settings for the keypoint pipeline.
//!
//! Settings are stored as JSON. Every section uses `#[serde(default)]` so a partial file only
//! overrides the fields it names.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Default model location, relative to the working directory.
pub const DEFAULT_MODEL_PATH: &str = "models/superpoint.onnx";

/// Heatmap decoding parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecoderSettings {
    /// Edge length of the coarse cell each heatmap position covers.
    pub cell_size: usize,
    /// Confidence a reconstructed pixel must strictly exceed to become a keypoint.
    pub confidence_threshold: f32,
    /// Decode heatmap rows on the rayon thread pool.
    pub parallel: bool,
    /// Name of the heatmap output; the first model output is used when unset.
    pub heatmap_output: Option<String>,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            cell_size: 8,
            confidence_threshold: 0.015,
            parallel: false,
            heatmap_output: None,
        }
    }
}

/// Settings controlling stage timing logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Whether timing logs are emitted.
    pub enabled: bool,
    /// Logging level for timing output (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "debug".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Resolve the configured level string, defaulting to `Debug` for unknown values.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Debug,
        }
    }

    /// Push these settings into the global telemetry switches.
    pub fn apply(&self) {
        crate::telemetry::configure(self.enabled, self.level_filter());
    }
}

/// Where run reports are written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportSettings {
    /// Write a JSON report after every pipeline run.
    pub enabled: bool,
    /// Directory receiving timestamped report files.
    pub output_dir: PathBuf,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: PathBuf::from("reports"),
        }
    }
}

/// Top-level settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Path of the keypoint ONNX model.
    pub model_path: Option<String>,
    /// Inference backend selector (`optimized`, `cpu`, `decluttered`, `reference`).
    pub execution_provider: String,
    /// Heatmap decoding parameters.
    pub decoder: DecoderSettings,
    /// Timing log preferences.
    pub telemetry: TelemetrySettings,
    /// Run report output.
    pub report: ReportSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            model_path: Some(DEFAULT_MODEL_PATH.to_string()),
            execution_provider: "optimized".to_string(),
            decoder: DecoderSettings::default(),
            telemetry: TelemetrySettings::default(),
            report: ReportSettings::default(),
        }
    }
}

impl AppSettings {
    /// Load settings from a JSON file, filling a missing `model_path` with the default.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let mut settings: AppSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;

        if settings.model_path.is_none() {
            settings.model_path = Some(DEFAULT_MODEL_PATH.to_string());
        }
        anyhow::ensure!(
            settings.decoder.cell_size > 0,
            "decoder.cell_size must be greater than zero in {}",
            path.display()
        );

        Ok(settings)
    }

    /// Write settings as pretty-printed JSON, overwriting any existing file.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }

    /// The configured model path, or the default one.
    pub fn resolved_model_path(&self) -> PathBuf {
        PathBuf::from(self.model_path.as_deref().unwrap_or(DEFAULT_MODEL_PATH))
    }
}
