//! Run reports and the sinks that persist them.

use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use keypoint_utils::{SystemInfo, duration_to_ms};
use log::info;
use serde::{Serialize, Serializer, ser::SerializeMap};

use crate::heatmap::Keypoint;

/// Pipeline stages that contribute to the performance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    SessionCreation,
    ImageAcquisition,
    LuminanceNormalization,
    TensorAssembly,
    InferenceExecution,
    HeatmapDecoding,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::SessionCreation => "session_creation",
            Stage::ImageAcquisition => "image_acquisition",
            Stage::LuminanceNormalization => "luminance_normalization",
            Stage::TensorAssembly => "tensor_assembly",
            Stage::InferenceExecution => "inference_execution",
            Stage::HeatmapDecoding => "heatmap_decoding",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage durations in milliseconds, in the order they were recorded.
///
/// Serializes as a JSON object `{ "<stage>": ms, ..., "total": ms }`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceRecord {
    entries: Vec<(Stage, f64)>,
}

impl PerformanceRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `stage`; a repeated stage overwrites its earlier value.
    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        self.record_ms(stage, duration_to_ms(elapsed));
    }

    pub fn record_ms(&mut self, stage: Stage, ms: f64) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == stage) {
            Some(entry) => entry.1 = ms,
            None => self.entries.push((stage, ms)),
        }
    }

    pub fn get(&self, stage: Stage) -> Option<f64> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == stage)
            .map(|(_, ms)| *ms)
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.get(stage).is_some()
    }

    pub fn entries(&self) -> &[(Stage, f64)] {
        &self.entries
    }

    /// Sum of recorded stage durations; unmeasured time between stages is excluded.
    pub fn total_ms(&self) -> f64 {
        self.entries.iter().map(|(_, ms)| ms).sum()
    }
}

impl Serialize for PerformanceRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len() + 1))?;
        for (stage, ms) in &self.entries {
            map.serialize_entry(stage.as_str(), ms)?;
        }
        map.serialize_entry("total", &self.total_ms())?;
        map.end()
    }
}

/// Inputs and parameters of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    pub started_at: DateTime<Utc>,
    pub model: Option<String>,
    pub image: String,
    pub execution_provider: String,
    pub cell_size: usize,
    pub confidence_threshold: f32,
    /// Source image `(width, height)`, once acquired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size: Option<(u32, u32)>,
}

/// Everything a pipeline run produced, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub system: SystemInfo,
    pub context: RunContext,
    pub performance: PerformanceRecord,
    pub keypoints: Vec<Keypoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Destination for finished reports.
pub trait TelemetrySink {
    /// Persist `report`, returning where it was written.
    fn export(&self, report: &PipelineReport) -> Result<PathBuf>;
}

const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Writes each report as pretty JSON to `<dir>/keypoints-report-<UTC timestamp>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    output_dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `keypoints-report-<timestamp>.json`, or `...-<n>.json` for the n-th collision.
    fn file_name(timestamp: DateTime<Utc>, attempt: u32) -> String {
        let stamp = timestamp.format("%Y%m%dT%H%M%S%.3fZ");
        match attempt {
            0 => format!("keypoints-report-{stamp}.json"),
            n => format!("keypoints-report-{stamp}-{n}.json"),
        }
    }

    /// Create a report file that did not exist before, so runs sharing a timestamp never
    /// overwrite each other.
    fn create_unique(&self, timestamp: DateTime<Utc>) -> Result<(PathBuf, File)> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = self.output_dir.join(Self::file_name(timestamp, attempt));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to create {}", path.display()));
                }
            }
        }
        anyhow::bail!(
            "no free report file name for {} in {} after {MAX_NAME_ATTEMPTS} attempts",
            timestamp,
            self.output_dir.display()
        )
    }
}

impl TelemetrySink for JsonFileSink {
    fn export(&self, report: &PipelineReport) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!(
                "failed to create report directory {}",
                self.output_dir.display()
            )
        })?;
        let (path, file) = self.create_unique(report.context.started_at)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, report)
            .with_context(|| format!("failed to write report JSON to {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("failed to flush {}", path.display()))?;
        info!("Wrote pipeline report to {}", path.display());
        Ok(path)
    }
}
