use std::{
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::Utc;
use keypoint_utils::{
    SystemInfo,
    config::{AppSettings, DEFAULT_MODEL_PATH},
    timing_guard,
};
use log::{debug, info, warn};

use crate::error::{KeypointError, KeypointResult};
use crate::heatmap::{DecoderConfig, Keypoint, MAX_CELL_SIZE, decode_heatmap, select_heatmap};
use crate::inference::{ExecutionProvider, InferenceEngine, InferenceSession, run_inference};
use crate::luminance::luminance_from_rgba;
use crate::report::{
    JsonFileSink, PerformanceRecord, PipelineReport, RunContext, Stage, TelemetrySink,
};
use crate::source::ImageSource;
use crate::tensor::assemble_from_buffer;

/// Settings for one [`KeypointPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Model loaded by [`KeypointPipeline::run_image`].
    pub model_path: PathBuf,
    /// Backend requested when the pipeline creates its own session.
    pub execution_provider: ExecutionProvider,
    /// Heatmap decoding parameters.
    pub decoder: DecoderConfig,
    /// Output holding the heatmap; the first output when `None`.
    pub heatmap_output: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            execution_provider: ExecutionProvider::default(),
            decoder: DecoderConfig::default(),
            heatmap_output: None,
        }
    }
}

impl TryFrom<&AppSettings> for PipelineConfig {
    type Error = anyhow::Error;

    fn try_from(settings: &AppSettings) -> Result<Self> {
        let execution_provider = settings
            .execution_provider
            .parse::<ExecutionProvider>()
            .map_err(anyhow::Error::msg)?;
        let cell_size = settings.decoder.cell_size;
        anyhow::ensure!(
            (1..=MAX_CELL_SIZE).contains(&cell_size),
            "decoder.cell_size must be between 1 and {MAX_CELL_SIZE}, got {cell_size}"
        );
        Ok(PipelineConfig {
            model_path: settings.resolved_model_path(),
            execution_provider,
            decoder: (&settings.decoder).into(),
            heatmap_output: settings.decoder.heatmap_output.clone(),
        })
    }
}

/// Runs image acquisition, normalization, tensor assembly, inference and heatmap decoding for
/// one image, timing each stage.
///
/// The pipeline never returns an error: a failing stage ends the run and its message is stored
/// in [`PipelineReport::error`] next to the timings gathered so far.
pub struct KeypointPipeline<E, S> {
    engine: E,
    source: S,
    config: PipelineConfig,
    sink: Option<Box<dyn TelemetrySink>>,
}

impl<E, S> KeypointPipeline<E, S>
where
    E: InferenceEngine,
    S: ImageSource,
{
    /// Construct a pipeline from its collaborators.
    ///
    /// # Arguments
    ///
    /// * `engine` - Loads models into sessions.
    /// * `source` - Turns image identifiers into RGBA pixel buffers.
    /// * `config` - Backend and decoding parameters.
    pub fn new(engine: E, source: S, config: PipelineConfig) -> Self {
        Self {
            engine,
            source,
            config,
            sink: None,
        }
    }

    /// Build a pipeline from persisted settings.
    ///
    /// Applies the telemetry switches and attaches a [`JsonFileSink`] when reports are enabled.
    pub fn from_settings(engine: E, source: S, settings: &AppSettings) -> Result<Self> {
        settings.telemetry.apply();
        let pipeline = Self::new(engine, source, PipelineConfig::try_from(settings)?);
        Ok(if settings.report.enabled {
            pipeline.with_sink(JsonFileSink::new(&settings.report.output_dir))
        } else {
            pipeline
        })
    }

    /// Export every finished report to `sink`. Export failures are logged, not raised.
    pub fn with_sink(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load `model` with the configured backend, for reuse across [`Self::run_with_session`].
    ///
    /// A configured heatmap output that the model does not declare is rejected here, before any
    /// image is processed.
    pub fn create_session(&self, model: &Path) -> KeypointResult<Box<dyn InferenceSession>> {
        let session = self
            .engine
            .create_session(model, self.config.execution_provider)?;
        self.check_heatmap_output(session.as_ref())?;
        Ok(session)
    }

    /// Run every stage on `image` with the configured model path.
    pub fn run_image(&self, image: &str) -> PipelineReport {
        self.run(&self.config.model_path, image)
    }

    /// Create a session for `model`, then run every stage on `image`.
    pub fn run(&self, model: &Path, image: &str) -> PipelineReport {
        let _guard = timing_guard("keypoint_core::pipeline_run", log::Level::Debug);
        let mut run = RunState::new(&self.config, Some(model), image);

        let session = timed(&mut run.performance, Stage::SessionCreation, || {
            self.create_session(model)
        });
        let report = match session {
            Ok(session) => self.run_stages(session.as_ref(), run),
            Err(err) => run.fail(err),
        };
        self.export(report)
    }

    /// Run every stage on `image` with a caller-owned session. Session creation is not timed.
    pub fn run_with_session(&self, session: &dyn InferenceSession, image: &str) -> PipelineReport {
        let _guard = timing_guard("keypoint_core::pipeline_run", log::Level::Debug);
        let run = RunState::new(&self.config, None, image);
        let report = self.run_stages(session, run);
        self.export(report)
    }

    fn run_stages(&self, session: &dyn InferenceSession, mut run: RunState) -> PipelineReport {
        match self.execute(session, &mut run) {
            Ok(keypoints) => run.finish(keypoints),
            Err(err) => run.fail(err),
        }
    }

    fn execute(
        &self,
        session: &dyn InferenceSession,
        run: &mut RunState,
    ) -> KeypointResult<Vec<Keypoint>> {
        let performance = &mut run.performance;
        let context = &mut run.context;

        let image = timed(performance, Stage::ImageAcquisition, || {
            self.source.acquire(&context.image)
        })?;
        let (width, height) = image.dimensions();
        context.image_size = Some((width, height));
        debug!("acquired {} ({width}x{height})", context.image);

        let intensity = timed(performance, Stage::LuminanceNormalization, || {
            Ok(luminance_from_rgba(&image))
        })?;
        drop(image);

        let descriptor = timed(performance, Stage::TensorAssembly, || {
            assemble_from_buffer(&intensity)
        })?;

        let outputs = timed(performance, Stage::InferenceExecution, || {
            panic::catch_unwind(AssertUnwindSafe(|| run_inference(session, descriptor)))
                .unwrap_or_else(|payload| {
                    Err(KeypointError::InferenceExecution(format!(
                        "inference engine panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                })
        })?;

        timed(performance, Stage::HeatmapDecoding, || {
            let heatmap = select_heatmap(&outputs, self.config.heatmap_output.as_deref())?;
            decode_heatmap(heatmap, width, height, &self.config.decoder)
        })
    }

    fn check_heatmap_output(&self, session: &dyn InferenceSession) -> KeypointResult<()> {
        match self.config.heatmap_output.as_deref() {
            Some(name) if !session.output_names().iter().any(|output| output == name) => {
                Err(KeypointError::HeatmapShape(format!(
                    "model declares no output '{name}' (available: {})",
                    session.output_names().join(", ")
                )))
            }
            _ => Ok(()),
        }
    }

    fn export(&self, report: PipelineReport) -> PipelineReport {
        if let Some(sink) = self.sink.as_ref()
            && let Err(err) = sink.export(&report)
        {
            warn!("Failed to export pipeline report: {err:#}");
        }
        report
    }
}

/// Report fields accumulated while a run is in flight.
struct RunState {
    context: RunContext,
    performance: PerformanceRecord,
}

impl RunState {
    fn new(config: &PipelineConfig, model: Option<&Path>, image: &str) -> Self {
        Self {
            context: RunContext {
                started_at: Utc::now(),
                model: model.map(|path| path.display().to_string()),
                image: image.to_string(),
                execution_provider: config.execution_provider.to_string(),
                cell_size: config.decoder.cell_size,
                confidence_threshold: config.decoder.confidence_threshold,
                image_size: None,
            },
            performance: PerformanceRecord::new(),
        }
    }

    fn finish(self, keypoints: Vec<Keypoint>) -> PipelineReport {
        info!(
            "{} -> {} keypoint(s) in {:.2} ms",
            self.context.image,
            keypoints.len(),
            self.performance.total_ms()
        );
        self.into_report(keypoints, None)
    }

    fn fail(self, err: KeypointError) -> PipelineReport {
        warn!("Failed to process {}: {err}", self.context.image);
        self.into_report(Vec::new(), Some(err.to_string()))
    }

    fn into_report(self, keypoints: Vec<Keypoint>, error: Option<String>) -> PipelineReport {
        PipelineReport {
            system: SystemInfo::collect(),
            context: self.context,
            performance: self.performance,
            keypoints,
            error,
        }
    }
}

/// Run `f`, recording its duration under `stage` whether it succeeds or not.
fn timed<T>(
    performance: &mut PerformanceRecord,
    stage: Stage,
    f: impl FnOnce() -> KeypointResult<T>,
) -> KeypointResult<T> {
    let guard = timing_guard(format!("keypoint_core::{stage}"), log::Level::Debug);
    let result = f();
    performance.record(stage, guard.finish());
    result
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
