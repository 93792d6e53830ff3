use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use image::{Rgba, RgbaImage};
use keypoint_core::{
    DecoderConfig, ExecutionProvider, ImageSource, InferenceEngine, InferenceSession,
    JsonFileSink, KeypointError, KeypointPipeline, KeypointResult, OutputTensorSet,
    PipelineConfig, PipelineReport, Stage, TelemetrySink,
};
use keypoint_utils::config::AppSettings;
use tempfile::tempdir;
use tract_onnx::prelude::Tensor;

const MODEL: &str = "model.onnx";
const CELL: usize = 8;
const CHANNELS: usize = CELL * CELL + 1;

/// `[1, 65, rows, cols]` heatmap with channel 9 at cell (1, 1) set to 0.9.
fn single_hit_heatmap(rows: usize, cols: usize) -> Tensor {
    let mut data = vec![0f32; CHANNELS * rows * cols];
    data[(9 * rows + 1) * cols + 1] = 0.9;
    Tensor::from_shape(&[1, CHANNELS, rows, cols], &data).unwrap()
}

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    Heatmap,
    Fail,
    Panic,
}

#[derive(Debug)]
struct ScriptedSession {
    behaviour: Behaviour,
    inputs: Vec<String>,
    outputs: Vec<String>,
    seen_shapes: Mutex<Vec<Vec<usize>>>,
}

impl ScriptedSession {
    fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            inputs: vec!["image".into()],
            outputs: vec!["semi".into(), "desc".into()],
            seen_shapes: Mutex::new(Vec::new()),
        }
    }
}

impl InferenceSession for ScriptedSession {
    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    fn output_names(&self) -> &[String] {
        &self.outputs
    }

    fn run(&self, input_name: &str, tensor: Tensor) -> KeypointResult<OutputTensorSet> {
        assert_eq!(input_name, "image");
        let shape = tensor.shape().to_vec();
        let values = tensor.as_slice::<f32>().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        self.seen_shapes.lock().unwrap().push(shape.clone());

        match self.behaviour {
            Behaviour::Heatmap => {
                let mut outputs = OutputTensorSet::new();
                outputs.insert("semi", single_hit_heatmap(shape[2] / CELL, shape[3] / CELL));
                outputs.insert("desc", Tensor::from_shape(&[1, 2], &[0f32, 0.0]).unwrap());
                Ok(outputs)
            }
            Behaviour::Fail => Err(KeypointError::InferenceExecution(
                "input rejected by engine".into(),
            )),
            Behaviour::Panic => panic!("kernel exploded"),
        }
    }
}

struct ScriptedEngine {
    behaviour: Behaviour,
    fail_load: bool,
}

impl InferenceEngine for ScriptedEngine {
    fn create_session(
        &self,
        model: &Path,
        provider: ExecutionProvider,
    ) -> KeypointResult<Box<dyn InferenceSession>> {
        assert_eq!(provider, ExecutionProvider::Optimized);
        if self.fail_load {
            return Err(KeypointError::Acquisition {
                source_id: model.display().to_string(),
                reason: "model file not found".into(),
            });
        }
        Ok(Box::new(ScriptedSession::new(self.behaviour)))
    }
}

/// Serves solid grey images of a fixed size; the identifier `missing` fails.
struct GreySource {
    width: u32,
    height: u32,
}

impl ImageSource for GreySource {
    fn acquire(&self, source: &str) -> KeypointResult<RgbaImage> {
        if source == "missing" {
            return Err(KeypointError::Acquisition {
                source_id: source.into(),
                reason: "not found".into(),
            });
        }
        Ok(RgbaImage::from_pixel(
            self.width,
            self.height,
            Rgba([128, 128, 128, 255]),
        ))
    }
}

fn pipeline(
    behaviour: Behaviour,
    fail_load: bool,
    size: (u32, u32),
) -> KeypointPipeline<ScriptedEngine, GreySource> {
    KeypointPipeline::new(
        ScriptedEngine {
            behaviour,
            fail_load,
        },
        GreySource {
            width: size.0,
            height: size.1,
        },
        PipelineConfig::default(),
    )
}

fn recorded_stages(report: &PipelineReport) -> Vec<Stage> {
    report
        .performance
        .entries()
        .iter()
        .map(|(stage, _)| *stage)
        .collect()
}

#[test]
fn successful_run_decodes_single_keypoint_and_times_every_stage() {
    let report = pipeline(Behaviour::Heatmap, false, (16, 16)).run(Path::new(MODEL), "grey");

    assert!(report.is_success(), "unexpected error: {:?}", report.error);
    assert_eq!(report.keypoints.len(), 1);
    assert_eq!((report.keypoints[0].x, report.keypoints[0].y), (9, 9));
    assert!((report.keypoints[0].score - 0.9).abs() < f32::EPSILON);

    assert_eq!(
        recorded_stages(&report),
        vec![
            Stage::SessionCreation,
            Stage::ImageAcquisition,
            Stage::LuminanceNormalization,
            Stage::TensorAssembly,
            Stage::InferenceExecution,
            Stage::HeatmapDecoding,
        ]
    );
    let sum: f64 = report.performance.entries().iter().map(|(_, ms)| ms).sum();
    assert_eq!(report.performance.total_ms(), sum);
    assert_eq!(report.context.image_size, Some((16, 16)));
    assert_eq!(report.context.model.as_deref(), Some(MODEL));
}

#[test]
fn inference_failure_keeps_partial_record_and_no_keypoints() {
    let report = pipeline(Behaviour::Fail, false, (16, 16)).run(Path::new(MODEL), "grey");

    let error = report.error.as_deref().expect("error must be recorded");
    assert!(error.contains("input rejected by engine"));
    assert!(report.keypoints.is_empty());
    assert!(report.performance.contains(Stage::SessionCreation));
    assert!(report.performance.contains(Stage::ImageAcquisition));
    assert!(!report.performance.contains(Stage::HeatmapDecoding));
}

#[test]
fn panicking_engine_is_reported_not_propagated() {
    let report = pipeline(Behaviour::Panic, false, (16, 16)).run(Path::new(MODEL), "grey");

    let error = report.error.as_deref().expect("panic must become an error");
    assert!(error.contains("kernel exploded"), "{error}");
    assert!(report.performance.contains(Stage::InferenceExecution));
}

#[test]
fn model_load_failure_stops_after_session_creation() {
    let report = pipeline(Behaviour::Heatmap, true, (16, 16)).run(Path::new("gone.onnx"), "grey");

    assert!(report.error.as_deref().unwrap().contains("gone.onnx"));
    assert_eq!(recorded_stages(&report), vec![Stage::SessionCreation]);
    assert!(report.context.image_size.is_none());
}

#[test]
fn acquisition_failure_is_reported() {
    let report =
        pipeline(Behaviour::Heatmap, false, (16, 16)).run(Path::new(MODEL), "missing");

    assert!(
        report
            .error
            .as_deref()
            .unwrap()
            .starts_with("acquisition failed for missing")
    );
    assert_eq!(
        recorded_stages(&report),
        vec![Stage::SessionCreation, Stage::ImageAcquisition]
    );
}

#[test]
fn heatmap_that_does_not_cover_image_is_a_shape_error() {
    // 20x16 image: the session emits a 2x2 cell heatmap covering only 16x16 pixels.
    let report = pipeline(Behaviour::Heatmap, false, (20, 16)).run(Path::new(MODEL), "grey");

    let error = report.error.as_deref().expect("shape error expected");
    assert!(error.starts_with("invalid heatmap shape"), "{error}");
    assert!(report.keypoints.is_empty());
    assert!(report.performance.contains(Stage::HeatmapDecoding));
}

#[test]
fn reused_session_skips_session_creation_timing() {
    let pipeline = pipeline(Behaviour::Heatmap, false, (32, 16));
    let session = ScriptedSession::new(Behaviour::Heatmap);

    let first = pipeline.run_with_session(&session, "grey");
    let second = pipeline.run_with_session(&session, "grey");

    assert!(first.is_success() && second.is_success());
    assert!(!first.performance.contains(Stage::SessionCreation));
    assert_eq!(first.keypoints, second.keypoints);
    assert_eq!(
        *session.seen_shapes.lock().unwrap(),
        vec![vec![1, 1, 16, 32], vec![1, 1, 16, 32]]
    );
}

#[test]
fn named_heatmap_output_is_respected() {
    let config = PipelineConfig {
        heatmap_output: Some("desc".into()),
        decoder: DecoderConfig::default(),
        ..PipelineConfig::default()
    };
    let pipeline = KeypointPipeline::new(
        ScriptedEngine {
            behaviour: Behaviour::Heatmap,
            fail_load: false,
        },
        GreySource {
            width: 16,
            height: 16,
        },
        config,
    );

    // "desc" is a [1, 2] tensor, so decoding must fail on shape.
    let report = pipeline.run(Path::new(MODEL), "grey");
    assert!(report.error.as_deref().unwrap().contains("rank-4"));
}

fn pipeline_with(config: PipelineConfig) -> KeypointPipeline<ScriptedEngine, GreySource> {
    KeypointPipeline::new(
        ScriptedEngine {
            behaviour: Behaviour::Heatmap,
            fail_load: false,
        },
        GreySource {
            width: 16,
            height: 16,
        },
        config,
    )
}

#[test]
fn undeclared_heatmap_output_fails_at_session_creation() {
    let report = pipeline_with(PipelineConfig {
        heatmap_output: Some("scores".into()),
        ..PipelineConfig::default()
    })
    .run(Path::new(MODEL), "grey");

    let error = report.error.as_deref().expect("unknown output must fail");
    assert!(error.contains("no output 'scores'"), "{error}");
    assert!(error.contains("semi, desc"), "{error}");
    assert_eq!(recorded_stages(&report), vec![Stage::SessionCreation]);
}

#[test]
fn oversized_cell_size_is_reported_not_panicked() {
    let report = pipeline_with(PipelineConfig {
        decoder: DecoderConfig {
            cell_size: 1 << 33,
            ..DecoderConfig::default()
        },
        ..PipelineConfig::default()
    })
    .run(Path::new(MODEL), "grey");

    let error = report.error.as_deref().expect("decode must fail");
    assert!(error.starts_with("invalid heatmap shape"), "{error}");
    assert!(report.keypoints.is_empty());
    assert!(report.performance.contains(Stage::HeatmapDecoding));
}

#[test]
fn run_image_loads_configured_model_path() {
    let mut settings = AppSettings {
        model_path: Some("weights/custom.onnx".into()),
        ..AppSettings::default()
    };
    settings.report.enabled = false;
    let pipeline = KeypointPipeline::from_settings(
        ScriptedEngine {
            behaviour: Behaviour::Heatmap,
            fail_load: false,
        },
        GreySource {
            width: 16,
            height: 16,
        },
        &settings,
    )
    .expect("valid settings");

    let report = pipeline.run_image("grey");
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.context.model.as_deref(), Some("weights/custom.onnx"));
}

#[test]
fn reports_are_exported_to_sink() {
    let dir = tempdir().expect("tempdir");
    let report_dir = dir.path().join("reports");
    let pipeline =
        pipeline(Behaviour::Fail, false, (16, 16)).with_sink(JsonFileSink::new(&report_dir));

    let report = pipeline.run(Path::new(MODEL), "grey");
    assert!(!report.is_success());

    let files: Vec<PathBuf> = fs::read_dir(&report_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);

    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&files[0]).unwrap()).unwrap();
    assert!(value["error"].as_str().unwrap().contains("input rejected"));
    assert!(value["performance"]["session_creation"].is_number());
    assert!(value["performance"]["total"].is_number());
    assert_eq!(value["keypoints"].as_array().unwrap().len(), 0);
    assert!(!value["system"]["os"].as_str().unwrap().is_empty());
}

#[test]
fn back_to_back_runs_each_keep_their_report() {
    let dir = tempdir().expect("tempdir");
    let pipeline =
        pipeline(Behaviour::Heatmap, true, (16, 16)).with_sink(JsonFileSink::new(dir.path()));

    for _ in 0..40 {
        let report = pipeline.run(Path::new(MODEL), "grey");
        assert!(!report.is_success());
    }
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 40);
}

struct BrokenSink;

impl TelemetrySink for BrokenSink {
    fn export(&self, _report: &PipelineReport) -> anyhow::Result<PathBuf> {
        anyhow::bail!("disk full")
    }
}

#[test]
fn sink_failure_does_not_affect_report() {
    let report = pipeline(Behaviour::Heatmap, false, (16, 16))
        .with_sink(BrokenSink)
        .run(Path::new(MODEL), "grey");
    assert!(report.is_success());
    assert_eq!(report.keypoints.len(), 1);
}
