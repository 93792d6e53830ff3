//! Keypoint heatmap inference pipeline.
//!
//! This crate normalizes RGBA images into single-channel tensors, runs a keypoint network with
//! `tract-onnx`, and decodes the network's 65-channel heatmap into pixel keypoints.

/// Keypoint marker rendering.
pub mod annotate;
/// Error taxonomy shared by the pipeline stages.
pub mod error;
/// Depth-to-space heatmap decoding.
pub mod heatmap;
/// Inference engine seam and session invoker.
pub mod inference;
/// RGBA to luminance conversion.
pub mod luminance;
/// `tract-onnx` backed inference engine.
pub mod model;
/// Stage orchestration and timing.
pub mod pipeline;
/// Run reports and telemetry sinks.
pub mod report;
/// Pixel buffer acquisition.
pub mod source;
/// Input tensor assembly.
pub mod tensor;

pub use annotate::{render_keypoints, save_annotated};
pub use error::{KeypointError, KeypointResult};
pub use heatmap::{DecoderConfig, Keypoint, MAX_CELL_SIZE, decode_heatmap, select_heatmap};
pub use inference::{
    ExecutionProvider, InferenceEngine, InferenceSession, OutputTensorSet, run_inference,
};
pub use luminance::{IntensityBuffer, luminance_from_rgba};
pub use model::{TractEngine, TractSession};
pub use pipeline::{KeypointPipeline, PipelineConfig};
pub use report::{
    JsonFileSink, PerformanceRecord, PipelineReport, RunContext, Stage, TelemetrySink,
};
pub use source::{FileImageSource, ImageSource, decode_image_bytes};
pub use tensor::{ElementType, TensorDescriptor, assemble_from_buffer, assemble_tensor};

/// Returns the crate version for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
