use thiserror::Error;

/// Failures raised by the pipeline stages.
///
/// Stages fail fast with one of these variants; only the pipeline orchestrator turns them into
/// report entries.
#[derive(Debug, Error)]
pub enum KeypointError {
    /// The image or the model could not be obtained or decoded.
    #[error("acquisition failed for {source_id}: {reason}")]
    Acquisition { source_id: String, reason: String },
    /// A buffer does not match the shape it is declared with.
    #[error("shape mismatch: buffer holds {len} values but {height}x{width} was requested")]
    ShapeMismatch {
        len: usize,
        height: usize,
        width: usize,
    },
    /// The inference engine rejected the input or failed while executing.
    #[error("inference execution failed: {0}")]
    InferenceExecution(String),
    /// The heatmap output does not satisfy the decoder's shape preconditions.
    #[error("invalid heatmap shape: {0}")]
    HeatmapShape(String),
}

impl KeypointError {
    pub(crate) fn acquisition(source_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Acquisition {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result alias used by the pipeline stages.
pub type KeypointResult<T> = std::result::Result<T, KeypointError>;
