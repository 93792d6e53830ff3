//! Inference engine seam and the invoker that drives a session.
//!
//! The engine that loads models and computes outputs is a collaborator behind
//! [`InferenceEngine`] / [`InferenceSession`]; [`crate::model::TractEngine`] is the production
//! implementation. [`run_inference`] binds one input descriptor to a session and collects its
//! named outputs.

use std::{fmt, path::Path, str::FromStr};

use keypoint_utils::timing_guard;
use log::debug;
use tract_onnx::prelude::Tensor;

use crate::error::{KeypointError, KeypointResult};
use crate::tensor::TensorDescriptor;

/// Backend selector handed to the inference engine when creating a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionProvider {
    /// Fully optimized CPU plan (vectorized kernels).
    #[default]
    Optimized,
    /// Decluttered but unoptimized plan; slower, accepts more graphs.
    Decluttered,
}

impl ExecutionProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionProvider::Optimized => "optimized",
            ExecutionProvider::Decluttered => "decluttered",
        }
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "optimized" | "cpu" => Ok(ExecutionProvider::Optimized),
            "decluttered" | "reference" => Ok(ExecutionProvider::Decluttered),
            other => Err(format!(
                "unknown execution provider '{other}'; expected 'optimized', 'cpu', 'decluttered' or 'reference'"
            )),
        }
    }
}

/// Named output tensors of one inference call, in the session's declared output order.
#[derive(Debug, Clone, Default)]
pub struct OutputTensorSet {
    entries: Vec<(String, Tensor)>,
}

impl OutputTensorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an output; a repeated name replaces the earlier tensor in place.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = tensor,
            None => self.entries.push((name, tensor)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, tensor)| tensor)
    }

    /// The first declared output, if any.
    pub fn first(&self) -> Option<(&str, &Tensor)> {
        self.entries
            .first()
            .map(|(name, tensor)| (name.as_str(), tensor))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Tensor)> for OutputTensorSet {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        let mut set = OutputTensorSet::new();
        for (name, tensor) in iter {
            set.insert(name, tensor);
        }
        set
    }
}

/// A loaded model ready to execute.
pub trait InferenceSession: Send + Sync + fmt::Debug {
    /// Input names declared by the model, in declaration order.
    fn input_names(&self) -> &[String];

    /// Output names declared by the model, in declaration order.
    fn output_names(&self) -> &[String];

    /// Execute the model with `tensor` bound to `input_name`.
    fn run(&self, input_name: &str, tensor: Tensor) -> KeypointResult<OutputTensorSet>;
}

/// Factory for sessions; owns model loading and backend selection.
pub trait InferenceEngine {
    /// Load `model` with the requested backend.
    ///
    /// Failing to obtain or parse the model is an [`KeypointError::Acquisition`] error.
    fn create_session(
        &self,
        model: &Path,
        provider: ExecutionProvider,
    ) -> KeypointResult<Box<dyn InferenceSession>>;
}

/// Run `session` on a single input descriptor.
///
/// The descriptor is bound to the session's sole declared input. Sessions declaring no input or
/// several inputs are rejected, as are engine-side failures.
///
/// # Arguments
///
/// * `session` - A loaded model.
/// * `input` - The `[1, 1, H, W]` descriptor to bind.
pub fn run_inference(
    session: &dyn InferenceSession,
    input: TensorDescriptor<'_>,
) -> KeypointResult<OutputTensorSet> {
    let _guard = timing_guard("keypoint_core::run_inference", log::Level::Trace);
    let input_name = match session.input_names() {
        [name] => name.as_str(),
        [] => {
            return Err(KeypointError::InferenceExecution(
                "session declares no input; was it initialized?".to_string(),
            ));
        }
        names => {
            return Err(KeypointError::InferenceExecution(format!(
                "session declares {} inputs ({}); exactly one is supported",
                names.len(),
                names.join(", ")
            )));
        }
    };

    debug!(
        "binding {:?} tensor to input '{}'",
        input.shape(),
        input_name
    );
    let outputs = session.run(input_name, input.to_tensor()?)?;
    if outputs.is_empty() {
        return Err(KeypointError::InferenceExecution(
            "session produced no outputs".to_string(),
        ));
    }
    Ok(outputs)
}
