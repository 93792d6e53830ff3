use std::{fmt::Write, path::Path};

use anyhow::{Context, Result};
use log::{debug, warn};
use tract_onnx::prelude::{
    Framework, Graph, InferenceModelExt, IntoTensor, SimplePlan, Tensor, TypedFact, TypedModel,
    TypedOp, tvec,
};

use crate::error::{KeypointError, KeypointResult};
use crate::inference::{ExecutionProvider, InferenceEngine, InferenceSession, OutputTensorSet};

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Inference engine backed by `tract-onnx`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TractEngine;

impl InferenceEngine for TractEngine {
    fn create_session(
        &self,
        model: &Path,
        provider: ExecutionProvider,
    ) -> KeypointResult<Box<dyn InferenceSession>> {
        let session = TractSession::load(model, provider).map_err(|e| {
            KeypointError::acquisition(model.display().to_string(), format!("{e:#}"))
        })?;
        Ok(Box::new(session))
    }
}

/// A runnable tract plan plus the input/output names captured from its graph.
#[derive(Debug)]
pub struct TractSession {
    runnable: RunnableModel,
    provider: ExecutionProvider,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl TractSession {
    /// Load and prepare an ONNX graph.
    ///
    /// With [`ExecutionProvider::Optimized`] a failed optimization falls back to the decluttered
    /// plan, logging the error chain; the session then reports `Decluttered` as its provider.
    pub fn load<P: AsRef<Path>>(model_path: P, provider: ExecutionProvider) -> Result<Self> {
        let path = model_path.as_ref();
        anyhow::ensure!(path.exists(), "model file not found: {}", path.display());

        let (typed, provider) = match provider {
            ExecutionProvider::Decluttered => (load_typed_model(path, provider)?, provider),
            ExecutionProvider::Optimized => match load_typed_model(path, provider) {
                Ok(model) => (model, provider),
                Err(opt_err) => {
                    let mut chain_msg = String::new();
                    for cause in opt_err.chain() {
                        let _ = writeln!(&mut chain_msg, "  - {cause}");
                    }
                    warn!(
                        "model {} failed optimized load; falling back to decluttered graph.\nError chain:\n{}",
                        path.display(),
                        chain_msg.trim_end()
                    );
                    let decluttered = load_typed_model(path, ExecutionProvider::Decluttered)
                        .with_context(|| {
                            format!(
                                "fallback to decluttered graph failed after optimize error: {opt_err}"
                            )
                        })?;
                    (decluttered, ExecutionProvider::Decluttered)
                }
            },
        };

        let input_names = typed
            .input_outlets()
            .map_err(|e| anyhow::anyhow!("unable to list model inputs: {e}"))?
            .iter()
            .map(|outlet| typed.node(outlet.node).name.clone())
            .collect::<Vec<_>>();
        let output_names = typed
            .output_outlets()
            .map_err(|e| anyhow::anyhow!("unable to list model outputs: {e}"))?
            .iter()
            .map(|outlet| {
                typed
                    .outlet_label(*outlet)
                    .map(str::to_string)
                    .unwrap_or_else(|| typed.node(outlet.node).name.clone())
            })
            .collect::<Vec<_>>();

        let runnable = typed
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make graph runnable: {e}"))?;

        debug!(
            "model {} ready ({provider}); inputs={:?} outputs={:?}",
            path.display(),
            input_names,
            output_names
        );

        Ok(Self {
            runnable,
            provider,
            input_names,
            output_names,
        })
    }

    /// The backend actually in use after any fallback.
    pub fn provider(&self) -> ExecutionProvider {
        self.provider
    }
}

impl InferenceSession for TractSession {
    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn run(&self, input_name: &str, tensor: Tensor) -> KeypointResult<OutputTensorSet> {
        if !self.input_names.iter().any(|name| name == input_name) {
            return Err(KeypointError::InferenceExecution(format!(
                "model has no input named '{input_name}'"
            )));
        }

        let outputs = self
            .runnable
            .run(tvec![tensor.into()])
            .map_err(|e| KeypointError::InferenceExecution(format!("{e}")))?;

        if outputs.len() != self.output_names.len() {
            return Err(KeypointError::InferenceExecution(format!(
                "expected {} outputs, engine returned {}",
                self.output_names.len(),
                outputs.len()
            )));
        }

        Ok(self
            .output_names
            .iter()
            .cloned()
            .zip(outputs.into_iter().map(|value| value.into_tensor()))
            .collect())
    }
}

fn load_typed_model(path: &Path, provider: ExecutionProvider) -> Result<TypedModel> {
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to parse ONNX graph from {}", path.display()))?;

    match provider {
        ExecutionProvider::Optimized => model
            .into_optimized()
            .map_err(|e| anyhow::anyhow!("unable to optimize graph: {e}")),
        ExecutionProvider::Decluttered => model
            .into_typed()
            .map_err(|e| anyhow::anyhow!("unable to type-check graph: {e}"))?
            .into_decluttered()
            .map_err(|e| anyhow::anyhow!("unable to declutter graph: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loading_missing_model_fails() {
        let result = TractSession::load("missing.onnx", ExecutionProvider::Optimized);
        assert!(result.is_err());
    }

    #[test]
    fn invalid_model_produces_useful_error() {
        let mut temp = NamedTempFile::new().expect("temp file");
        temp.write_all(b"not a real onnx file")
            .expect("write mock model");

        let err = TractSession::load(temp.path(), ExecutionProvider::Decluttered)
            .expect_err("invalid ONNX should fail");
        let message = format!("{err:#}");
        assert!(
            message.contains("failed to parse ONNX"),
            "Unexpected error message: {message}"
        );
    }

    #[test]
    fn engine_maps_load_failures_to_acquisition_errors() {
        let err = TractEngine
            .create_session(Path::new("missing.onnx"), ExecutionProvider::Optimized)
            .expect_err("missing model");
        match err {
            KeypointError::Acquisition { source_id, reason } => {
                assert_eq!(source_id, "missing.onnx");
                assert!(reason.contains("model file not found"));
            }
            other => panic!("expected Acquisition, got {other:?}"),
        }
    }
}
