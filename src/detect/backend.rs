use anyhow::Result;

use crate::tensor::InputTensor;

/// Inference engine trait.
///
/// An engine owns one loaded model instance. It accepts an input tensor and
/// returns the model's first output flattened in row-major order. Engines are
/// acquired per call through an [`EngineLoader`] and released with `close`.
pub trait InferenceEngine: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the model on one input tensor.
    fn infer(&mut self, input: &InputTensor) -> Result<Vec<f32>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the model instance. Called exactly once per acquisition.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Produces a fresh engine for each acquisition.
pub trait EngineLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn InferenceEngine>>;
}

impl<F> EngineLoader for F
where
    F: Fn() -> Result<Box<dyn InferenceEngine>> + Send + Sync,
{
    fn load(&self) -> Result<Box<dyn InferenceEngine>> {
        self()
    }
}
