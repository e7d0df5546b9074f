#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use tract_onnx::prelude::*;

use crate::detect::backend::{EngineLoader, InferenceEngine};
use crate::tensor::{element_count, InputTensor};

type Plan = TypedRunnableModel<TypedModel>;

/// Loads an ONNX model once and hands out engines sharing the runnable plan.
///
/// The model is parsed, given a fixed input shape, optimized and made runnable
/// at construction. Engines only borrow the plan, so acquiring one is cheap.
pub struct TractLoader {
    plan: Arc<Plan>,
    input_shape: Vec<usize>,
    fingerprint: [u8; 32],
}

impl TractLoader {
    pub fn new<P: AsRef<Path>>(model_path: P, input_shape: Vec<usize>) -> Result<Self> {
        let model_path = model_path.as_ref();
        element_count(&input_shape)?;

        let bytes = std::fs::read(model_path)
            .with_context(|| format!("failed to read ONNX model {}", model_path.display()))?;
        let fingerprint: [u8; 32] = Sha256::digest(&bytes).into();
        log::info!(
            "loading ONNX model {} ({:.2} MB, sha256 {})",
            model_path.display(),
            bytes.len() as f64 / (1024.0 * 1024.0),
            hex::encode(fingerprint)
        );

        let shape: TVec<usize> = input_shape.iter().copied().collect();
        let plan = tract_onnx::onnx()
            .model_for_read(&mut bytes.as_slice())
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        log::info!("model ready, input shape {:?}", input_shape);

        Ok(Self {
            plan: Arc::new(plan),
            input_shape,
            fingerprint,
        })
    }

    /// SHA-256 of the model file.
    pub fn fingerprint(&self) -> [u8; 32] {
        self.fingerprint
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }
}

impl EngineLoader for TractLoader {
    fn load(&self) -> Result<Box<dyn InferenceEngine>> {
        Ok(Box::new(TractEngine {
            plan: Some(self.plan.clone()),
            input_shape: self.input_shape.clone(),
        }))
    }
}

/// Tract-based engine for ONNX inference.
pub struct TractEngine {
    plan: Option<Arc<Plan>>,
    input_shape: Vec<usize>,
}

impl TractEngine {
    fn build_input(&self, input: &InputTensor) -> Result<Tensor> {
        if input.shape() != self.input_shape.as_slice() {
            return Err(anyhow!(
                "input shape {:?} does not match model input {:?}",
                input.shape(),
                self.input_shape
            ));
        }
        Tensor::from_shape(input.shape(), input.data()).context("failed to build input tensor")
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, input: &InputTensor) -> Result<Vec<f32>> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| anyhow!("tract engine used after close"))?;
        let tensor = self.build_input(input)?;
        let outputs = plan
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        log::debug!("model output shape {:?}", values.shape());
        Ok(values.iter().copied().collect())
    }

    fn close(&mut self) -> Result<()> {
        self.plan
            .take()
            .map(drop)
            .ok_or_else(|| anyhow!("tract engine closed twice"))
    }
}
