//! Object detection: acquire a model, infer, decode, release.
//!
//! `ObjectDetector::detect` queues the whole sequence on the worker pool and
//! returns a handle the caller waits on. The model session is scoped to the
//! job, so the engine is released once per call whether the job finishes,
//! fails or is cancelled.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::DetectorConfig;
use crate::decode::{decode_detections_cancellable, DecodeError, DecodeParams, Detection};
use crate::detect::EngineRegistry;
use crate::labels::LabelTable;
use crate::tensor::InputTensor;
use crate::worker::{CancelToken, JobHandle, WorkerPool};

/// Result of one detection call.
#[derive(Clone, Debug, Serialize)]
pub struct Predictions {
    /// Accepted labels in row-scan order; duplicates kept.
    pub labels: Vec<String>,
    pub detections: Vec<Detection>,
    /// Set when the model could not be released after decoding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_error: Option<String>,
}

struct Shared {
    registry: EngineRegistry,
    backend: String,
    params: DecodeParams,
    labels: LabelTable,
}

pub struct ObjectDetector {
    shared: Arc<Shared>,
    pool: WorkerPool,
}

impl ObjectDetector {
    pub fn new(
        registry: EngineRegistry,
        backend: &str,
        params: DecodeParams,
        labels: LabelTable,
        worker_threads: usize,
    ) -> Result<Self> {
        if !registry.list().iter().any(|name| name == backend) {
            anyhow::bail!(
                "backend '{}' not registered (available: {})",
                backend,
                registry.list().join(", ")
            );
        }
        params.expected_len()?;
        Ok(Self {
            shared: Arc::new(Shared {
                registry,
                backend: backend.to_string(),
                params,
                labels,
            }),
            pool: WorkerPool::new(worker_threads)?,
        })
    }

    /// Build from configuration with a prepared registry.
    pub fn from_config(cfg: &DetectorConfig, registry: EngineRegistry) -> Result<Self> {
        Self::new(
            registry,
            &cfg.backend,
            cfg.decode_params(),
            cfg.label_table()?,
            cfg.worker_threads,
        )
    }

    pub fn params(&self) -> DecodeParams {
        self.shared.params
    }

    /// Queue detection of one input on the worker pool.
    pub fn detect(&self, input: InputTensor) -> Result<JobHandle<Result<Predictions>>> {
        let shared = self.shared.clone();
        self.pool
            .submit(move |cancel| run_detection(&shared, &input, cancel))
    }

    /// Queue detection and block until it completes.
    pub fn detect_blocking(&self, input: InputTensor) -> Result<Predictions> {
        self.detect(input)?.wait()?
    }
}

fn run_detection(
    shared: &Shared,
    input: &InputTensor,
    cancel: &CancelToken,
) -> Result<Predictions> {
    let started = Instant::now();
    let mut session = shared.registry.acquire(&shared.backend)?;
    if cancel.is_cancelled() {
        return Err(DecodeError::CancelledBeforeInference.into());
    }

    let output = session.infer(input).context("inference failed")?;
    log::debug!(
        "inference produced {} values in {:.2?}",
        output.len(),
        started.elapsed()
    );

    let detections =
        decode_detections_cancellable(&output, shared.params, &shared.labels, cancel)?;

    let release_error = match session.release() {
        Ok(()) => None,
        Err(err) => {
            log::warn!("model release failed after decoding: {:#}", err);
            Some(format!("{:#}", err))
        }
    };

    log::info!(
        "{} objects detected in {:.2?}",
        detections.len(),
        started.elapsed()
    );
    Ok(Predictions {
        labels: detections.iter().map(|d| d.label.clone()).collect(),
        detections,
        release_error,
    })
}
