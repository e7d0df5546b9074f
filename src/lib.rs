//! YOLO output decoding.
//!
//! This crate turns the flat output tensor of a YOLO-style object detector
//! into the class labels that clear a confidence threshold.
//!
//! # Module Structure
//!
//! - `decode`: the detection decoder (row scan, best class, threshold)
//! - `labels`: label tables (built-in COCO, label files)
//! - `detect`: inference engine seam, backends (tract, replay), registry
//! - `session`: scoped model acquisition with guaranteed release
//! - `worker`: background worker pool with cooperative cancellation
//! - `pipeline`: acquire, infer, decode and release on a worker
//! - `config`: file + environment configuration
//! - `tensor`: input tensors and raw `f32` tensor files

pub mod config;
pub mod decode;
pub mod detect;
pub mod labels;
pub mod pipeline;
pub mod session;
pub mod tensor;
pub mod worker;

use std::collections::BTreeMap;

pub use config::DetectorConfig;
pub use decode::{
    best_class, decode, decode_detections, decode_detections_cancellable, DecodeError,
    DecodeParams, Detection,
};
pub use detect::{EngineLoader, EngineRegistry, InferenceEngine, ReplayLoader};
pub use labels::{LabelTable, COCO_LABELS};
pub use pipeline::{ObjectDetector, Predictions};
pub use session::ModelSession;
pub use tensor::InputTensor;
pub use worker::{CancelToken, JobHandle, WorkerPool};

/// Count occurrences of each label, e.g. `"2 car, 1 person"`.
///
/// Labels are listed alphabetically.
pub fn summarize_labels<S: AsRef<str>>(labels: &[S]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for label in labels {
        *counts.entry(label.as_ref()).or_insert(0) += 1;
    }
    counts
        .iter()
        .map(|(label, count)| format!("{} {}", count, label))
        .collect::<Vec<_>>()
        .join(", ")
}
