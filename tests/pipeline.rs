//! End-to-end detection through the worker pool and model sessions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use yolo_labels::{
    DecodeError, DecodeParams, EngineRegistry, InferenceEngine, InputTensor, LabelTable,
    ObjectDetector, ReplayLoader,
};

const NUM_CLASSES: usize = 80;
const ROW_WIDTH: usize = NUM_CLASSES + 5;

fn output_with(rows: usize, hits: &[(usize, usize, f32)]) -> Vec<f32> {
    let mut output = vec![0.0f32; rows * ROW_WIDTH];
    for &(row, class_id, score) in hits {
        output[row * ROW_WIDTH + 5 + class_id] = score;
    }
    output
}

fn dummy_input() -> InputTensor {
    InputTensor::new(vec![1, 3, 2, 2], vec![0.0; 12]).expect("input")
}

fn replay_detector(loader: ReplayLoader, rows: usize, threads: usize) -> ObjectDetector {
    let mut registry = EngineRegistry::new();
    registry.register("replay", loader);
    ObjectDetector::new(
        registry,
        "replay",
        DecodeParams::new(rows, NUM_CLASSES, 0.5),
        LabelTable::coco(),
        threads,
    )
    .expect("detector")
}

/// Engine that takes a while to infer, so callers can time out on it.
struct SlowEngine {
    output: Vec<f32>,
    delay: Duration,
    closes: Arc<AtomicUsize>,
}

impl InferenceEngine for SlowEngine {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn infer(&mut self, _input: &InputTensor) -> Result<Vec<f32>> {
        std::thread::sleep(self.delay);
        Ok(self.output.clone())
    }

    fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn detects_labels_and_releases_once() {
    let loader = ReplayLoader::new(output_with(6300, &[(10, 2, 0.9), (4000, 0, 0.75)]));
    let probe = loader.probe();
    let detector = replay_detector(loader, 6300, 1);

    let predictions = detector.detect_blocking(dummy_input()).expect("detect");
    assert_eq!(predictions.labels, vec!["car", "person"]);
    assert_eq!(predictions.detections[1].row, 4000);
    assert!(predictions.release_error.is_none());
    assert_eq!(probe.closes(), 1);
}

#[test]
fn malformed_output_fails_but_still_releases() {
    let mut output = output_with(2, &[(0, 2, 0.9)]);
    output.truncate(ROW_WIDTH + 3);
    let loader = ReplayLoader::new(output);
    let probe = loader.probe();
    let detector = replay_detector(loader, 2, 1);

    let err = detector.detect_blocking(dummy_input()).expect_err("bad length");
    assert!(matches!(
        err.downcast_ref::<DecodeError>(),
        Some(DecodeError::BufferLength { .. })
    ));
    assert_eq!(probe.closes(), 1);
}

#[test]
fn release_failure_is_reported_not_fatal() {
    let loader = ReplayLoader::new(output_with(1, &[(0, 79, 0.99)])).with_failing_close();
    let probe = loader.probe();
    let detector = replay_detector(loader, 1, 1);

    let predictions = detector.detect_blocking(dummy_input()).expect("detect");
    assert_eq!(predictions.labels, vec!["toothbrush"]);
    let release_error = predictions.release_error.expect("release error");
    assert!(release_error.contains("close failed"));
    assert_eq!(probe.closes(), 1);
}

#[test]
fn timeout_cancels_and_releases() {
    let closes = Arc::new(AtomicUsize::new(0));
    let engine_closes = closes.clone();
    let mut registry = EngineRegistry::new();
    registry.register("slow", move || -> Result<Box<dyn InferenceEngine>> {
        Ok(Box::new(SlowEngine {
            output: output_with(1, &[(0, 2, 0.9)]),
            delay: Duration::from_millis(200),
            closes: engine_closes.clone(),
        }))
    });
    let detector = ObjectDetector::new(
        registry,
        "slow",
        DecodeParams::new(1, NUM_CLASSES, 0.5),
        LabelTable::coco(),
        1,
    )
    .expect("detector");

    let handle = detector.detect(dummy_input()).expect("submit");
    let err = handle
        .wait_timeout(Duration::from_millis(10))
        .expect_err("timeout");
    assert!(err.to_string().contains("timed out"));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn dropped_handle_still_releases() {
    let loader = ReplayLoader::new(output_with(100, &[(5, 7, 0.8)]));
    let probe = loader.probe();
    let detector = replay_detector(loader, 100, 1);

    drop(detector.detect(dummy_input()).expect("submit"));
    // Dropping the detector joins its workers.
    drop(detector);
    assert_eq!(probe.closes(), 1);
}

#[test]
fn concurrent_calls_get_their_own_engine() {
    let loader = ReplayLoader::new(output_with(300, &[(1, 16, 0.6), (299, 16, 0.95)]));
    let probe = loader.probe();
    let detector = replay_detector(loader, 300, 4);

    let handles: Vec<_> = (0..8)
        .map(|_| detector.detect(dummy_input()).expect("submit"))
        .collect();
    for handle in handles {
        let predictions = handle.wait().expect("join").expect("detect");
        assert_eq!(predictions.labels, vec!["dog", "dog"]);
    }
    assert_eq!(probe.closes(), 8);
}
