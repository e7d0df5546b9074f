//! Detection decoder.
//!
//! Turns the flat output buffer of a YOLO-style model into class labels.
//! Each detection row is `[cx, cy, w, h, objectness, class_0 .. class_{C-1}]`;
//! only the class scores are read. Rows are scanned in order, the best class
//! of each row is kept when its score reaches the threshold, and no
//! suppression or de-duplication happens.

use serde::Serialize;
use thiserror::Error;

use crate::labels::LabelTable;
use crate::worker::CancelToken;

/// Geometry (4) plus objectness (1) fields ahead of the class scores.
pub const ROW_PREFIX: usize = 5;

/// Rows scanned between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 256;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("output buffer holds {actual} values, expected {expected} ({rows} rows x {row_width} fields)")]
    BufferLength {
        expected: usize,
        actual: usize,
        rows: usize,
        row_width: usize,
    },
    #[error("output shape {rows} rows x {row_width} fields overflows")]
    ShapeOverflow { rows: usize, row_width: usize },
    #[error("confidence threshold {0} is outside [0, 1]")]
    InvalidThreshold(f32),
    #[error("decoding cancelled at row {0}")]
    Cancelled(usize),
    #[error("detection cancelled before inference")]
    CancelledBeforeInference,
}

/// Output shape and acceptance threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecodeParams {
    pub num_detections: usize,
    pub num_classes: usize,
    pub confidence_threshold: f32,
}

impl DecodeParams {
    pub fn new(num_detections: usize, num_classes: usize, confidence_threshold: f32) -> Self {
        Self {
            num_detections,
            num_classes,
            confidence_threshold,
        }
    }

    pub fn row_width(&self) -> usize {
        self.num_classes + ROW_PREFIX
    }

    /// Number of values a conforming output buffer holds.
    pub fn expected_len(&self) -> Result<usize, DecodeError> {
        self.num_detections
            .checked_mul(self.row_width())
            .ok_or(DecodeError::ShapeOverflow {
                rows: self.num_detections,
                row_width: self.row_width(),
            })
    }

    fn validate(&self, output_len: usize) -> Result<(), DecodeError> {
        let threshold = self.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(DecodeError::InvalidThreshold(threshold));
        }
        let expected = self.expected_len()?;
        if output_len != expected {
            return Err(DecodeError::BufferLength {
                expected,
                actual: output_len,
                rows: self.num_detections,
                row_width: self.row_width(),
            });
        }
        Ok(())
    }
}

impl Default for DecodeParams {
    /// 6300 rows of 80 COCO classes, threshold 0.5.
    fn default() -> Self {
        Self::new(6300, 80, 0.5)
    }
}

/// One accepted detection row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub row: usize,
    pub class_id: usize,
    pub score: f32,
    pub label: String,
}

/// Index and value of the highest score; the first index wins ties.
///
/// A NaN ranks above every score but never reaches a threshold, so a row
/// holding one has no candidate. Returns `None` for an empty slice too.
pub fn best_class(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            return None;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((index, score)),
        }
    }
    best
}

/// Decode an output buffer into the labels of accepted rows, in row order.
pub fn decode(
    output: &[f32],
    params: DecodeParams,
    labels: &LabelTable,
) -> Result<Vec<String>, DecodeError> {
    Ok(decode_detections(output, params, labels)?
        .into_iter()
        .map(|detection| detection.label)
        .collect())
}

/// Like [`decode`], but keeps row index, class id and score.
pub fn decode_detections(
    output: &[f32],
    params: DecodeParams,
    labels: &LabelTable,
) -> Result<Vec<Detection>, DecodeError> {
    scan(output, params, labels, None)
}

/// Like [`decode_detections`], giving up with [`DecodeError::Cancelled`]
/// once `cancel` fires.
pub fn decode_detections_cancellable(
    output: &[f32],
    params: DecodeParams,
    labels: &LabelTable,
    cancel: &CancelToken,
) -> Result<Vec<Detection>, DecodeError> {
    scan(output, params, labels, Some(cancel))
}

fn scan(
    output: &[f32],
    params: DecodeParams,
    labels: &LabelTable,
    cancel: Option<&CancelToken>,
) -> Result<Vec<Detection>, DecodeError> {
    params.validate(output.len())?;
    if params.num_classes > labels.len() {
        log::debug!(
            "label table has {} entries for {} classes; higher classes are dropped",
            labels.len(),
            params.num_classes
        );
    }

    let mut detections = Vec::new();
    for (row, fields) in output.chunks_exact(params.row_width()).enumerate() {
        if let Some(cancel) = cancel {
            if row % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(DecodeError::Cancelled(row));
            }
        }

        let Some((class_id, score)) = best_class(&fields[ROW_PREFIX..]) else {
            continue;
        };
        if score < params.confidence_threshold {
            continue;
        }
        match labels.get(class_id) {
            Some(label) => detections.push(Detection {
                row,
                class_id,
                score,
                label: label.to_string(),
            }),
            None => log::trace!("row {}: class {} has no label, skipped", row, class_id),
        }
    }

    log::debug!(
        "decoded {} detections from {} rows",
        detections.len(),
        params.num_detections
    );
    Ok(detections)
}
