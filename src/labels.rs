//! Class label tables.
//!
//! A `LabelTable` is index-aligned with the per-class score fields of a
//! detection row: label `i` names class score `i`.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// COCO class names, in model output order.
pub const COCO_LABELS: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

#[derive(Debug, Deserialize)]
struct LabelFile {
    labels: Vec<String>,
}

/// Immutable, ordered class label table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// The 80-class COCO table.
    pub fn coco() -> Self {
        Self::new(COCO_LABELS.iter().map(|label| label.to_string()).collect())
    }

    /// Load a label table from disk.
    ///
    /// `.toml` files carry a `labels = [...]` array, `.json` files a bare array
    /// of strings. Anything else is read as one label per line; blank lines and
    /// lines starting with `#` are skipped.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label file {}", path.display()))?;
        let labels = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => {
                let file: LabelFile = toml::from_str(&raw)
                    .map_err(|e| anyhow!("invalid label file {}: {}", path.display(), e))?;
                file.labels
            }
            Some("json") => serde_json::from_str::<Vec<String>>(&raw)
                .map_err(|e| anyhow!("invalid label file {}: {}", path.display(), e))?,
            _ => raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(|line| line.to_string())
                .collect(),
        };
        if labels.is_empty() {
            return Err(anyhow!("label file {} has no labels", path.display()));
        }
        log::debug!("loaded {} labels from {}", labels.len(), path.display());
        Ok(Self::new(labels))
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::coco()
    }
}
