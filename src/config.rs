use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::decode::DecodeParams;
use crate::labels::LabelTable;

const DEFAULT_BACKEND: &str = "tract";
const DEFAULT_MODEL_PATH: &str = "yolov5s.onnx";
const DEFAULT_INPUT_SHAPE: [usize; 4] = [1, 3, 320, 320];
const DEFAULT_NUM_DETECTIONS: usize = 6300;
const DEFAULT_NUM_CLASSES: usize = 80;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_WORKER_THREADS: usize = 1;

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model: Option<ModelConfigFile>,
    decoder: Option<DecoderConfigFile>,
    worker: Option<WorkerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    input_shape: Option<Vec<usize>>,
}

#[derive(Debug, Deserialize, Default)]
struct DecoderConfigFile {
    num_detections: Option<usize>,
    num_classes: Option<usize>,
    confidence_threshold: Option<f32>,
    labels_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct WorkerConfigFile {
    threads: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub backend: String,
    pub model: ModelSettings,
    pub decoder: DecoderSettings,
    pub worker_threads: usize,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub input_shape: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct DecoderSettings {
    pub num_detections: usize,
    pub num_classes: usize,
    pub confidence_threshold: f32,
    /// Custom label file; the COCO table is used when unset.
    pub labels_path: Option<PathBuf>,
}

impl DetectorConfig {
    /// Load from the file named by `YOLO_LABELS_CONFIG` (if set), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("YOLO_LABELS_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (or defaults), then apply environment
    /// overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DetectorConfigFile) -> Self {
        let backend = file
            .backend
            .unwrap_or_else(|| DEFAULT_BACKEND.to_string());
        let model = ModelSettings {
            path: file
                .model
                .as_ref()
                .and_then(|model| model.path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            input_shape: file
                .model
                .and_then(|model| model.input_shape)
                .unwrap_or_else(|| DEFAULT_INPUT_SHAPE.to_vec()),
        };
        let decoder = DecoderSettings {
            num_detections: file
                .decoder
                .as_ref()
                .and_then(|decoder| decoder.num_detections)
                .unwrap_or(DEFAULT_NUM_DETECTIONS),
            num_classes: file
                .decoder
                .as_ref()
                .and_then(|decoder| decoder.num_classes)
                .unwrap_or(DEFAULT_NUM_CLASSES),
            confidence_threshold: file
                .decoder
                .as_ref()
                .and_then(|decoder| decoder.confidence_threshold)
                .unwrap_or(DEFAULT_CONFIDENCE),
            labels_path: file.decoder.and_then(|decoder| decoder.labels_path),
        };
        let worker_threads = file
            .worker
            .and_then(|worker| worker.threads)
            .unwrap_or(DEFAULT_WORKER_THREADS);
        Self {
            backend,
            model,
            decoder,
            worker_threads,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(backend) = std::env::var("YOLO_LABELS_BACKEND") {
            if !backend.trim().is_empty() {
                self.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("YOLO_LABELS_MODEL") {
            if !path.trim().is_empty() {
                self.model.path = PathBuf::from(path);
            }
        }
        if let Ok(shape) = std::env::var("YOLO_LABELS_INPUT_SHAPE") {
            let parsed = split_csv(&shape)
                .iter()
                .map(|dim| dim.parse::<usize>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| {
                    anyhow!("YOLO_LABELS_INPUT_SHAPE must be comma-separated integers")
                })?;
            if !parsed.is_empty() {
                self.model.input_shape = parsed;
            }
        }
        if let Ok(labels) = std::env::var("YOLO_LABELS_LABELS") {
            if !labels.trim().is_empty() {
                self.decoder.labels_path = Some(PathBuf::from(labels));
            }
        }
        if let Ok(confidence) = std::env::var("YOLO_LABELS_CONFIDENCE") {
            self.decoder.confidence_threshold = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("YOLO_LABELS_CONFIDENCE must be a number"))?;
        }
        if let Ok(threads) = std::env::var("YOLO_LABELS_WORKER_THREADS") {
            self.worker_threads = threads
                .trim()
                .parse()
                .map_err(|_| anyhow!("YOLO_LABELS_WORKER_THREADS must be an integer"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.decoder.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "confidence threshold must be within [0, 1], got {}",
                threshold
            ));
        }
        if self.decoder.num_detections == 0 {
            return Err(anyhow!("num_detections must be greater than zero"));
        }
        if self.decoder.num_classes == 0 {
            return Err(anyhow!("num_classes must be greater than zero"));
        }
        self.decode_params().expected_len()?;
        if self.model.input_shape.is_empty() || self.model.input_shape.contains(&0) {
            return Err(anyhow!(
                "input shape {:?} must be non-empty with no zero dimension",
                self.model.input_shape
            ));
        }
        if self.worker_threads == 0 {
            return Err(anyhow!("worker threads must be greater than zero"));
        }
        if self.backend.is_empty() {
            return Err(anyhow!("backend name must not be empty"));
        }
        Ok(())
    }

    pub fn decode_params(&self) -> DecodeParams {
        DecodeParams::new(
            self.decoder.num_detections,
            self.decoder.num_classes,
            self.decoder.confidence_threshold,
        )
    }

    /// Build the configured label table.
    pub fn label_table(&self) -> Result<LabelTable> {
        let table = match &self.decoder.labels_path {
            Some(path) => LabelTable::from_path(path)?,
            None => LabelTable::coco(),
        };
        if table.len() < self.decoder.num_classes {
            log::warn!(
                "label table has {} entries but the model emits {} classes; detections of \
                 unlabeled classes will be dropped",
                table.len(),
                self.decoder.num_classes
            );
        }
        Ok(table)
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::from_file(DetectorConfigFile::default())
    }
}

fn read_config_file(path: &Path) -> Result<DetectorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?,
        _ => toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?,
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
