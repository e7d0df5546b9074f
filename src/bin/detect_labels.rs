//! detect_labels - run a YOLO model (or replay a recorded output) and print the
//! class labels that clear the confidence threshold.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use yolo_labels::{
    summarize_labels, DetectorConfig, EngineRegistry, InputTensor, ObjectDetector, ReplayLoader,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (TOML, or JSON with a .json extension).
    #[arg(long, env = "YOLO_LABELS_CONFIG")]
    config: Option<PathBuf>,
    /// Inference backend name.
    #[arg(long)]
    backend: Option<String>,
    /// ONNX model path for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Raw little-endian f32 input tensor, laid out as the model input shape.
    #[arg(long)]
    input: Option<PathBuf>,
    /// Raw little-endian f32 model output to decode instead of running a model.
    #[arg(long, conflicts_with = "model")]
    replay: Option<PathBuf>,
    /// Confidence threshold (0.0 - 1.0).
    #[arg(long)]
    confidence: Option<f32>,
    /// Label file (.toml, .json, or one label per line).
    #[arg(long)]
    labels: Option<PathBuf>,
    /// Give up (and release the model) after this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Print predictions as JSON.
    #[arg(long, conflicts_with = "summary")]
    json: bool,
    /// Print per-label counts instead of one label per line.
    #[arg(long)]
    summary: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = DetectorConfig::load_from(args.config.as_deref())?;
    if let Some(backend) = &args.backend {
        cfg.backend = backend.clone();
    }
    if let Some(model) = &args.model {
        cfg.model.path = model.clone();
    }
    if let Some(confidence) = args.confidence {
        cfg.decoder.confidence_threshold = confidence;
    }
    if let Some(labels) = &args.labels {
        cfg.decoder.labels_path = Some(labels.clone());
    }

    let mut registry = EngineRegistry::new();
    if let Some(path) = &args.replay {
        registry.register("replay", ReplayLoader::from_file(path)?);
        cfg.backend = "replay".to_string();
    } else {
        register_model_backend(&mut registry, &cfg)?;
    }
    cfg.validate()?;

    let input = match (&args.input, &args.replay) {
        (Some(path), _) => InputTensor::from_file(path, cfg.model.input_shape.clone())?,
        // The replay backend ignores its input.
        (None, Some(_)) => InputTensor::new(vec![1], vec![0.0])?,
        (None, None) => return Err(anyhow!("--input is required unless --replay is given")),
    };

    log::info!(
        "backend={}, rows={}, classes={}, threshold={}",
        cfg.backend,
        cfg.decoder.num_detections,
        cfg.decoder.num_classes,
        cfg.decoder.confidence_threshold
    );

    let detector = ObjectDetector::from_config(&cfg, registry)?;
    let handle = detector.detect(input)?;

    let cancel = handle.cancel_token();
    ctrlc::set_handler(move || {
        log::warn!("interrupt received, cancelling detection...");
        cancel.cancel();
    })?;

    let predictions = match args.timeout_ms {
        Some(ms) => handle.wait_timeout(Duration::from_millis(ms))??,
        None => handle.wait()??,
    };
    if let Some(err) = &predictions.release_error {
        log::warn!("model was not released cleanly: {}", err);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&predictions)?);
    } else if args.summary {
        println!("{}", summarize_labels(&predictions.labels));
    } else {
        for label in &predictions.labels {
            println!("{}", label);
        }
    }

    Ok(())
}

#[cfg(feature = "backend-tract")]
fn register_model_backend(registry: &mut EngineRegistry, cfg: &DetectorConfig) -> Result<()> {
    use yolo_labels::detect::TractLoader;

    if cfg.backend != "tract" {
        return Err(anyhow!("unknown backend '{}'", cfg.backend));
    }
    let loader = TractLoader::new(&cfg.model.path, cfg.model.input_shape.clone())?;
    registry.register("tract", loader);
    Ok(())
}

#[cfg(not(feature = "backend-tract"))]
fn register_model_backend(_registry: &mut EngineRegistry, cfg: &DetectorConfig) -> Result<()> {
    Err(anyhow!(
        "backend '{}' is unavailable; rebuild with --features backend-tract or use --replay",
        cfg.backend
    ))
}
