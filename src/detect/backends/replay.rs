use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::detect::backend::{EngineLoader, InferenceEngine};
use crate::tensor::{read_f32_le, InputTensor};

/// Counts `close` calls across every engine handed out by a loader.
#[derive(Clone, Debug, Default)]
pub struct ReleaseProbe {
    closes: Arc<AtomicUsize>,
}

impl ReleaseProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Replay backend. Returns a recorded output buffer for any input.
///
/// Used for offline decoding of dumped model outputs and for tests.
pub struct ReplayEngine {
    output: Arc<[f32]>,
    probe: ReleaseProbe,
    fail_close: bool,
    closed: bool,
}

impl ReplayEngine {
    pub fn new(output: Arc<[f32]>) -> Self {
        Self {
            output,
            probe: ReleaseProbe::new(),
            fail_close: false,
            closed: false,
        }
    }
}

impl InferenceEngine for ReplayEngine {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn infer(&mut self, _input: &InputTensor) -> Result<Vec<f32>> {
        if self.closed {
            return Err(anyhow!("replay engine used after close"));
        }
        Ok(self.output.to_vec())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(anyhow!("replay engine closed twice"));
        }
        self.closed = true;
        self.probe.record();
        if self.fail_close {
            return Err(anyhow!("replay engine close failed"));
        }
        Ok(())
    }
}

/// Hands out [`ReplayEngine`]s sharing one recorded buffer.
#[derive(Clone)]
pub struct ReplayLoader {
    output: Arc<[f32]>,
    probe: ReleaseProbe,
    fail_close: bool,
}

impl ReplayLoader {
    pub fn new(output: Vec<f32>) -> Self {
        Self {
            output: output.into(),
            probe: ReleaseProbe::new(),
            fail_close: false,
        }
    }

    /// Load a raw little-endian `f32` output dump.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let output = read_f32_le(path)?;
        log::info!(
            "replaying {} output values from {}",
            output.len(),
            path.display()
        );
        Ok(Self::new(output))
    }

    /// Make every engine's `close` fail after recording the call.
    pub fn with_failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn probe(&self) -> ReleaseProbe {
        self.probe.clone()
    }
}

impl EngineLoader for ReplayLoader {
    fn load(&self) -> Result<Box<dyn InferenceEngine>> {
        Ok(Box::new(ReplayEngine {
            output: self.output.clone(),
            probe: self.probe.clone(),
            fail_close: self.fail_close,
            closed: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> InputTensor {
        InputTensor::new(vec![1], vec![0.0]).unwrap()
    }

    #[test]
    fn replays_recorded_output() {
        let loader = ReplayLoader::new(vec![1.0, 2.0]);
        let mut engine = loader.load().unwrap();
        assert_eq!(engine.name(), "replay");
        assert_eq!(engine.infer(&input()).unwrap(), vec![1.0, 2.0]);
        assert_eq!(engine.infer(&input()).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn probe_counts_closes_across_engines() {
        let loader = ReplayLoader::new(vec![]);
        let probe = loader.probe();
        loader.load().unwrap().close().unwrap();
        loader.load().unwrap().close().unwrap();
        assert_eq!(probe.closes(), 2);
    }

    #[test]
    fn closed_engine_refuses_work() {
        let mut engine = ReplayEngine::new(vec![0.5].into());
        engine.close().unwrap();
        assert!(engine.infer(&input()).is_err());
        assert!(engine.close().is_err());
    }

    #[test]
    fn failing_close_is_still_recorded() {
        let loader = ReplayLoader::new(vec![]).with_failing_close();
        let probe = loader.probe();
        assert!(loader.load().unwrap().close().is_err());
        assert_eq!(probe.closes(), 1);
    }
}
