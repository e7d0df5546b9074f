//! Scoped model acquisition.
//!
//! A `ModelSession` owns one engine and releases it exactly once: either via
//! `release()`, which surfaces the close error, or on drop, which logs it.
//! Early returns and panics between acquisition and release cannot leak the
//! model.

use std::fmt;

use anyhow::{anyhow, Result};

use crate::detect::InferenceEngine;
use crate::tensor::InputTensor;

pub struct ModelSession {
    engine: Option<Box<dyn InferenceEngine>>,
}

impl ModelSession {
    pub fn new(engine: Box<dyn InferenceEngine>) -> Self {
        Self {
            engine: Some(engine),
        }
    }

    pub fn backend(&self) -> Option<&'static str> {
        self.engine.as_ref().map(|engine| engine.name())
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.engine_mut()?.warm_up()
    }

    pub fn infer(&mut self, input: &InputTensor) -> Result<Vec<f32>> {
        self.engine_mut()?.infer(input)
    }

    /// Release the engine now and report how it went.
    pub fn release(mut self) -> Result<()> {
        match self.engine.take() {
            Some(engine) => close(engine),
            None => Ok(()),
        }
    }

    fn engine_mut(&mut self) -> Result<&mut Box<dyn InferenceEngine>> {
        self.engine
            .as_mut()
            .ok_or_else(|| anyhow!("model session already released"))
    }
}

impl fmt::Debug for ModelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSession")
            .field("backend", &self.backend())
            .finish()
    }
}

impl Drop for ModelSession {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            let name = engine.name();
            if let Err(err) = close(engine) {
                log::warn!("failed to release '{}' engine: {:#}", name, err);
            }
        }
    }
}

fn close(mut engine: Box<dyn InferenceEngine>) -> Result<()> {
    let name = engine.name();
    engine.close()?;
    log::debug!("released '{}' engine", name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{EngineLoader, ReplayLoader};

    #[test]
    fn drop_releases_once() {
        let loader = ReplayLoader::new(vec![0.25]);
        let probe = loader.probe();
        {
            let mut session = ModelSession::new(loader.load().unwrap());
            let input = InputTensor::new(vec![1], vec![0.0]).unwrap();
            assert_eq!(session.infer(&input).unwrap(), vec![0.25]);
        }
        assert_eq!(probe.closes(), 1);
    }

    #[test]
    fn explicit_release_is_not_repeated_on_drop() {
        let loader = ReplayLoader::new(vec![]);
        let probe = loader.probe();
        let session = ModelSession::new(loader.load().unwrap());
        assert_eq!(session.backend(), Some("replay"));
        session.release().unwrap();
        assert_eq!(probe.closes(), 1);
    }

    #[test]
    fn debug_names_the_backend() {
        let session = ModelSession::new(ReplayLoader::new(vec![]).load().unwrap());
        assert_eq!(
            format!("{:?}", session),
            r#"ModelSession { backend: Some("replay") }"#
        );
    }

    #[test]
    fn release_surfaces_close_failure() {
        let loader = ReplayLoader::new(vec![]).with_failing_close();
        let session = ModelSession::new(loader.load().unwrap());
        assert!(session.release().is_err());
    }

    #[test]
    fn early_return_still_releases() {
        fn fails_midway(session: ModelSession) -> Result<()> {
            let _session = session;
            Err(anyhow!("decode failed"))
        }
        let loader = ReplayLoader::new(vec![]);
        let probe = loader.probe();
        assert!(fails_midway(ModelSession::new(loader.load().unwrap())).is_err());
        assert_eq!(probe.closes(), 1);
    }
}
