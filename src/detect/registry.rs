use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use crate::session::ModelSession;

use super::backend::EngineLoader;

/// Registry of engine loaders keyed by backend name.
///
/// Every acquisition loads a fresh engine, so concurrent callers never share
/// one model instance.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    loaders: BTreeMap<String, Arc<dyn EngineLoader>>,
    default_name: Option<String>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loader. The first registered loader becomes the default.
    pub fn register<L: EngineLoader + 'static>(&mut self, name: &str, loader: L) {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.loaders.insert(name.to_string(), Arc::new(loader));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.loaders.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        self.loaders.keys().cloned().collect()
    }

    /// Load an engine from the named backend, wrapped in a releasing session.
    pub fn acquire(&self, name: &str) -> Result<ModelSession> {
        let loader = self
            .loaders
            .get(name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))?;
        let engine = loader
            .load()
            .with_context(|| format!("failed to load '{}' engine", name))?;
        log::debug!("acquired '{}' engine", engine.name());
        Ok(ModelSession::new(engine))
    }

    /// Load an engine from the default backend.
    pub fn acquire_default(&self) -> Result<ModelSession> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no backend registered"))?;
        self.acquire(name)
    }
}
