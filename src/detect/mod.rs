mod backend;
pub mod backends;
mod registry;

pub use backend::{EngineLoader, InferenceEngine};
pub use backends::{ReleaseProbe, ReplayEngine, ReplayLoader};
pub use registry::EngineRegistry;

#[cfg(feature = "backend-tract")]
pub use backends::{TractEngine, TractLoader};
