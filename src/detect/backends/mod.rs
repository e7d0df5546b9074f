pub mod replay;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use replay::{ReleaseProbe, ReplayEngine, ReplayLoader};

#[cfg(feature = "backend-tract")]
pub use tract::{TractEngine, TractLoader};
