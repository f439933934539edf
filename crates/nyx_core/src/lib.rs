//! Shared primitives for the Nyx cognitive orchestration engine: config,
//! error taxonomy, and stable identifiers. Kept deliberately small and
//! dependency-light — every other crate in the workspace depends on this
//! one, so it must not pull in anything crate-specific (no sqlx, no reqwest).

pub mod config;
pub mod error;
pub mod ids;

pub use config::EngineConfig;
pub use error::{PipelineError, StartupError, TransientError};
pub use ids::{SessionId, UserId};
