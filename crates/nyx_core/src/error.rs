//! Error taxonomy shared across the engine.
//!
//! Per §7: transient-upstream, bad-content, resource-unavailable, tool, and
//! persistence failures are all recoverable — only startup misconfiguration
//! is fatal. These types exist so callers can match on *kind* without
//! string-sniffing error messages.

use thiserror::Error;

/// An error that is worth retrying (network blips, timeouts, upstream 5xx).
#[derive(Debug, Error)]
pub enum TransientError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("upstream returned server error: {0}")]
    UpstreamServerError(String),
}

/// Errors surfaced by a pipeline stage. Every stage is expected to catch its
/// own failures and fall through to a default; this type exists for the
/// handful of places that need to distinguish "nothing happened" from
/// "something broke" (logging, tests), not for control flow that aborts a
/// whole session.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("llm gateway error: {0}")]
    Llm(String),
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),
    #[error("tool error: {0}")]
    Tool(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("malformed agent response: {0}")]
    BadContent(String),
}

/// Only this variant should cause a non-zero process exit.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("missing required configuration: {0}")]
    MissingConfig(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
