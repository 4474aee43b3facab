//! Error types for the resolution engine.
//!
//! None of these escape [`crate::engine::ResolutionEngine::resolve`]; they are
//! folded into a not-found resolution plus a log annotation.

use std::time::Duration;

/// Failure reported by the configuration store collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Config store unavailable: {0}")]
    Unavailable(String),
}

/// Endpoint configuration could not be used for this request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Unknown endpoint {method} {path} in project {project}")]
    UnknownEndpoint {
        project: String,
        method: String,
        path: String,
    },

    #[error("Endpoint {0} is inactive")]
    Inactive(String),
}

/// A single condition could not be evaluated. The condition counts as
/// non-matching.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EvaluationError {
    #[error("Invalid regex {pattern:?}: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Regex {pattern:?} exceeded its time budget ({elapsed:?})")]
    RegexTimeout { pattern: String, elapsed: Duration },

    #[error("Malformed condition: {0}")]
    MalformedCondition(String),
}
