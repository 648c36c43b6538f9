//! Error types for collaborator calls

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a collaborator may return to the pipeline.
///
/// The variants are grouped by how the dispatcher reacts to them:
/// structural errors ([`is_structural`](Self::is_structural)) mean the
/// backend cannot serve this request at all, retryable errors
/// ([`is_retryable`](Self::is_retryable)) may succeed on a second attempt.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CollaboratorError {
    /// Backend throttled the request
    #[error("rate limited{}", retry_hint(.retry_after_ms))]
    RateLimited { retry_after_ms: Option<u64> },

    /// Missing or rejected credentials
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Service not reachable or not configured
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The collaborator gave up on its own deadline
    #[error("collaborator timed out")]
    Timeout,

    /// Compute engine rejected or failed the job
    #[error("compute error: {0}")]
    Compute(String),

    /// Response could not be interpreted
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Network / transport failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl CollaboratorError {
    /// The backend cannot serve this request at all; retrying is pointless.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Unavailable(_))
    }

    /// A later attempt of the same idempotent call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transport(_))
    }
}

fn retry_hint(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(" (retry after {ms}ms)"),
        None => String::new(),
    }
}

/// Returned when a capability name is not part of the closed set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown capability: {name}")]
pub struct CapabilityParseError {
    pub name: String,
}
