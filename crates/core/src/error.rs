//! Host-wide error taxonomy section 7.
//!
//! Every fallible operation in the agent, backend, and update coordinator
//! returns a [`HostError`] so that the HTTP layer can map it to the right
//! status code without re-deriving the error's retry/severity semantics at
//! every call site.

use thiserror::Error;

/// A distinct taxonomy value surfaced on the HTTP layer.
///
/// Each variant carries a human-readable detail string. `Transient` errors
/// are safe to retry with backoff; `Fatal` errors mean the process cannot
/// continue and should exit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    /// Bad input: malformed UUID, empty mountspecs, reserved port, a
    /// non-system job requesting a host namespace, etc. Maps to HTTP 400.
    #[error("validation error: {0}")]
    Validation(String),

    /// The referenced job, decision, or resource does not exist on this
    /// host. Maps to HTTP 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation would violate a uniqueness invariant (duplicate job
    /// id, conflicting ports). Maps to HTTP 409.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller exceeded a rate limit. Maps to HTTP 429 with `Retry: true`.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Missing or invalid `Auth-Key`/Basic credential. Maps to HTTP 401.
    #[error("unauthorized")]
    Unauthorized,

    /// A network failure, an unreachable discoverd, or a partial stream
    /// that the caller should retry with backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// Unrecoverable startup configuration failure. The process should
    /// exit rather than attempt to serve traffic.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl HostError {
    /// Whether retrying the operation that produced this error, after a
    /// backoff delay, might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HostError::Transient(_) | HostError::RateLimited(_))
    }

    /// Attach a manual-remedy hint to the error's detail string. Per section 7,
    /// user-visible failure strings must always include a hint when the
    /// agent cannot proceed without operator action.
    pub fn with_remedy(self, remedy: &str) -> Self {
        let annotate = |msg: String| format!("{msg} ({remedy})");
        match self {
            HostError::Validation(m) => HostError::Validation(annotate(m)),
            HostError::NotFound(m) => HostError::NotFound(annotate(m)),
            HostError::Conflict(m) => HostError::Conflict(annotate(m)),
            HostError::RateLimited(m) => HostError::RateLimited(annotate(m)),
            HostError::Transient(m) => HostError::Transient(annotate(m)),
            HostError::Fatal(m) => HostError::Fatal(annotate(m)),
            HostError::Unauthorized => HostError::Unauthorized,
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;
