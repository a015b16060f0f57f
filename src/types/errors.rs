//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context. This enum is the single error type the
//! runtime surfaces to callers; it deliberately has no knowledge of any
//! transport (gRPC, HTTP, IPC) since none of those are part of this crate.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the pipeline runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration-time validation errors: cycles, unknown dependencies,
    /// self-references, missing model roles, duplicate stage names.
    #[error("validation error: {0}")]
    Validation(String),

    /// A lookup (envelope, thread, stage) found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stage executor returned an error (or panicked) and did not reroute
    /// `current_stage` away from the failure.
    #[error("stage execution error: {0}")]
    StageExecution(String),

    /// Internal/unexpected errors that don't fit another variant.
    #[error("internal error: {0}")]
    Internal(String),

    /// The run observed an external cancellation signal.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A stage-reported timeout (surfaced as a `Timeout` interrupt rather
    /// than this variant in normal operation; kept for adapter-level use).
    #[error("timeout: {0}")]
    Timeout(String),

    /// `resume()` was called without a pending interrupt on the envelope.
    #[error("no pending interrupt to resume")]
    ResumeWithoutInterrupt,

    /// Serialization/deserialization errors (envelope state, persisted dicts).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn stage_execution(msg: impl Into<String>) -> Self {
        Self::StageExecution(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(
            Error::validation("bad config").to_string(),
            "validation error: bad config"
        );
        assert_eq!(
            Error::ResumeWithoutInterrupt.to_string(),
            "no pending interrupt to resume"
        );
    }
}
