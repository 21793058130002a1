//! Error types for stratos-core.

use thiserror::Error;

/// Result type alias using stratos-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the orchestration pipeline.
///
/// Each variant corresponds to one of the failure classes a caller needs to
/// react to differently: validation failures are recoverable (annotate and
/// continue), provider/parse/storage/timeout failures abort the current
/// step and flip the run to `Failed`, and conflicts are returned to the
/// caller without mutating run state at all.
#[derive(Error, Debug)]
pub enum Error {
    /// The configured LLM provider returned a non-success response, or the
    /// HTTP call to it failed outright.
    #[error("LLM provider error: {provider} - {message}")]
    Provider { provider: String, message: String },

    /// The LLM's response text could not be parsed into usable JSON by any
    /// of the gateway's extraction strategies.
    #[error("failed to parse LLM response as JSON: {0}")]
    Parse(String),

    /// A parsed value did not satisfy the shape or constraints required of
    /// it (missing field, wrong type, value out of the allowed set, ...).
    #[error("validation error: {0}")]
    Validation(#[from] crate::validation::ValidationError),

    /// The persistence collaborator failed to read or write state.
    #[error("storage error: {0}")]
    Storage(String),

    /// The requested state transition conflicts with the run's current
    /// state (e.g. resuming a run that isn't waiting on HITL input).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A step exceeded its soft timeout.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The run was cancelled by an external caller.
    #[error("run cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error not otherwise classified above.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error (missing API key, invalid model id, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violation; not expected to be reachable in
    /// normal operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a cancelled error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True for errors that should flip a run to `Failed` rather than be
    /// annotated and continued.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            Error::Provider { .. } | Error::Parse(_) | Error::Storage(_) | Error::Timeout { .. }
        )
    }
}
