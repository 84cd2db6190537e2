//! Error types for the boardroom engine.
//!
//! A single [`Error`] enum covers every failure the engine surfaces to
//! callers, with classification helpers (`is_retryable`, `is_fatal`) and
//! CLI exit-code mapping.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the boardroom engine.
#[derive(Debug, Error)]
pub enum Error {
    // ---- Input validation ----
    /// A request failed validation before reaching a backend.
    #[error("invalid input: {0}")]
    BadInput(String),

    /// A trait overlay violates the base schema or its constraint rules.
    #[error("trait constraint violation: {0}")]
    TraitConstraint(String),

    // ---- Backend failures ----
    /// Transient backend failure (timeouts, 429, 5xx). Retried internally
    /// by the retry wrapper; only surfaced once retries are exhausted.
    #[error("backend temporarily unavailable: {message}")]
    BackendRetryable {
        message: String,
        status: Option<u16>,
    },

    /// Non-retryable backend failure (auth, bad request, malformed reply).
    #[error("backend error: {message}")]
    BackendFatal {
        message: String,
        status: Option<u16>,
    },

    // ---- Memory ----
    /// An imported memory blob could not be parsed. The owning persona
    /// falls back to empty memory.
    #[error("memory blob unparsable: {0}")]
    MemoryCorrupt(String),

    // ---- Persistence ----
    /// A store read or write failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    // ---- Lifecycle ----
    /// The session context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// A session or backend-call deadline expired.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// A non-blocking submit was rejected because the orchestrator is
    /// saturated.
    #[error("orchestrator busy: {0}")]
    Busy(String),

    /// Lookup failures for personas, boards, sessions, providers.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Invalid configuration detected at construction time.
    #[error("configuration error: {0}")]
    Config(String),

    // ---- Passthrough conversions ----
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Whether the retry wrapper should try this error again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::BackendRetryable { .. } => true,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether this error should abort the whole session rather than a
    /// single persona turn.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::Persistence(_)
                | Error::Cancelled
                | Error::DeadlineExceeded(_)
                | Error::Config(_)
        )
    }

    /// Exit code for the CLI front-end.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::BadInput(_) | Error::NotFound { .. } => 2,
            Error::Config(_) | Error::TraitConstraint(_) => 3,
            Error::BackendRetryable { .. } | Error::BackendFatal { .. } => 4,
            Error::DeadlineExceeded(_) => 5,
            _ => 1,
        }
    }

    /// Build a backend error from an HTTP status and message, classifying
    /// retryability from the status code.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 429 || (500..=599).contains(&status) {
            Error::BackendRetryable {
                message,
                status: Some(status),
            }
        } else {
            Error::BackendFatal {
                message,
                status: Some(status),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_classification() {
        assert!(Error::from_http_status(429, "rate limited").is_retryable());
        assert!(Error::from_http_status(503, "unavailable").is_retryable());
        assert!(!Error::from_http_status(401, "bad key").is_retryable());
        assert!(!Error::from_http_status(400, "bad request").is_retryable());
    }

    #[test]
    fn test_structural_errors() {
        assert!(Error::Persistence("disk full".into()).is_structural());
        assert!(Error::Cancelled.is_structural());
        assert!(!Error::BadInput("empty prompt".into()).is_structural());
        assert!(!Error::from_http_status(500, "boom").is_structural());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::BadInput("x".into()).exit_code(), 2);
        assert_eq!(Error::Config("x".into()).exit_code(), 3);
        assert_eq!(Error::from_http_status(401, "x").exit_code(), 4);
        assert_eq!(Error::DeadlineExceeded("x".into()).exit_code(), 5);
    }
}
