//! Error types for session-core operations.
//!
//! Read-modify-write cycles never surface these to callers: the serializer
//! logs them and the shared record self-heals on the next cycle. They exist
//! for the persist/clear paths of each backend and for configuration loading.

use std::path::PathBuf;

/// All errors that can occur in session-core operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    // ─────────────────────────────────────────────────────────────────────
    // Record Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Session entry cannot be encoded losslessly: {key}={value}")]
    InvalidEntry { key: String, value: String },

    #[error("Invalid product key {key:?}: must match [a-zA-Z0-9_]+ and not be id, created or expire")]
    InvalidProductKey { key: String },

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    NoHomeDir,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SessionError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SessionError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        SessionError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using SessionError.
pub type Result<T> = std::result::Result<T, SessionError>;

// Conversion for string error compatibility
impl From<SessionError> for String {
    fn from(err: SessionError) -> String {
        err.to_string()
    }
}
