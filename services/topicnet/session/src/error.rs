//! Error types surfaced to callers of the session crate.

use crate::rest::RestError;
use crate::schema::SchemaError;
use crate::transport::TransportError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors returned by configuration, resolution and session factories
#[derive(Error, Debug)]
pub enum SessionError {
    /// A `start_*` method was called while a discovery mode is already active
    #[error("session configuration is already initialized")]
    AlreadyInitialized,

    /// Operation not valid for the current discovery mode
    #[error("{operation} is not valid in {mode} mode")]
    InvalidMode {
        /// Name of the current mode
        mode: &'static str,
        /// Operation that was attempted
        operation: String,
    },

    /// Registry or TNS config file missing or unparsable
    #[error("invalid config file {path:?}: {reason}")]
    InvalidConfigFile {
        /// Path that was read
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Schema parse, registration or payload validation failure
    #[error("schema error: {source}")]
    Schema {
        /// Ids registered earlier in the same batch; they stay registered
        registered: Vec<String>,
        /// Underlying schema failure
        #[source]
        source: SchemaError,
    },

    /// Schema id is not registered with this process
    #[error("unknown schema id: {0}")]
    UnknownSchema(String),

    /// Malformed or incomplete TNS/registry JSON
    #[error("invalid response from {url}: {reason}")]
    InvalidResponse {
        /// URL that produced the response
        url: String,
        /// What was wrong with it
        reason: String,
    },

    /// Network or HTTP failure talking to the TNS or registry
    #[error("rest call failed: {0}")]
    Rest(#[from] RestError),

    /// Key material has the wrong length, character set or is missing
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A secured operation was given a topic that is not flagged secured
    #[error("topic {0} is not secured")]
    TopicNotSecured(String),

    /// Empty topic list, empty name, mixed security flags and similar misuse
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Bind, connect or send failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    pub(crate) fn invalid_mode(mode: &'static str, operation: impl Into<String>) -> Self {
        SessionError::InvalidMode {
            mode,
            operation: operation.into(),
        }
    }

    pub(crate) fn invalid_response(url: &str, reason: impl Into<String>) -> Self {
        SessionError::InvalidResponse {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<SchemaError> for SessionError {
    fn from(source: SchemaError) -> Self {
        SessionError::Schema {
            registered: Vec::new(),
            source,
        }
    }
}

/// Per-message failure reported through a subscriber callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Payload did not decode against the topic's schema
    DeserializationFailed,
    /// Sealed payload failed authentication
    DecryptionFailed,
    /// Message arrived for a topic this subscriber did not open
    UnknownTopic,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::DeserializationFailed => "deserialization_failed",
            ErrorCode::DecryptionFailed => "decryption_failed",
            ErrorCode::UnknownTopic => "unknown_topic",
        };
        f.write_str(name)
    }
}
