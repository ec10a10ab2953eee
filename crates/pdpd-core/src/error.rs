//! Error types shared by the pdpd crates.
//!
//! Configuration, topic and codec faults are separate enums so that callers can
//! tell a fatal construction problem from an operational one. All variants are
//! serializable so they can be embedded in status responses and logs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using PdpdError as the error type.
pub type Result<T> = std::result::Result<T, PdpdError>;

/// Top-level error type for pdpd operations.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum PdpdError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Topic endpoint errors
    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),

    /// Message encode/decode errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Scheduler could not be created or has been shut down
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

/// Errors related to configuration.
///
/// These errors occur when loading, parsing, or validating configuration files
/// and property maps.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Missing required configuration field
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    /// Duplicate controller name
    #[error("Duplicate controller name: {name}")]
    DuplicateController { name: String },
}

impl ConfigError {
    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a validation failed error.
    pub fn validation_failed(reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            reason: reason.into(),
        }
    }
}

/// Errors raised by topic endpoints.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum TopicError {
    /// No topics were listed for the infrastructure
    #[error("No {kind} topics configured")]
    NoTopics { kind: String },

    /// The requested topic does not exist
    #[error("Unknown topic: {topic}")]
    UnknownTopic { topic: String },

    /// The endpoint is not started
    #[error("Topic {topic} is not started")]
    NotStarted { topic: String },

    /// The endpoint refused the message
    #[error("Send to topic {topic} failed: {reason}")]
    SendFailed { topic: String, reason: String },
}

/// Errors raised while encoding or decoding messages.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum CodecError {
    /// The payload could not be decoded
    #[error("Decode failed: {reason}")]
    Decode { reason: String },

    /// The value could not be encoded
    #[error("Encode failed: {reason}")]
    Encode { reason: String },

    /// The payload decoded but is not a valid message
    #[error("Invalid message: {reason}")]
    Invalid { reason: String },
}

impl CodecError {
    /// Creates a decode error.
    pub fn decode(reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            reason: reason.to_string(),
        }
    }

    /// Creates an encode error.
    pub fn encode(reason: impl std::fmt::Display) -> Self {
        Self::Encode {
            reason: reason.to_string(),
        }
    }

    /// Creates an invalid message error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::decode(err)
        } else {
            Self::encode(err)
        }
    }
}
