//! Pooling faults.
//!
//! Configuration faults are fatal when a manager is built. Protocol faults mean
//! the pooling topic cannot be wired; the feature reacts by disabling pooling
//! for that controller. Publish faults are logged and swallowed by callers on
//! the event path.

use pdpd_core::error::{ConfigError, PdpdError};
use thiserror::Error;

pub type PoolingResult<T> = std::result::Result<T, PoolingError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolingError {
    /// Bad or missing pooling properties
    #[error("Pooling configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The pooling topic has no usable source or sink
    #[error("Pooling protocol error: {reason}")]
    Protocol { reason: String },

    /// A message could not be published
    #[error("Publish on {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    /// The manager's scheduler could not be created
    #[error("Pooling scheduler error: {0}")]
    Scheduler(String),
}

impl PoolingError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    pub fn publish(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

impl From<PdpdError> for PoolingError {
    fn from(err: PdpdError) -> Self {
        match err {
            PdpdError::Config(e) => PoolingError::Config(e),
            other => PoolingError::Scheduler(other.to_string()),
        }
    }
}
