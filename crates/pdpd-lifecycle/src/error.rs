//! Lifecycle error types.

use pdpd_controller::ControllerError;
use pdpd_core::error::{ConfigError, PdpdError, TopicError};
use pdpd_core::types::PdpState;
use thiserror::Error;

pub type LifecycleResult<T> = std::result::Result<T, LifecycleError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// Operation not permitted in the current state
    #[error("{operation} is not supported in state {state}")]
    Unsupported { operation: String, state: PdpState },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Messaging resources could not be allocated
    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),

    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl LifecycleError {
    pub fn unsupported(operation: impl Into<String>, state: PdpState) -> Self {
        Self::Unsupported {
            operation: operation.into(),
            state,
        }
    }
}

impl From<PdpdError> for LifecycleError {
    fn from(err: PdpdError) -> Self {
        match err {
            PdpdError::Config(e) => Self::Config(e),
            PdpdError::Topic(e) => Self::Topic(e),
            PdpdError::Codec(e) => Self::Config(ConfigError::InvalidFormat {
                reason: e.to_string(),
            }),
            PdpdError::Scheduler(reason) => Self::Scheduler(reason),
        }
    }
}
