//! Controller error types.

use pdpd_core::error::ConfigError;
use thiserror::Error;

pub type ControllerResult<T> = std::result::Result<T, ControllerError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControllerError {
    /// No controller with that name
    #[error("Controller not found: {name}")]
    NotFound { name: String },

    /// Rules coordinates already bound to another controller
    #[error("Coordinates {coordinates} already in use by controller {owner}")]
    DuplicateCoordinates { coordinates: String, owner: String },

    /// Rules configuration is incomplete or malformed
    #[error("Invalid rules configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// Operation refused on a locked controller
    #[error("Controller {name} is locked")]
    Locked { name: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ControllerError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}
