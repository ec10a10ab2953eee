//! # pdpd Core
//!
//! Core types, error handling, and configuration for the pdpd policy decision
//! point runtime.
//!
//! - **Policy**: TOSCA policies and `(name, version)` identifiers, plus the
//!   native policy type constants.
//! - **Types**: PAP/PDP control messages (`PdpUpdate`, `PdpStateChange`,
//!   `PdpStatus`) and the `PdpMessage` envelope.
//! - **Errors**: configuration, topic and codec error enums built on `thiserror`.
//! - **Configuration**: YAML files with environment overrides, and flat
//!   string `Properties` for controller and pooling settings.
//! - **Scheduler**: one single-threaded task executor per owning component.
//! - **Topic**: source/sink endpoint traits and an in-process broker.
//!
//! ## Example
//!
//! ```
//! use pdpd_core::policy::ToscaConceptIdentifier;
//! use pdpd_core::types::{PdpMessage, PdpState, PdpStateChange};
//!
//! let change = PdpStateChange::for_pdp("pdp-1", PdpState::Active);
//! let text = PdpMessage::StateChange(change).encode().unwrap();
//! assert!(text.contains("PDP_STATE_CHANGE"));
//!
//! let id: ToscaConceptIdentifier = "example.policy:1.0.0".parse().unwrap();
//! assert_eq!(id.version, "1.0.0");
//! ```

pub mod config;
pub mod error;
pub mod policy;
pub mod properties;
pub mod scheduler;
pub mod topic;
pub mod types;

pub use config::AppConfig;
pub use error::{PdpdError, Result};
pub use policy::{ToscaConceptIdentifier, ToscaPolicy};
pub use properties::Properties;
pub use scheduler::{ScheduledTask, Scheduler};
pub use types::{PdpMessage, PdpState, PdpStateChange, PdpStatus, PdpUpdate};
