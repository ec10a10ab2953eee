//! Policy-type handlers.
//!
//! Every registered policy type maps to one handler that enacts and retracts
//! policies of that type. The two native types are always registered; each
//! non-native type is registered while at least one brained controller
//! declares it.

mod drools;
mod native_artifact;
mod native_controller;

pub use drools::DroolsPolicyHandler;
pub use native_artifact::NativeArtifactHandler;
pub use native_controller::NativeControllerHandler;

use pdpd_core::policy::{ToscaConceptIdentifier, ToscaPolicy};

/// Enacts and retracts policies of one type. Both operations are idempotent.
pub trait PolicyTypeHandler: Send + Sync {
    fn policy_type(&self) -> &ToscaConceptIdentifier;

    fn deploy(&self, policy: &ToscaPolicy) -> bool;

    fn undeploy(&self, policy: &ToscaPolicy) -> bool;
}
