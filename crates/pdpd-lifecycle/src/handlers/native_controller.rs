use pdpd_controller::{ControllerError, PolicyControllerFactory};
use pdpd_core::policy::{ToscaConceptIdentifier, ToscaPolicy};
use std::sync::Arc;
use tracing::{info, warn};

use super::PolicyTypeHandler;
use crate::native::ControllerPolicyProperties;

/// Creates and destroys named controllers.
pub struct NativeControllerHandler {
    policy_type: ToscaConceptIdentifier,
    factory: Arc<PolicyControllerFactory>,
}

impl NativeControllerHandler {
    pub fn new(factory: Arc<PolicyControllerFactory>) -> Self {
        Self {
            policy_type: ToscaConceptIdentifier::native_controller(),
            factory,
        }
    }
}

impl PolicyTypeHandler for NativeControllerHandler {
    fn policy_type(&self) -> &ToscaConceptIdentifier {
        &self.policy_type
    }

    fn deploy(&self, policy: &ToscaPolicy) -> bool {
        let props = match ControllerPolicyProperties::from_policy(policy) {
            Ok(p) => p,
            Err(e) => {
                warn!(policy = %policy.identifier(), error = %e, "Invalid controller policy");
                return false;
            }
        };

        if self.factory.contains(&props.controller_name) {
            info!(
                policy = %policy.identifier(),
                controller = %props.controller_name,
                "Controller already exists"
            );
            return true;
        }

        match self.factory.build(&props.controller_name, props.to_properties()) {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    policy = %policy.identifier(),
                    controller = %props.controller_name,
                    error = %e,
                    "Cannot create controller"
                );
                false
            }
        }
    }

    fn undeploy(&self, policy: &ToscaPolicy) -> bool {
        let props = match ControllerPolicyProperties::from_policy(policy) {
            Ok(p) => p,
            Err(e) => {
                warn!(policy = %policy.identifier(), error = %e, "Invalid controller policy");
                return false;
            }
        };

        match self.factory.destroy(&props.controller_name) {
            Ok(()) | Err(ControllerError::NotFound { .. }) => true,
            Err(e) => {
                warn!(
                    policy = %policy.identifier(),
                    controller = %props.controller_name,
                    error = %e,
                    "Cannot destroy controller"
                );
                false
            }
        }
    }
}
