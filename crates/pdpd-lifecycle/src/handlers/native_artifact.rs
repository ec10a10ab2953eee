use pdpd_controller::{DroolsConfiguration, PolicyControllerFactory};
use pdpd_core::policy::{ToscaConceptIdentifier, ToscaPolicy};
use std::sync::Arc;
use tracing::{debug, warn};

use super::PolicyTypeHandler;
use crate::native::ArtifactPolicyProperties;

/// Loads and unloads rules artifacts in existing controllers.
pub struct NativeArtifactHandler {
    policy_type: ToscaConceptIdentifier,
    factory: Arc<PolicyControllerFactory>,
}

impl NativeArtifactHandler {
    pub fn new(factory: Arc<PolicyControllerFactory>) -> Self {
        Self {
            policy_type: ToscaConceptIdentifier::native_artifact(),
            factory,
        }
    }

    fn properties(policy: &ToscaPolicy) -> Option<ArtifactPolicyProperties> {
        ArtifactPolicyProperties::from_policy(policy)
            .map_err(|e| warn!(policy = %policy.identifier(), error = %e, "Invalid artifact policy"))
            .ok()
    }
}

impl PolicyTypeHandler for NativeArtifactHandler {
    fn policy_type(&self) -> &ToscaConceptIdentifier {
        &self.policy_type
    }

    fn deploy(&self, policy: &ToscaPolicy) -> bool {
        let Some(props) = Self::properties(policy) else {
            return false;
        };
        let name = &props.controller.name;

        if !self.factory.contains(name) {
            warn!(policy = %policy.identifier(), controller = %name, "Artifact targets unknown controller");
            return false;
        }

        match self.factory.patch(name, props.drools_configuration()) {
            Ok(_) => true,
            Err(e) => {
                warn!(policy = %policy.identifier(), controller = %name, error = %e, "Cannot load artifact");
                false
            }
        }
    }

    fn undeploy(&self, policy: &ToscaPolicy) -> bool {
        let Some(props) = Self::properties(policy) else {
            return false;
        };
        let name = &props.controller.name;

        let Ok(controller) = self.factory.get(name) else {
            debug!(policy = %policy.identifier(), controller = %name, "Controller already gone");
            return true;
        };

        // only unload when this artifact is the one loaded
        let loaded = controller.drools().configuration();
        let wanted = props.drools_configuration();
        if loaded.group_id != wanted.group_id || loaded.artifact_id != wanted.artifact_id {
            debug!(policy = %policy.identifier(), controller = %name, loaded = %loaded, "Artifact not loaded");
            return true;
        }

        match self.factory.patch(name, DroolsConfiguration::brainless()) {
            Ok(_) => true,
            Err(e) => {
                warn!(policy = %policy.identifier(), controller = %name, error = %e, "Cannot unload artifact");
                false
            }
        }
    }
}
