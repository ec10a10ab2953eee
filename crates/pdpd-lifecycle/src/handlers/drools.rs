use pdpd_controller::PolicyController;
use pdpd_core::policy::{ToscaConceptIdentifier, ToscaPolicy};
use std::sync::Arc;
use tracing::{debug, warn};

use super::PolicyTypeHandler;

/// Inserts policies of one non-native type as facts into every brained
/// controller that supports the type.
pub struct DroolsPolicyHandler {
    policy_type: ToscaConceptIdentifier,
    controllers: Vec<Arc<PolicyController>>,
}

impl DroolsPolicyHandler {
    pub fn new(policy_type: ToscaConceptIdentifier, controllers: Vec<Arc<PolicyController>>) -> Self {
        Self {
            policy_type,
            controllers,
        }
    }

    /// Controllers a policy applies to: the one it names, or all of them.
    fn targets<'a>(&'a self, policy: &'a ToscaPolicy) -> impl Iterator<Item = &'a Arc<PolicyController>> {
        let wanted = policy.controller_name();
        self.controllers
            .iter()
            .filter(move |c| wanted.map_or(true, |name| c.name() == name))
    }
}

impl PolicyTypeHandler for DroolsPolicyHandler {
    fn policy_type(&self) -> &ToscaConceptIdentifier {
        &self.policy_type
    }

    fn deploy(&self, policy: &ToscaPolicy) -> bool {
        let mut success = true;
        let mut enacted = 0;
        for controller in self.targets(policy) {
            if controller.drools().offer_policy(policy) {
                enacted += 1;
            } else {
                warn!(policy = %policy.identifier(), controller = %controller.name(), "Policy not inserted");
                success = false;
            }
        }
        if enacted == 0 {
            debug!(policy = %policy.identifier(), "No brained controller for policy");
        }
        success
    }

    fn undeploy(&self, policy: &ToscaPolicy) -> bool {
        for controller in self.targets(policy) {
            if !controller.drools().delete_policy(policy) {
                debug!(policy = %policy.identifier(), controller = %controller.name(), "Policy was not a fact");
            }
        }
        true
    }
}
