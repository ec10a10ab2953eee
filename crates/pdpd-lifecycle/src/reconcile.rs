//! Desired versus deployed policy reconciliation.
//!
//! Pure planning functions. The lifecycle state machine applies the plan
//! through the policy-type handlers.

use pdpd_core::policy::{
    ToscaConceptIdentifier, ToscaPolicy, NATIVE_ARTIFACT_TYPE, NATIVE_CONTROLLER_TYPE,
};
use std::collections::BTreeMap;

/// Policies keyed by identifier.
pub type PolicySet = BTreeMap<ToscaConceptIdentifier, ToscaPolicy>;

/// Deploy precedence: controllers, then artifacts, then everything else.
pub fn precedence(policy: &ToscaPolicy) -> u8 {
    match policy.type_name.as_str() {
        NATIVE_CONTROLLER_TYPE => 0,
        NATIVE_ARTIFACT_TYPE => 1,
        _ => 2,
    }
}

/// `(active ∪ deploy) − undeploy`, keyed by identifier. Deploy entries
/// replace active entries with the same identifier.
pub fn merge_policies(
    active: &PolicySet,
    deploy: &[ToscaPolicy],
    undeploy: &[ToscaConceptIdentifier],
) -> PolicySet {
    let mut merged = active.clone();
    for policy in deploy {
        merged.insert(policy.identifier(), policy.clone());
    }
    for id in undeploy {
        merged.remove(id);
    }
    merged
}

/// A changed controller policy that still names the same controller is
/// redeployed over the live controller, keeping its rules and facts.
pub fn updates_in_place(old: &ToscaPolicy, new: &ToscaPolicy) -> bool {
    old.type_name == NATIVE_CONTROLLER_TYPE
        && new.type_name == NATIVE_CONTROLLER_TYPE
        && old.controller_name().is_some()
        && old.controller_name() == new.controller_name()
}

/// Orders policies by precedence, then by identifier, so the result does not
/// depend on input order.
pub fn deploy_order(policies: impl IntoIterator<Item = ToscaPolicy>) -> Vec<ToscaPolicy> {
    let mut ordered: Vec<ToscaPolicy> = policies.into_iter().collect();
    ordered.sort_by(|a, b| {
        precedence(a)
            .cmp(&precedence(b))
            .then_with(|| a.identifier().cmp(&b.identifier()))
            .then_with(|| a.type_identifier().cmp(&b.type_identifier()))
    });
    ordered
}

/// Exact reverse of [`deploy_order`].
pub fn undeploy_order(policies: impl IntoIterator<Item = ToscaPolicy>) -> Vec<ToscaPolicy> {
    let mut ordered = deploy_order(policies);
    ordered.reverse();
    ordered
}

/// Actions moving the active set to the candidate set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Active entries that are removed or replaced, in undeploy order.
    pub undeploy: Vec<ToscaPolicy>,
    /// Candidate entries that are new or changed, in deploy order.
    pub deploy: Vec<ToscaPolicy>,
    pub candidate: PolicySet,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.undeploy.is_empty() && self.deploy.is_empty()
    }
}

/// Computes the undeploy and deploy actions for an update.
///
/// Redeploying an identical policy yields no action. A policy whose
/// identifier is kept but whose content changed is undeployed in its old form
/// and deployed in its new one, except for controller policies updated in
/// place, which are only deployed.
pub fn plan(
    active: &PolicySet,
    deploy: &[ToscaPolicy],
    undeploy: &[ToscaConceptIdentifier],
) -> ReconcilePlan {
    let candidate = merge_policies(active, deploy, undeploy);

    let removed = active
        .iter()
        .filter(|(id, policy)| match candidate.get(*id) {
            Some(next) => next != *policy && !updates_in_place(policy, next),
            None => true,
        })
        .map(|(_, policy)| policy.clone());

    let added = candidate
        .iter()
        .filter(|(id, policy)| active.get(*id) != Some(*policy))
        .map(|(_, policy)| policy.clone());

    ReconcilePlan {
        undeploy: undeploy_order(removed),
        deploy: deploy_order(added),
        candidate,
    }
}
