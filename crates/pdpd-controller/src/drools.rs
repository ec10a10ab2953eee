//! Rule session stand-in.
//!
//! Rule execution is outside this runtime; a [`DroolsController`] keeps what the
//! rest of the system observes about a rule engine: the loaded artifact
//! coordinates (brained vs brainless) and the working memory of facts.

use parking_lot::{Mutex, RwLock};
use pdpd_core::policy::ToscaPolicy;
use pdpd_core::properties::Properties;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{ControllerError, ControllerResult};

pub const NO_GROUP_ID: &str = "NO-GROUP-ID";
pub const NO_ARTIFACT_ID: &str = "NO-ARTIFACT-ID";
pub const NO_VERSION: &str = "NO-VERSION";

pub const RULES_GROUP_ID: &str = "rules.groupId";
pub const RULES_ARTIFACT_ID: &str = "rules.artifactId";
pub const RULES_VERSION: &str = "rules.version";

/// Maven-style coordinates of a rules artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroolsConfiguration {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
}

impl DroolsConfiguration {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
        }
    }

    /// Coordinates of a controller with no rules loaded.
    pub fn brainless() -> Self {
        Self::new(NO_GROUP_ID, NO_ARTIFACT_ID, NO_VERSION)
    }

    pub fn is_brainless(&self) -> bool {
        self.group_id == NO_GROUP_ID
            || self.artifact_id == NO_ARTIFACT_ID
            || self.version == NO_VERSION
    }

    /// `groupId:artifactId` key used by the coordinates index.
    pub fn coordinates_key(&self) -> String {
        format!("{}:{}", self.group_id, self.artifact_id)
    }

    /// Reads `rules.*` properties, defaulting to brainless.
    pub fn from_properties(props: &Properties) -> ControllerResult<Self> {
        let config = Self::new(
            props.get_or(RULES_GROUP_ID, NO_GROUP_ID),
            props.get_or(RULES_ARTIFACT_ID, NO_ARTIFACT_ID),
            props.get_or(RULES_VERSION, NO_VERSION),
        );
        config.validate()?;
        Ok(config)
    }

    /// Either fully brainless or fully specified.
    pub fn validate(&self) -> ControllerResult<()> {
        let markers = [
            self.group_id == NO_GROUP_ID,
            self.artifact_id == NO_ARTIFACT_ID,
            self.version == NO_VERSION,
        ];
        let brainless_parts = markers.iter().filter(|m| **m).count();
        if brainless_parts != 0 && brainless_parts != markers.len() {
            return Err(ControllerError::invalid(format!(
                "partially specified coordinates {}",
                self
            )));
        }
        if [&self.group_id, &self.artifact_id, &self.version]
            .iter()
            .any(|s| s.trim().is_empty())
        {
            return Err(ControllerError::invalid("blank coordinate"));
        }
        Ok(())
    }

    pub fn write_properties(&self, props: &mut Properties) {
        props.set(RULES_GROUP_ID, &self.group_id);
        props.set(RULES_ARTIFACT_ID, &self.artifact_id);
        props.set(RULES_VERSION, &self.version);
    }
}

impl fmt::Display for DroolsConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)
    }
}

/// A fact in working memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Fact {
    Policy(ToscaPolicy),
    Event { topic: String, value: Value },
}

/// Rules artifact binding and working memory of one controller.
#[derive(Debug)]
pub struct DroolsController {
    config: RwLock<DroolsConfiguration>,
    session: Mutex<Vec<Fact>>,
}

impl DroolsController {
    pub fn new(config: DroolsConfiguration) -> Self {
        Self {
            config: RwLock::new(config),
            session: Mutex::new(Vec::new()),
        }
    }

    pub fn configuration(&self) -> DroolsConfiguration {
        self.config.read().clone()
    }

    pub fn is_brained(&self) -> bool {
        !self.config.read().is_brainless()
    }

    /// Replaces the coordinates. Becoming brainless, or switching artifacts,
    /// discards the session. Returns true if anything changed.
    pub(crate) fn update(&self, next: DroolsConfiguration) -> bool {
        let mut config = self.config.write();
        if *config == next {
            return false;
        }
        let artifact_changed =
            config.group_id != next.group_id || config.artifact_id != next.artifact_id;
        if next.is_brainless() || artifact_changed {
            self.session.lock().clear();
        }
        *config = next;
        true
    }

    /// Inserts a fact. Refused when no rules are loaded.
    pub fn insert(&self, fact: Fact) -> bool {
        if !self.is_brained() {
            return false;
        }
        self.session.lock().push(fact);
        true
    }

    /// Inserts a policy unless an equal one is already present.
    pub fn offer_policy(&self, policy: &ToscaPolicy) -> bool {
        if !self.is_brained() {
            return false;
        }
        let mut session = self.session.lock();
        let present = session
            .iter()
            .any(|f| matches!(f, Fact::Policy(p) if p == policy));
        if !present {
            session.push(Fact::Policy(policy.clone()));
        }
        true
    }

    /// Retracts every fact for the policy's identifier. Returns true if any
    /// fact was removed.
    pub fn delete_policy(&self, policy: &ToscaPolicy) -> bool {
        let id = policy.identifier();
        let mut session = self.session.lock();
        let before = session.len();
        session.retain(|f| !matches!(f, Fact::Policy(p) if p.identifier() == id));
        session.len() != before
    }

    pub fn facts(&self) -> Vec<Fact> {
        self.session.lock().clone()
    }

    pub fn policies(&self) -> Vec<ToscaPolicy> {
        self.session
            .lock()
            .iter()
            .filter_map(|f| match f {
                Fact::Policy(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<Value> {
        self.session
            .lock()
            .iter()
            .filter_map(|f| match f {
                Fact::Event { value, .. } => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn fact_count(&self) -> usize {
        self.session.lock().len()
    }

    pub fn purge(&self) {
        self.session.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdpd_core::policy::ToscaConceptIdentifier;
    use serde_json::{json, Map};

    fn policy(name: &str) -> ToscaPolicy {
        let mut props = Map::new();
        props.insert("k".into(), json!("v"));
        ToscaPolicy::new(name, "1.0.0", &ToscaConceptIdentifier::new("t", "1.0.0"), props)
    }

    #[test]
    fn test_configuration_validation() {
        assert!(DroolsConfiguration::brainless().validate().is_ok());
        assert!(DroolsConfiguration::new("org.onap", "rules", "1.0.0").validate().is_ok());
        assert!(DroolsConfiguration::new("org.onap", NO_ARTIFACT_ID, "1.0.0")
            .validate()
            .is_err());

        let props = Properties::new()
            .with(RULES_GROUP_ID, "g")
            .with(RULES_ARTIFACT_ID, "a")
            .with(RULES_VERSION, "1");
        let config = DroolsConfiguration::from_properties(&props).unwrap();
        assert_eq!(config.coordinates_key(), "g:a");
        assert!(DroolsConfiguration::from_properties(&Properties::new())
            .unwrap()
            .is_brainless());
    }

    #[test]
    fn test_brainless_refuses_facts() {
        let drools = DroolsController::new(DroolsConfiguration::brainless());
        assert!(!drools.offer_policy(&policy("p")));
        assert_eq!(drools.fact_count(), 0);
    }

    #[test]
    fn test_offer_policy_is_idempotent() {
        let drools = DroolsController::new(DroolsConfiguration::new("g", "a", "1"));
        let p = policy("p");
        assert!(drools.offer_policy(&p));
        assert!(drools.offer_policy(&p));
        assert_eq!(drools.policies(), vec![p.clone()]);
        assert!(drools.delete_policy(&p));
        assert!(!drools.delete_policy(&p));
    }

    #[test]
    fn test_update_semantics() {
        let drools = DroolsController::new(DroolsConfiguration::new("g", "a", "1"));
        drools.offer_policy(&policy("p"));

        // version bump keeps the session
        assert!(drools.update(DroolsConfiguration::new("g", "a", "2")));
        assert_eq!(drools.fact_count(), 1);
        assert!(!drools.update(DroolsConfiguration::new("g", "a", "2")));

        // going brainless purges it
        assert!(drools.update(DroolsConfiguration::brainless()));
        assert!(!drools.is_brained());
        assert_eq!(drools.fact_count(), 0);
    }
}
