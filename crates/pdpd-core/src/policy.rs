//! TOSCA policy model.
//!
//! Policies are consumed as-is from the PAP. A policy is identified by its
//! `(name, version)` pair; two policies with the same identifier but different
//! content are the same entity at different revisions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Policy type that creates and destroys named controllers.
pub const NATIVE_CONTROLLER_TYPE: &str = "onap.policies.native.drools.Controller";

/// Policy type that loads rules into an existing controller.
pub const NATIVE_ARTIFACT_TYPE: &str = "onap.policies.native.drools.Artifact";

/// Version shared by the native policy types.
pub const NATIVE_TYPE_VERSION: &str = "1.0.0";

/// Property naming the controller an operational policy targets.
pub const CONTROLLER_NAME_PROPERTY: &str = "controllerName";

/// A `(name, version)` identifier for policies and policy types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToscaConceptIdentifier {
    pub name: String,
    pub version: String,
}

impl ToscaConceptIdentifier {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Identifier of the native controller policy type.
    pub fn native_controller() -> Self {
        Self::new(NATIVE_CONTROLLER_TYPE, NATIVE_TYPE_VERSION)
    }

    /// Identifier of the native artifact policy type.
    pub fn native_artifact() -> Self {
        Self::new(NATIVE_ARTIFACT_TYPE, NATIVE_TYPE_VERSION)
    }
}

impl fmt::Display for ToscaConceptIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

impl FromStr for ToscaConceptIdentifier {
    type Err = ConfigError;

    /// Parses `name:version`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().rsplit_once(':') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                Ok(Self::new(name, version))
            }
            _ => Err(ConfigError::invalid_value(
                "policy type",
                format!("expected name:version, got '{}'", s),
            )),
        }
    }
}

/// A TOSCA policy as delivered by the PAP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToscaPolicy {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub type_version: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl ToscaPolicy {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        policy_type: &ToscaConceptIdentifier,
        properties: Map<String, Value>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            type_name: policy_type.name.clone(),
            type_version: policy_type.version.clone(),
            metadata: Map::new(),
            properties,
        }
    }

    /// The policy's own identifier.
    pub fn identifier(&self) -> ToscaConceptIdentifier {
        ToscaConceptIdentifier::new(&self.name, &self.version)
    }

    /// The identifier of the policy's type.
    pub fn type_identifier(&self) -> ToscaConceptIdentifier {
        ToscaConceptIdentifier::new(&self.type_name, &self.type_version)
    }

    /// The controller this policy is restricted to, if any.
    pub fn controller_name(&self) -> Option<&str> {
        self.properties
            .get(CONTROLLER_NAME_PROPERTY)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// True for the native controller and native artifact types.
    pub fn is_native(&self) -> bool {
        self.type_name == NATIVE_CONTROLLER_TYPE || self.type_name == NATIVE_ARTIFACT_TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifier_parse_and_display() {
        let id: ToscaConceptIdentifier = "onap.policies.Example:1.0.0".parse().unwrap();
        assert_eq!(id.name, "onap.policies.Example");
        assert_eq!(id.version, "1.0.0");
        assert_eq!(id.to_string(), "onap.policies.Example:1.0.0");

        assert!("no-version".parse::<ToscaConceptIdentifier>().is_err());
        assert!(":1.0.0".parse::<ToscaConceptIdentifier>().is_err());
    }

    #[test]
    fn test_policy_json_shape() {
        let policy: ToscaPolicy = serde_json::from_value(json!({
            "type": "onap.policies.controlloop.operational.common.Drools",
            "type_version": "1.0.0",
            "name": "operational.restart",
            "version": "1.0.0",
            "properties": { "controllerName": "usecases", "id": "x" }
        }))
        .unwrap();

        assert_eq!(
            policy.identifier(),
            ToscaConceptIdentifier::new("operational.restart", "1.0.0")
        );
        assert_eq!(policy.controller_name(), Some("usecases"));
        assert!(!policy.is_native());

        let out = serde_json::to_value(&policy).unwrap();
        assert_eq!(out["type"], "onap.policies.controlloop.operational.common.Drools");
    }

    #[test]
    fn test_native_types() {
        let ctl = ToscaPolicy::new("c", "1.0.0", &ToscaConceptIdentifier::native_controller(), Map::new());
        assert!(ctl.is_native());
        assert_eq!(ctl.controller_name(), None);
    }
}
