//! Property models of the native policy types.
//!
//! A native controller policy carries the controller name, its topics and a
//! free-form `customConfig` map. A native artifact policy names the rules
//! coordinates and the controller they load into.

use pdpd_controller::drools::DroolsConfiguration;
use pdpd_controller::CONTROLLER_NAME_PROPERTY;
use pdpd_core::error::CodecError;
use pdpd_core::policy::ToscaPolicy;
use pdpd_core::properties::Properties;
use pdpd_core::topic::CommInfrastructure;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Event class accepted on a topic, with an optional filter expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventConfig {
    pub event_class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicConfig {
    pub topic_name: String,
    #[serde(default)]
    pub events: Vec<EventConfig>,
}

/// `properties` of an `onap.policies.native.drools.Controller` policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerPolicyProperties {
    pub controller_name: String,
    #[serde(default)]
    pub source_topics: Vec<TopicConfig>,
    #[serde(default)]
    pub sink_topics: Vec<TopicConfig>,
    #[serde(default)]
    pub custom_config: BTreeMap<String, String>,
}

impl ControllerPolicyProperties {
    pub fn from_policy(policy: &ToscaPolicy) -> Result<Self, CodecError> {
        let props: Self = decode_properties(policy)?;
        if props.controller_name.trim().is_empty() {
            return Err(CodecError::invalid("controllerName must not be blank"));
        }
        Ok(props)
    }

    /// Flat controller properties: custom configuration, then topics and
    /// event classes under the `noop` infrastructure, then the name.
    pub fn to_properties(&self) -> Properties {
        let mut props: Properties = self.custom_config.iter().collect();
        let infra = CommInfrastructure::Noop;

        write_topics(&mut props, &infra.source_topics_key(), &self.source_topics);
        write_topics(&mut props, &infra.sink_topics_key(), &self.sink_topics);

        props.set(CONTROLLER_NAME_PROPERTY, &self.controller_name);
        props
    }
}

fn write_topics(props: &mut Properties, key: &str, topics: &[TopicConfig]) {
    if topics.is_empty() {
        return;
    }
    let names: Vec<&str> = topics.iter().map(|t| t.topic_name.as_str()).collect();
    props.set(key, names.join(","));

    for topic in topics {
        if topic.events.is_empty() {
            continue;
        }
        let classes: Vec<&str> = topic.events.iter().map(|e| e.event_class.as_str()).collect();
        let events_key = format!("{}.{}.events", key, topic.topic_name);
        props.set(&events_key, classes.join(","));
        for event in &topic.events {
            if let Some(filter) = &event.event_filter {
                props.set(format!("{}.{}.filter", events_key, event.event_class), filter);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesArtifact {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerRef {
    pub name: String,
}

/// `properties` of an `onap.policies.native.drools.Artifact` policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactPolicyProperties {
    pub rules_artifact: RulesArtifact,
    pub controller: ControllerRef,
}

impl ArtifactPolicyProperties {
    pub fn from_policy(policy: &ToscaPolicy) -> Result<Self, CodecError> {
        let props: Self = decode_properties(policy)?;
        if props.controller.name.trim().is_empty() {
            return Err(CodecError::invalid("controller name must not be blank"));
        }
        Ok(props)
    }

    pub fn drools_configuration(&self) -> DroolsConfiguration {
        DroolsConfiguration::new(
            &self.rules_artifact.group_id,
            &self.rules_artifact.artifact_id,
            &self.rules_artifact.version,
        )
    }
}

fn decode_properties<T: DeserializeOwned>(policy: &ToscaPolicy) -> Result<T, CodecError> {
    serde_json::from_value(Value::Object(policy.properties.clone())).map_err(|e| {
        CodecError::decode(format!("policy {}: {}", policy.identifier(), e))
    })
}
