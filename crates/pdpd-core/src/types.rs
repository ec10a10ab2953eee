//! PDP control messages exchanged with the PAP.
//!
//! Every message on the PAP topic is a JSON object carrying a `messageName`
//! discriminator. [`PdpMessage`] is the envelope used for both directions.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::CodecError;
use crate::policy::{ToscaConceptIdentifier, ToscaPolicy};

/// Operational state of a PDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PdpState {
    Passive,
    Active,
    Safe,
    Terminated,
}

impl fmt::Display for PdpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdpState::Passive => write!(f, "PASSIVE"),
            PdpState::Active => write!(f, "ACTIVE"),
            PdpState::Safe => write!(f, "SAFE"),
            PdpState::Terminated => write!(f, "TERMINATED"),
        }
    }
}

/// Health reported in status heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PdpHealthStatus {
    Healthy,
    NotHealthy,
}

impl From<bool> for PdpHealthStatus {
    fn from(healthy: bool) -> Self {
        if healthy {
            PdpHealthStatus::Healthy
        } else {
            PdpHealthStatus::NotHealthy
        }
    }
}

/// Outcome of a request, echoed back in a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PdpResponseStatus {
    Success,
    Fail,
}

/// Response section of a status message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdpResponseDetails {
    /// Request id of the message being answered
    pub response_to: String,
    pub response_status: PdpResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_message: Option<String>,
}

impl PdpResponseDetails {
    pub fn new(
        response_to: impl Into<String>,
        status: PdpResponseStatus,
        message: Option<String>,
    ) -> Self {
        Self {
            response_to: response_to.into(),
            response_status: status,
            response_message: message,
        }
    }
}

/// State change request from the PAP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdpStateChange {
    #[serde(default = "new_request_id")]
    pub request_id: String,
    #[serde(default = "now_millis")]
    pub timestamp_ms: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pdp_group: Option<String>,
    #[serde(default)]
    pub pdp_subgroup: Option<String>,
    pub state: PdpState,
}

impl PdpStateChange {
    /// A state change addressed to one PDP by name.
    pub fn for_pdp(name: impl Into<String>, state: PdpState) -> Self {
        Self {
            request_id: new_request_id(),
            timestamp_ms: now_millis(),
            name: Some(name.into()),
            pdp_group: None,
            pdp_subgroup: None,
            state,
        }
    }

    pub fn applies_to(&self, name: &str, group: Option<&str>, subgroup: Option<&str>) -> bool {
        applies_to(
            self.name.as_deref(),
            self.pdp_group.as_deref(),
            self.pdp_subgroup.as_deref(),
            name,
            group,
            subgroup,
        )
    }
}

/// Policy update from the PAP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdpUpdate {
    #[serde(default = "new_request_id")]
    pub request_id: String,
    #[serde(default = "now_millis")]
    pub timestamp_ms: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pdp_group: Option<String>,
    #[serde(default)]
    pub pdp_subgroup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdp_heartbeat_interval_ms: Option<u64>,
    #[serde(default)]
    pub policies_to_be_deployed: Vec<ToscaPolicy>,
    #[serde(default)]
    pub policies_to_be_undeployed: Vec<ToscaConceptIdentifier>,
}

impl PdpUpdate {
    /// An empty update addressed to one PDP by name.
    pub fn for_pdp(name: impl Into<String>) -> Self {
        Self {
            request_id: new_request_id(),
            timestamp_ms: now_millis(),
            name: Some(name.into()),
            pdp_group: None,
            pdp_subgroup: None,
            description: None,
            pdp_heartbeat_interval_ms: None,
            policies_to_be_deployed: Vec::new(),
            policies_to_be_undeployed: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>, subgroup: impl Into<String>) -> Self {
        self.pdp_group = Some(group.into());
        self.pdp_subgroup = Some(subgroup.into());
        self
    }

    pub fn deploy(mut self, policies: impl IntoIterator<Item = ToscaPolicy>) -> Self {
        self.policies_to_be_deployed.extend(policies);
        self
    }

    pub fn undeploy(mut self, ids: impl IntoIterator<Item = ToscaConceptIdentifier>) -> Self {
        self.policies_to_be_undeployed.extend(ids);
        self
    }

    pub fn applies_to(&self, name: &str, group: Option<&str>, subgroup: Option<&str>) -> bool {
        applies_to(
            self.name.as_deref(),
            self.pdp_group.as_deref(),
            self.pdp_subgroup.as_deref(),
            name,
            group,
            subgroup,
        )
    }
}

/// Status heartbeat published by the PDP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdpStatus {
    #[serde(default = "new_request_id")]
    pub request_id: String,
    #[serde(default = "now_millis")]
    pub timestamp_ms: i64,
    pub name: String,
    pub pdp_type: String,
    pub state: PdpState,
    pub healthy: PdpHealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdp_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdp_subgroup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub policies: Vec<ToscaConceptIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<PdpResponseDetails>,
}

/// Envelope for all PAP topic messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageName")]
pub enum PdpMessage {
    #[serde(rename = "PDP_UPDATE")]
    Update(PdpUpdate),
    #[serde(rename = "PDP_STATE_CHANGE")]
    StateChange(PdpStateChange),
    #[serde(rename = "PDP_STATUS")]
    Status(PdpStatus),
}

impl PdpMessage {
    /// Decodes a message from JSON text.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encodes the message as JSON text.
    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(CodecError::encode)
    }

    pub fn message_name(&self) -> &'static str {
        match self {
            PdpMessage::Update(_) => "PDP_UPDATE",
            PdpMessage::StateChange(_) => "PDP_STATE_CHANGE",
            PdpMessage::Status(_) => "PDP_STATUS",
        }
    }
}

/// Message addressing rule shared by updates and state changes.
///
/// A message carrying a name applies only to the PDP of that name. Otherwise the
/// group must match and, when the message names a subgroup, so must the subgroup.
pub fn applies_to(
    msg_name: Option<&str>,
    msg_group: Option<&str>,
    msg_subgroup: Option<&str>,
    name: &str,
    group: Option<&str>,
    subgroup: Option<&str>,
) -> bool {
    if let Some(target) = msg_name {
        return target == name;
    }
    if msg_group != group {
        return false;
    }
    match msg_subgroup {
        None => true,
        Some(sub) => Some(sub) == subgroup,
    }
}

pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
