//! Pooling wire messages.
//!
//! Every host of a pool publishes on one topic. A message names the channel it
//! is meant for: [`ADMIN`] for broadcasts, or a host id for messages addressed
//! to that host. Hosts drop everything else.

use pdpd_core::error::CodecError;
use pdpd_core::topic::CommInfrastructure;
use serde::{Deserialize, Serialize};

use crate::assignments::BucketAssignments;

/// Broadcast channel.
pub const ADMIN: &str = "@admin";

/// Most times a forwarded event may be relayed before it is dropped.
pub const MAX_HOPS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub source: String,
    pub channel: String,
    /// Lets a starting host recognise its own echo
    pub timestamp_ms: i64,
}

/// A host leaving the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offline {
    pub source: String,
    pub channel: String,
}

/// Asks every host to identify itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub source: String,
    pub channel: String,
}

/// Answer to a query, carrying the sender's current assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identification {
    pub source: String,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignments: Option<BucketAssignments>,
}

/// Assignments published by the leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leader {
    pub source: String,
    pub channel: String,
    pub assignments: BucketAssignments,
}

/// An event relayed to the host owning its bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forward {
    pub source: String,
    pub channel: String,
    pub protocol: CommInfrastructure,
    pub topic: String,
    pub payload: String,
    pub request_id: String,
    pub create_time_ms: i64,
    #[serde(default)]
    pub num_hops: u32,
}

impl Forward {
    /// True when the event was created before `min_create_time_ms`.
    pub fn is_expired(&self, min_create_time_ms: i64) -> bool {
        self.create_time_ms < min_create_time_ms
    }

    /// The same event readdressed to `channel` with one more hop.
    pub fn relay(&self, source: &str, channel: &str) -> Forward {
        Forward {
            source: source.to_string(),
            channel: channel.to_string(),
            num_hops: self.num_hops + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    Heartbeat(Heartbeat),
    Offline(Offline),
    Query(Query),
    Identification(Identification),
    #[serde(rename = "BucketAssignmentBroadcast")]
    Leader(Leader),
    Forward(Forward),
}

impl Message {
    pub fn source(&self) -> &str {
        match self {
            Message::Heartbeat(m) => &m.source,
            Message::Offline(m) => &m.source,
            Message::Query(m) => &m.source,
            Message::Identification(m) => &m.source,
            Message::Leader(m) => &m.source,
            Message::Forward(m) => &m.source,
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Message::Heartbeat(m) => &m.channel,
            Message::Offline(m) => &m.channel,
            Message::Query(m) => &m.channel,
            Message::Identification(m) => &m.channel,
            Message::Leader(m) => &m.channel,
            Message::Forward(m) => &m.channel,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Heartbeat(_) => "Heartbeat",
            Message::Offline(_) => "Offline",
            Message::Query(_) => "Query",
            Message::Identification(_) => "Identification",
            Message::Leader(_) => "BucketAssignmentBroadcast",
            Message::Forward(_) => "Forward",
        }
    }

    /// Checks the fields every receiver relies on.
    pub fn check_valid(&self) -> Result<(), CodecError> {
        if self.source().trim().is_empty() {
            return Err(CodecError::invalid(format!("{} without source", self.kind())));
        }
        if self.channel().trim().is_empty() {
            return Err(CodecError::invalid(format!("{} without channel", self.kind())));
        }

        match self {
            Message::Identification(Identification {
                assignments: Some(assignments),
                ..
            }) => assignments
                .check_valid()
                .map_err(|e| CodecError::invalid(e.to_string())),
            Message::Leader(leader) => {
                leader
                    .assignments
                    .check_valid()
                    .map_err(|e| CodecError::invalid(e.to_string()))?;
                if !leader.assignments.is_leader(&leader.source) {
                    return Err(CodecError::invalid(format!(
                        "{} is not the leader of its assignments",
                        leader.source
                    )));
                }
                Ok(())
            }
            Message::Forward(forward) => {
                if forward.topic.trim().is_empty() {
                    return Err(CodecError::invalid("Forward without topic"));
                }
                if forward.request_id.trim().is_empty() {
                    return Err(CodecError::invalid("Forward without request id"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Encodes and decodes [`Message`]s as JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Serializer;

impl Serializer {
    pub fn encode(&self, message: &Message) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }

    /// Decodes and validates a message. Unknown types fail.
    pub fn decode(&self, text: &str) -> Result<Message, CodecError> {
        let message: Message = serde_json::from_str(text)?;
        message.check_valid()?;
        Ok(message)
    }
}
