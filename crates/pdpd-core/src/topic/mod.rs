//! Topic endpoints.
//!
//! A topic source delivers inbound events to registered listeners; a topic sink
//! publishes outbound text. Endpoints are created from property maps by a
//! [`TopicEndpointProvider`], keyed by infrastructure prefix:
//!
//! ```text
//! noop.source.topics=POLICY-PDP-PAP,DCAE_TOPIC
//! noop.sink.topics=POLICY-PDP-PAP
//! ```

pub mod memory;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::properties::Properties;

pub use memory::{MemoryBroker, MemoryTopicEndpoints};

/// Messaging infrastructure an endpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommInfrastructure {
    Noop,
    Dmaap,
    Kafka,
}

impl CommInfrastructure {
    pub const ALL: [CommInfrastructure; 3] = [
        CommInfrastructure::Noop,
        CommInfrastructure::Dmaap,
        CommInfrastructure::Kafka,
    ];

    /// Property prefix used to list topics of this infrastructure.
    pub fn prefix(&self) -> &'static str {
        match self {
            CommInfrastructure::Noop => "noop",
            CommInfrastructure::Dmaap => "dmaap",
            CommInfrastructure::Kafka => "kafka",
        }
    }

    pub fn source_topics_key(&self) -> String {
        format!("{}.source.topics", self.prefix())
    }

    pub fn sink_topics_key(&self) -> String {
        format!("{}.sink.topics", self.prefix())
    }
}

impl fmt::Display for CommInfrastructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix().to_uppercase())
    }
}

/// Receiver of inbound topic events.
pub trait TopicListener: Send + Sync {
    fn on_topic_event(&self, infra: CommInfrastructure, topic: &str, event: &str);
}

/// Common endpoint lifecycle.
pub trait TopicEndpoint: Send + Sync {
    fn topic(&self) -> &str;
    fn infrastructure(&self) -> CommInfrastructure;
    fn start(&self) -> bool;
    fn stop(&self) -> bool;
    fn is_alive(&self) -> bool;
}

/// Inbound endpoint.
pub trait TopicSource: TopicEndpoint {
    fn register(&self, listener: Arc<dyn TopicListener>);
    fn unregister(&self, listener: &Arc<dyn TopicListener>);
}

/// Outbound endpoint. `send` returns false when the message was not accepted.
pub trait TopicSink: TopicEndpoint {
    fn send(&self, message: &str) -> bool;
}

/// Creates and indexes topic endpoints.
pub trait TopicEndpointProvider: Send + Sync {
    /// Creates (or returns existing) sources for every topic listed in `props`.
    fn add_topic_sources(&self, props: &Properties) -> Vec<Arc<dyn TopicSource>>;

    /// Creates (or returns existing) sinks for every topic listed in `props`.
    fn add_topic_sinks(&self, props: &Properties) -> Vec<Arc<dyn TopicSink>>;

    fn get_topic_source(&self, topic: &str) -> Option<Arc<dyn TopicSource>>;

    fn get_topic_sink(&self, topic: &str) -> Option<Arc<dyn TopicSink>>;
}

/// Identity comparison for listener trait objects.
pub fn same_listener(a: &Arc<dyn TopicListener>, b: &Arc<dyn TopicListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
