//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use pdpd_controller::drools::{RULES_ARTIFACT_ID, RULES_GROUP_ID, RULES_VERSION};
use pdpd_controller::{FeatureRegistry, PolicyControllerFactory};
use pdpd_core::properties::Properties;
use pdpd_core::topic::{
    CommInfrastructure, MemoryBroker, MemoryTopicEndpoints, TopicEndpointProvider, TopicListener,
};
use pdpd_core::types::{PdpMessage, PdpStatus};
use pdpd_pool::PoolingFeature;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const PAP_TOPIC: &str = "POLICY-PDP-PAP";
pub const POOLING_TOPIC: &str = "POOLING";
pub const EVENT_TOPIC: &str = "DCAE_TOPIC";

/// Polls `predicate` every 10ms until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

/// Records every event seen on a topic.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Decoded PDP status messages, in arrival order.
    pub fn statuses(&self) -> Vec<PdpStatus> {
        self.events
            .lock()
            .iter()
            .filter_map(|text| match PdpMessage::decode(text) {
                Ok(PdpMessage::Status(status)) => Some(status),
                _ => None,
            })
            .collect()
    }
}

impl TopicListener for Recorder {
    fn on_topic_event(&self, _infra: CommInfrastructure, _topic: &str, event: &str) {
        self.events.lock().push(event.to_string());
    }
}

/// Pooling timings short enough for tests.
pub fn fast_pooling() -> Properties {
    Properties::new()
        .with("pooling.topic", POOLING_TOPIC)
        .with("pooling.start.heartbeat.milliseconds", "2000")
        .with("pooling.identification.milliseconds", "200")
        .with("pooling.inter.heartbeat.milliseconds", "100")
        .with("pooling.active.heartbeat.milliseconds", "2000")
        .with("pooling.reactivate.milliseconds", "500")
        .with("pooling.offline.publish.wait.milliseconds", "50")
}

/// Controller properties with rules loaded and one event topic.
pub fn brained_controller(name: &str) -> Properties {
    Properties::new()
        .with(RULES_GROUP_ID, "org.onap.policy")
        .with(RULES_ARTIFACT_ID, name)
        .with(RULES_VERSION, "1.0.0")
        .with("noop.source.topics", EVENT_TOPIC)
}

/// One simulated host: its own endpoints on a shared broker, a controller
/// factory and the pooling feature.
pub struct Host {
    pub name: String,
    pub endpoints: Arc<MemoryTopicEndpoints>,
    pub factory: Arc<PolicyControllerFactory>,
    pub pooling: Arc<PoolingFeature>,
}

impl Host {
    pub fn new(name: &str, broker: &Arc<MemoryBroker>, pooling: Properties) -> Self {
        let endpoints = Arc::new(MemoryTopicEndpoints::new(Arc::clone(broker)));
        let provider: Arc<dyn TopicEndpointProvider> = endpoints.clone();
        let feature = Arc::new(PoolingFeature::new(name, pooling, Arc::clone(&provider)));

        let features = FeatureRegistry::new();
        features.register(feature.clone());
        let factory = Arc::new(PolicyControllerFactory::new(provider, features));

        Self {
            name: name.to_string(),
            endpoints,
            factory,
            pooling: feature,
        }
    }

    pub fn provider(&self) -> Arc<dyn TopicEndpointProvider> {
        self.endpoints.clone()
    }
}
