//! Policy controller.
//!
//! A controller binds a set of topic sources and sinks to one rule session.
//! Inbound events flow through the feature hooks, are decoded as JSON and
//! inserted as facts when the controller is alive, unlocked and brained.

use parking_lot::RwLock;
use pdpd_core::policy::ToscaConceptIdentifier;
use pdpd_core::properties::Properties;
use pdpd_core::topic::{
    CommInfrastructure, TopicEndpointProvider, TopicListener, TopicSink, TopicSource,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::drools::{DroolsConfiguration, DroolsController, Fact};
use crate::error::{ControllerError, ControllerResult};
use crate::feature::FeatureRegistry;

/// Property holding the controller's name.
pub const CONTROLLER_NAME_PROPERTY: &str = "controller.name";

/// Comma-separated `name:version` list of non-native policy types the
/// controller's rules understand.
pub const POLICY_TYPES_PROPERTY: &str = "controller.policy.types";

/// A managed rule-engine instance.
pub struct PolicyController {
    name: String,
    properties: RwLock<Properties>,
    drools: DroolsController,
    features: Arc<FeatureRegistry>,
    sources: Vec<Arc<dyn TopicSource>>,
    sinks: Vec<Arc<dyn TopicSink>>,
    listener: Arc<dyn TopicListener>,
    alive: AtomicBool,
    locked: AtomicBool,
}

/// Routes source events to the owning controller without keeping it alive.
struct ControllerListener {
    controller: Weak<PolicyController>,
}

impl TopicListener for ControllerListener {
    fn on_topic_event(&self, infra: CommInfrastructure, topic: &str, event: &str) {
        if let Some(controller) = self.controller.upgrade() {
            controller.offer(infra, topic, event);
        }
    }
}

impl PolicyController {
    /// Creates a stopped controller. Topic endpoints listed in `properties`
    /// are created through `endpoints`.
    pub fn new(
        name: &str,
        mut properties: Properties,
        endpoints: &dyn TopicEndpointProvider,
        features: Arc<FeatureRegistry>,
    ) -> ControllerResult<Arc<Self>> {
        if name.trim().is_empty() {
            return Err(ControllerError::invalid("controller name must not be blank"));
        }
        properties.set(CONTROLLER_NAME_PROPERTY, name);

        let config = DroolsConfiguration::from_properties(&properties)?;
        let sources = endpoints.add_topic_sources(&properties);
        let sinks = endpoints.add_topic_sinks(&properties);

        Ok(Arc::new_cyclic(|weak| Self {
            name: name.to_string(),
            properties: RwLock::new(properties),
            drools: DroolsController::new(config),
            features,
            sources,
            sinks,
            listener: Arc::new(ControllerListener {
                controller: weak.clone(),
            }),
            alive: AtomicBool::new(false),
            locked: AtomicBool::new(false),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> Properties {
        self.properties.read().clone()
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.properties.read().get(key).map(str::to_string)
    }

    pub fn drools(&self) -> &DroolsController {
        &self.drools
    }

    pub fn is_brained(&self) -> bool {
        self.drools.is_brained()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub fn topic_sources(&self) -> &[Arc<dyn TopicSource>] {
        &self.sources
    }

    pub fn topic_sinks(&self) -> &[Arc<dyn TopicSink>] {
        &self.sinks
    }

    /// Non-native policy types declared by the controller's configuration.
    pub fn policy_types(&self) -> Vec<ToscaConceptIdentifier> {
        let mut types = Vec::new();
        for entry in self.properties.read().get_list(POLICY_TYPES_PROPERTY) {
            match entry.parse::<ToscaConceptIdentifier>() {
                Ok(id) => types.push(id),
                Err(e) => {
                    warn!(controller = %self.name, entry = %entry, error = %e, "Ignoring policy type")
                }
            }
        }
        types.sort();
        types.dedup();
        types
    }

    pub fn start(&self) -> ControllerResult<bool> {
        if self
            .features
            .intercepted("before_start", &self.name, |f| f.before_start(self))
        {
            return Ok(true);
        }

        if self.is_locked() {
            return Err(ControllerError::Locked {
                name: self.name.clone(),
            });
        }

        if self.alive.swap(true, Ordering::SeqCst) {
            return Ok(true);
        }

        for source in &self.sources {
            source.register(Arc::clone(&self.listener));
            if !source.start() {
                warn!(controller = %self.name, topic = %source.topic(), "Topic source did not start");
            }
        }
        for sink in &self.sinks {
            if !sink.start() {
                warn!(controller = %self.name, topic = %sink.topic(), "Topic sink did not start");
            }
        }

        info!(controller = %self.name, brained = self.is_brained(), "Controller started");

        self.features
            .intercepted("after_start", &self.name, |f| f.after_start(self));
        Ok(true)
    }

    /// Stops delivery to this controller. Shared endpoints stay up for other
    /// listeners.
    pub fn stop(&self) -> bool {
        if self
            .features
            .intercepted("before_stop", &self.name, |f| f.before_stop(self))
        {
            return true;
        }

        if !self.alive.swap(false, Ordering::SeqCst) {
            return true;
        }

        for source in &self.sources {
            source.unregister(&self.listener);
        }

        info!(controller = %self.name, "Controller stopped");

        self.features
            .intercepted("after_stop", &self.name, |f| f.after_stop(self));
        true
    }

    pub fn lock(&self) -> bool {
        if self
            .features
            .intercepted("before_lock", &self.name, |f| f.before_lock(self))
        {
            return true;
        }

        if self.locked.swap(true, Ordering::SeqCst) {
            return true;
        }
        info!(controller = %self.name, "Controller locked");

        self.features
            .intercepted("after_lock", &self.name, |f| f.after_lock(self));
        true
    }

    pub fn unlock(&self) -> bool {
        if self
            .features
            .intercepted("before_unlock", &self.name, |f| f.before_unlock(self))
        {
            return true;
        }

        if !self.locked.swap(false, Ordering::SeqCst) {
            return true;
        }
        info!(controller = %self.name, "Controller unlocked");

        self.features
            .intercepted("after_unlock", &self.name, |f| f.after_unlock(self));
        true
    }

    /// Inbound event from a topic source. Returns true when the event was
    /// consumed, either by a feature or by the rule session.
    pub fn offer(&self, infra: CommInfrastructure, topic: &str, event: &str) -> bool {
        if self.features.intercepted("before_offer", &self.name, |f| {
            f.before_offer(self, infra, topic, event)
        }) {
            return true;
        }

        let success = self.insert_event(topic, event, true);

        self.features.intercepted("after_offer", &self.name, |f| {
            f.after_offer(self, infra, topic, event, success)
        });
        success
    }

    /// Inserts an event that was already routed to this host, skipping the
    /// offer and insert hooks.
    pub fn deliver(&self, topic: &str, event: &str) -> bool {
        self.insert_event(topic, event, false)
    }

    fn insert_event(&self, topic: &str, event: &str, with_hooks: bool) -> bool {
        if !self.is_alive() || self.is_locked() {
            debug!(controller = %self.name, topic, "Event refused: controller not accepting");
            return false;
        }

        let value: Value = match serde_json::from_str(event) {
            Ok(v) => v,
            Err(e) => {
                warn!(controller = %self.name, topic, error = %e, "Cannot decode event");
                return false;
            }
        };

        if !self.is_brained() {
            debug!(controller = %self.name, topic, "Event dropped: controller is brainless");
            return false;
        }

        if with_hooks
            && self.features.intercepted("before_insert", &self.name, |f| {
                f.before_insert(self, topic, event, &value)
            })
        {
            return true;
        }

        self.drools.insert(Fact::Event {
            topic: topic.to_string(),
            value,
        })
    }

    /// Publishes `event` on the controller's sink for `topic`.
    pub fn deliver_to_sink(&self, topic: &str, event: &str) -> bool {
        match self.sinks.iter().find(|s| s.topic() == topic) {
            Some(sink) => sink.send(event),
            None => {
                warn!(controller = %self.name, topic, "No sink for topic");
                false
            }
        }
    }

    /// Swaps the rules coordinates. The caller keeps the coordinates index
    /// consistent and runs the update hooks.
    pub(crate) fn apply_drools_config(&self, config: DroolsConfiguration) -> bool {
        let changed = self.drools.update(config.clone());
        if changed {
            config.write_properties(&mut self.properties.write());
            info!(controller = %self.name, rules = %config, "Rules configuration updated");
        }
        changed
    }

    pub(crate) fn notify_updated(&self) {
        self.features
            .intercepted("after_update", &self.name, |f| f.after_update(self));
    }

    pub(crate) fn features(&self) -> &FeatureRegistry {
        &self.features
    }
}

impl std::fmt::Debug for PolicyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyController")
            .field("name", &self.name)
            .field("drools", &self.drools.configuration())
            .field("alive", &self.is_alive())
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drools::{RULES_ARTIFACT_ID, RULES_GROUP_ID, RULES_VERSION};
    use crate::feature::PolicyControllerFeature;
    use pdpd_core::topic::{MemoryBroker, MemoryTopicEndpoints};
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn brained_props() -> Properties {
        Properties::new()
            .with(RULES_GROUP_ID, "org.onap.policy")
            .with(RULES_ARTIFACT_ID, "usecases")
            .with(RULES_VERSION, "1.0.0")
            .with("noop.source.topics", "DCAE_TOPIC")
            .with(POLICY_TYPES_PROPERTY, "onap.policies.controlloop.operational.common.Drools:1.0.0, bad")
    }

    #[derive(Default)]
    struct SwallowEvents {
        inserts: AtomicUsize,
    }

    impl PolicyControllerFeature for SwallowEvents {
        fn name(&self) -> &str {
            "swallow"
        }

        fn before_insert(
            &self,
            _controller: &PolicyController,
            _topic: &str,
            _event: &str,
            fact: &Value,
        ) -> bool {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            fact.get("swallow").is_some()
        }
    }

    #[test]
    fn test_policy_types_parsed() {
        let endpoints = MemoryTopicEndpoints::new(MemoryBroker::new());
        let ctl = PolicyController::new("usecases", brained_props(), &endpoints, FeatureRegistry::new())
            .unwrap();
        assert_eq!(
            ctl.policy_types(),
            vec![ToscaConceptIdentifier::new(
                "onap.policies.controlloop.operational.common.Drools",
                "1.0.0"
            )]
        );
        assert_eq!(ctl.property(CONTROLLER_NAME_PROPERTY).as_deref(), Some("usecases"));
    }

    #[test]
    fn test_offer_requires_alive_unlocked_brained() {
        let endpoints = MemoryTopicEndpoints::new(MemoryBroker::new());
        let features = FeatureRegistry::new();
        let swallow = Arc::new(SwallowEvents::default());
        features.register(swallow.clone());
        let ctl = PolicyController::new("usecases", brained_props(), &endpoints, features).unwrap();

        let event = r#"{"requestId":"r1"}"#;
        assert!(!ctl.offer(CommInfrastructure::Noop, "DCAE_TOPIC", event));

        ctl.start().unwrap();
        assert!(ctl.offer(CommInfrastructure::Noop, "DCAE_TOPIC", event));
        assert!(!ctl.offer(CommInfrastructure::Noop, "DCAE_TOPIC", "not json"));
        assert!(ctl.offer(CommInfrastructure::Noop, "DCAE_TOPIC", r#"{"swallow":1}"#));
        assert_eq!(ctl.drools().events().len(), 1);
        assert_eq!(swallow.inserts.load(Ordering::SeqCst), 2);

        // deliver bypasses the insert hooks
        assert!(ctl.deliver("DCAE_TOPIC", r#"{"swallow":2}"#));
        assert_eq!(ctl.drools().events().len(), 2);

        ctl.lock();
        assert!(!ctl.offer(CommInfrastructure::Noop, "DCAE_TOPIC", event));
        assert!(matches!(ctl.start(), Err(ControllerError::Locked { .. })));
        ctl.unlock();
        assert!(ctl.offer(CommInfrastructure::Noop, "DCAE_TOPIC", event));
    }

    #[test]
    fn test_locked_controller_refuses_start() {
        let endpoints = MemoryTopicEndpoints::new(MemoryBroker::new());
        let ctl = PolicyController::new("c", Properties::new(), &endpoints, FeatureRegistry::new())
            .unwrap();
        ctl.lock();
        assert!(matches!(ctl.start(), Err(ControllerError::Locked { .. })));
        ctl.unlock();
        assert!(ctl.start().unwrap());
        assert!(ctl.is_alive());
        assert!(ctl.stop());
        assert!(!ctl.is_alive());
    }

    #[test]
    fn test_events_from_source_reach_session() {
        let endpoints = MemoryTopicEndpoints::new(MemoryBroker::new());
        let ctl = PolicyController::new("usecases", brained_props(), &endpoints, FeatureRegistry::new())
            .unwrap();
        ctl.start().unwrap();

        let source = endpoints.memory_source("DCAE_TOPIC").unwrap();
        assert!(source.inject(r#"{"requestId":"abc"}"#));

        let deadline = Instant::now() + Duration::from_secs(2);
        while ctl.drools().events().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ctl.drools().events().len(), 1);

        ctl.stop();
        assert_eq!(source.listener_count(), 0);
    }

    #[test]
    fn test_brainless_controller_drops_events() {
        let endpoints = MemoryTopicEndpoints::new(MemoryBroker::new());
        let ctl = PolicyController::new("c", Properties::new(), &endpoints, FeatureRegistry::new())
            .unwrap();
        ctl.start().unwrap();
        assert!(!ctl.is_brained());
        assert!(!ctl.offer(CommInfrastructure::Noop, "T", "{}"));
    }
}
