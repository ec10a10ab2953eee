//! Controller hooks for pooling.
//!
//! One [`PoolingManager`] per controller with pooling enabled. Controllers
//! whose pooling settings are wrong, or whose pooling topic cannot be wired,
//! run without pooling.

use dashmap::DashMap;
use pdpd_controller::{PolicyController, PolicyControllerFeature};
use pdpd_core::properties::Properties;
use pdpd_core::topic::TopicEndpointProvider;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PoolingProperties;
use crate::manager::PoolingManager;

pub const NAME: &str = "pooling";

pub struct PoolingFeature {
    host: String,
    properties: Properties,
    endpoints: Arc<dyn TopicEndpointProvider>,
    managers: DashMap<String, Arc<PoolingManager>>,
}

impl PoolingFeature {
    /// `properties` holds the process-wide `pooling.*` settings; a
    /// controller's own properties override them.
    pub fn new(
        host: impl Into<String>,
        properties: Properties,
        endpoints: Arc<dyn TopicEndpointProvider>,
    ) -> Self {
        Self {
            host: host.into(),
            properties,
            endpoints,
            managers: DashMap::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn manager(&self, controller: &str) -> Option<Arc<PoolingManager>> {
        self.managers.get(controller).map(|m| Arc::clone(&m))
    }

    /// Names of the controllers being pooled, sorted.
    pub fn pooled_controllers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.managers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn with_manager(&self, controller: &PolicyController, f: impl FnOnce(&PoolingManager)) {
        if let Some(manager) = self.manager(controller.name()) {
            f(&manager);
        }
    }
}

impl PolicyControllerFeature for PoolingFeature {
    fn name(&self) -> &str {
        NAME
    }

    fn after_create(&self, controller: &Arc<PolicyController>) -> bool {
        let mut merged = self.properties.clone();
        merged.extend(&controller.properties());

        let props = match PoolingProperties::from_properties(controller.name(), &merged) {
            Ok(props) => props,
            Err(e) => {
                warn!(controller = %controller.name(), error = %e, "Pooling disabled: bad configuration");
                return false;
            }
        };
        if !props.enabled {
            debug!(controller = %controller.name(), "Pooling not enabled");
            return false;
        }

        match PoolingManager::new(&self.host, controller, props, self.endpoints.as_ref()) {
            Ok(manager) => {
                info!(controller = %controller.name(), host = %self.host, topic = %manager.topic(), "Pooling enabled");
                self.managers.insert(controller.name().to_string(), manager);
            }
            Err(e) => {
                warn!(controller = %controller.name(), error = %e, "Pooling disabled");
            }
        }
        false
    }

    fn before_start(&self, controller: &PolicyController) -> bool {
        self.with_manager(controller, |m| m.before_start());
        false
    }

    fn after_start(&self, controller: &PolicyController) -> bool {
        self.with_manager(controller, |m| m.after_start());
        false
    }

    fn before_stop(&self, controller: &PolicyController) -> bool {
        self.with_manager(controller, |m| m.before_stop());
        false
    }

    fn after_stop(&self, controller: &PolicyController) -> bool {
        self.with_manager(controller, |m| m.after_stop());
        false
    }

    fn before_lock(&self, controller: &PolicyController) -> bool {
        self.with_manager(controller, |m| m.before_lock());
        false
    }

    fn after_unlock(&self, controller: &PolicyController) -> bool {
        self.with_manager(controller, |m| m.after_unlock(controller));
        false
    }

    fn before_insert(
        &self,
        controller: &PolicyController,
        topic: &str,
        event: &str,
        fact: &Value,
    ) -> bool {
        match self.manager(controller.name()) {
            Some(manager) => manager.before_insert(controller, topic, event, fact),
            None => false,
        }
    }

    fn after_destroy(&self, controller: &PolicyController) -> bool {
        if let Some((_, manager)) = self.managers.remove(controller.name()) {
            manager.shutdown();
            info!(controller = %controller.name(), "Pooling manager removed");
        }
        false
    }
}

impl std::fmt::Debug for PoolingFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolingFeature")
            .field("host", &self.host)
            .field("controllers", &self.pooled_controllers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::PoolState;
    use pdpd_controller::drools::{RULES_ARTIFACT_ID, RULES_GROUP_ID, RULES_VERSION};
    use pdpd_controller::{FeatureRegistry, PolicyControllerFactory};
    use pdpd_core::topic::{MemoryBroker, MemoryTopicEndpoints};
    use std::time::{Duration, Instant};

    fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        predicate()
    }

    fn setup(pooling: Properties) -> (PolicyControllerFactory, Arc<PoolingFeature>) {
        let endpoints: Arc<dyn TopicEndpointProvider> =
            Arc::new(MemoryTopicEndpoints::new(MemoryBroker::new()));
        let feature = Arc::new(PoolingFeature::new("host-a", pooling, Arc::clone(&endpoints)));
        let features = FeatureRegistry::new();
        features.register(feature.clone());
        (PolicyControllerFactory::new(endpoints, features), feature)
    }

    fn rules() -> Properties {
        Properties::new()
            .with(RULES_GROUP_ID, "org.onap")
            .with(RULES_ARTIFACT_ID, "usecases")
            .with(RULES_VERSION, "1.0.0")
            .with("noop.source.topics", "DCAE_TOPIC")
    }

    fn fast_pooling() -> Properties {
        Properties::new()
            .with("pooling.topic", "POOLING")
            .with("pooling.identification.milliseconds", "100")
            .with("pooling.inter.heartbeat.milliseconds", "100")
            .with("pooling.offline.publish.wait.milliseconds", "10")
    }

    #[test]
    fn test_disabled_by_default() {
        let (factory, feature) = setup(fast_pooling());
        factory.build("usecases", rules()).unwrap();
        assert!(feature.manager("usecases").is_none());
    }

    #[test]
    fn test_controller_properties_enable_pooling() {
        let (factory, feature) = setup(fast_pooling());
        let ctl = factory
            .build("usecases", rules().with("pooling.usecases.enabled", "true"))
            .unwrap();
        let manager = feature.manager("usecases").unwrap();
        assert_eq!(manager.topic(), "POOLING");
        assert_eq!(feature.pooled_controllers(), vec!["usecases"]);

        ctl.start().unwrap();
        assert!(wait_until(Duration::from_secs(3), || manager.state() == PoolState::Active));

        ctl.lock();
        assert_eq!(manager.state(), PoolState::Idle);
        ctl.unlock();
        assert!(wait_until(Duration::from_secs(3), || manager.state() == PoolState::Active));

        ctl.stop();
        assert_eq!(manager.state(), PoolState::Idle);

        factory.destroy("usecases").unwrap();
        assert!(feature.manager("usecases").is_none());
    }

    #[test]
    fn test_bad_configuration_disables_pooling() {
        let (factory, feature) = setup(
            fast_pooling()
                .with("pooling.enabled", "true")
                .with("pooling.reactivate.milliseconds", "never"),
        );
        let ctl = factory.build("usecases", rules()).unwrap();
        assert!(feature.manager("usecases").is_none());

        // the controller still runs without pooling
        ctl.start().unwrap();
        assert!(ctl.is_alive());
    }
}
