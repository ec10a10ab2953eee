//! Controller feature hooks.
//!
//! Features are explicit, ordered hook objects registered at start-up. Every
//! `before_*` hook may intercept the operation by returning `true`, in which
//! case lower-priority features and the operation itself are skipped. `after_*`
//! hooks returning `true` only stop the remaining features from running.

use parking_lot::RwLock;
use pdpd_core::topic::CommInfrastructure;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::controller::PolicyController;

/// Hooks around the controller lifecycle and event flow.
///
/// All methods have no-op defaults so a feature implements only what it needs.
#[allow(unused_variables)]
pub trait PolicyControllerFeature: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first.
    fn sequence_number(&self) -> i32 {
        0
    }

    /// Called once the controller is registered with the factory.
    fn after_create(&self, controller: &Arc<PolicyController>) -> bool {
        false
    }

    fn before_start(&self, controller: &PolicyController) -> bool {
        false
    }

    fn after_start(&self, controller: &PolicyController) -> bool {
        false
    }

    fn before_stop(&self, controller: &PolicyController) -> bool {
        false
    }

    fn after_stop(&self, controller: &PolicyController) -> bool {
        false
    }

    fn before_lock(&self, controller: &PolicyController) -> bool {
        false
    }

    fn after_lock(&self, controller: &PolicyController) -> bool {
        false
    }

    fn before_unlock(&self, controller: &PolicyController) -> bool {
        false
    }

    fn after_unlock(&self, controller: &PolicyController) -> bool {
        false
    }

    /// Raw inbound event, before decoding.
    fn before_offer(
        &self,
        controller: &PolicyController,
        infra: CommInfrastructure,
        topic: &str,
        event: &str,
    ) -> bool {
        false
    }

    /// Decoded event about to be inserted into the rule session. `event` is
    /// the raw text the fact was decoded from.
    fn before_insert(
        &self,
        controller: &PolicyController,
        topic: &str,
        event: &str,
        fact: &Value,
    ) -> bool {
        false
    }

    fn after_offer(
        &self,
        controller: &PolicyController,
        infra: CommInfrastructure,
        topic: &str,
        event: &str,
        success: bool,
    ) -> bool {
        false
    }

    /// The controller's rules coordinates changed (brained, re-versioned or
    /// made brainless).
    fn after_update(&self, controller: &PolicyController) -> bool {
        false
    }

    fn before_destroy(&self, controller: &PolicyController) -> bool {
        false
    }

    fn after_destroy(&self, controller: &PolicyController) -> bool {
        false
    }
}

/// Ordered set of controller features shared by a factory and its controllers.
#[derive(Default)]
pub struct FeatureRegistry {
    features: RwLock<Vec<Arc<dyn PolicyControllerFeature>>>,
}

impl FeatureRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a feature, keeping the list sorted by sequence number. A feature
    /// with the same name replaces the earlier registration.
    pub fn register(&self, feature: Arc<dyn PolicyControllerFeature>) {
        let mut features = self.features.write();
        features.retain(|f| f.name() != feature.name());
        features.push(feature);
        features.sort_by_key(|f| f.sequence_number());
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut features = self.features.write();
        let before = features.len();
        features.retain(|f| f.name() != name);
        features.len() != before
    }

    pub fn names(&self) -> Vec<String> {
        self.features
            .read()
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.features.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.read().is_empty()
    }

    /// Runs `hook` over features in order until one returns `true`.
    ///
    /// The list is snapshotted first so hooks may register features or call
    /// back into the controller without holding the registry lock.
    pub fn intercepted<F>(&self, hook: &str, controller: &str, f: F) -> bool
    where
        F: Fn(&dyn PolicyControllerFeature) -> bool,
    {
        let snapshot: Vec<_> = self.features.read().clone();
        for feature in snapshot {
            if f(feature.as_ref()) {
                debug!(
                    controller = %controller,
                    feature = %feature.name(),
                    hook,
                    "Operation intercepted by feature"
                );
                return true;
            }
        }
        false
    }
}

impl std::fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureRegistry")
            .field("features", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, i32);

    impl PolicyControllerFeature for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn sequence_number(&self) -> i32 {
            self.1
        }
    }

    #[test]
    fn test_registry_orders_by_sequence() {
        let registry = FeatureRegistry::new();
        registry.register(Arc::new(Named("late", 10)));
        registry.register(Arc::new(Named("early", -1)));
        registry.register(Arc::new(Named("middle", 5)));
        assert_eq!(registry.names(), vec!["early", "middle", "late"]);

        registry.register(Arc::new(Named("late", 0)));
        assert_eq!(registry.names(), vec!["early", "late", "middle"]);
        assert!(registry.unregister("middle"));
        assert!(!registry.unregister("middle"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_intercepted_stops_at_first() {
        let registry = FeatureRegistry::new();
        registry.register(Arc::new(Named("a", 1)));
        registry.register(Arc::new(Named("b", 2)));
        registry.register(Arc::new(Named("c", 3)));

        let seen = parking_lot::Mutex::new(Vec::new());
        let hit = registry.intercepted("test", "ctl", |f| {
            seen.lock().push(f.name().to_string());
            f.name() == "b"
        });
        assert!(hit);
        assert_eq!(*seen.lock(), vec!["a", "b"]);

        assert!(!registry.intercepted("test", "ctl", |_| false));
    }
}
