//! Controller registry.
//!
//! The factory indexes controllers by name and by `groupId:artifactId`
//! coordinates. Both indexes live behind one lock so build, patch and destroy
//! update them together. Feature hooks always run after the lock is released.

use parking_lot::RwLock;
use pdpd_core::properties::Properties;
use pdpd_core::topic::TopicEndpointProvider;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::controller::PolicyController;
use crate::drools::DroolsConfiguration;
use crate::error::{ControllerError, ControllerResult};
use crate::feature::FeatureRegistry;

#[derive(Default)]
struct ControllerIndex {
    by_name: HashMap<String, Arc<PolicyController>>,
    by_coordinates: HashMap<String, Arc<PolicyController>>,
}

impl ControllerIndex {
    fn coordinates_owner(&self, config: &DroolsConfiguration) -> Option<&Arc<PolicyController>> {
        if config.is_brainless() {
            return None;
        }
        self.by_coordinates.get(&config.coordinates_key())
    }
}

/// Creates, indexes and destroys policy controllers.
pub struct PolicyControllerFactory {
    endpoints: Arc<dyn TopicEndpointProvider>,
    features: Arc<FeatureRegistry>,
    index: RwLock<ControllerIndex>,
}

impl PolicyControllerFactory {
    pub fn new(endpoints: Arc<dyn TopicEndpointProvider>, features: Arc<FeatureRegistry>) -> Self {
        Self {
            endpoints,
            features,
            index: RwLock::new(ControllerIndex::default()),
        }
    }

    pub fn features(&self) -> &Arc<FeatureRegistry> {
        &self.features
    }

    pub fn endpoints(&self) -> &Arc<dyn TopicEndpointProvider> {
        &self.endpoints
    }

    /// Builds a controller, or returns the existing one with that name.
    pub fn build(&self, name: &str, properties: Properties) -> ControllerResult<Arc<PolicyController>> {
        if let Some(existing) = self.index.read().by_name.get(name) {
            return Ok(Arc::clone(existing));
        }

        let candidate = PolicyController::new(
            name,
            properties,
            self.endpoints.as_ref(),
            Arc::clone(&self.features),
        )?;
        let config = candidate.drools().configuration();

        let controller = {
            let mut index = self.index.write();
            if let Some(existing) = index.by_name.get(name) {
                return Ok(Arc::clone(existing));
            }
            if let Some(owner) = index.coordinates_owner(&config) {
                return Err(ControllerError::DuplicateCoordinates {
                    coordinates: config.coordinates_key(),
                    owner: owner.name().to_string(),
                });
            }
            if !config.is_brainless() {
                index
                    .by_coordinates
                    .insert(config.coordinates_key(), Arc::clone(&candidate));
            }
            index.by_name.insert(name.to_string(), Arc::clone(&candidate));
            candidate
        };

        info!(controller = %name, rules = %config, "Controller created");

        self.features
            .intercepted("after_create", name, |f| f.after_create(&controller));
        Ok(controller)
    }

    pub fn get(&self, name: &str) -> ControllerResult<Arc<PolicyController>> {
        self.index
            .read()
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| ControllerError::not_found(name))
    }

    pub fn get_by_coordinates(
        &self,
        group_id: &str,
        artifact_id: &str,
    ) -> ControllerResult<Arc<PolicyController>> {
        let key = format!("{}:{}", group_id, artifact_id);
        self.index
            .read()
            .by_coordinates
            .get(&key)
            .cloned()
            .ok_or_else(|| ControllerError::not_found(key))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.read().by_name.contains_key(name)
    }

    /// All controllers, ordered by name.
    pub fn inventory(&self) -> Vec<Arc<PolicyController>> {
        let mut all: Vec<_> = self.index.read().by_name.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Rebinds a controller to new rules coordinates. Returns true if the
    /// coordinates changed.
    pub fn patch(&self, name: &str, config: DroolsConfiguration) -> ControllerResult<bool> {
        config.validate()?;

        let (controller, changed) = {
            let mut index = self.index.write();
            let controller = index
                .by_name
                .get(name)
                .cloned()
                .ok_or_else(|| ControllerError::not_found(name))?;

            if let Some(owner) = index.coordinates_owner(&config) {
                if owner.name() != name {
                    return Err(ControllerError::DuplicateCoordinates {
                        coordinates: config.coordinates_key(),
                        owner: owner.name().to_string(),
                    });
                }
            }

            let previous = controller.drools().configuration();
            let changed = controller.apply_drools_config(config.clone());
            if changed {
                if !previous.is_brainless() {
                    index.by_coordinates.remove(&previous.coordinates_key());
                }
                if !config.is_brainless() {
                    index
                        .by_coordinates
                        .insert(config.coordinates_key(), Arc::clone(&controller));
                }
            }
            (controller, changed)
        };

        if changed {
            controller.notify_updated();
        }
        Ok(changed)
    }

    /// Stops and removes a controller from both indexes.
    pub fn destroy(&self, name: &str) -> ControllerResult<()> {
        let controller = self.get(name)?;

        if controller
            .features()
            .intercepted("before_destroy", name, |f| f.before_destroy(&controller))
        {
            return Ok(());
        }

        controller.stop();

        {
            let mut index = self.index.write();
            index.by_name.remove(name);
            let config = controller.drools().configuration();
            if !config.is_brainless() {
                let key = config.coordinates_key();
                let owned = index
                    .by_coordinates
                    .get(&key)
                    .is_some_and(|c| Arc::ptr_eq(c, &controller));
                if owned {
                    index.by_coordinates.remove(&key);
                }
            }
        }
        controller.drools().purge();

        info!(controller = %name, "Controller destroyed");

        controller
            .features()
            .intercepted("after_destroy", name, |f| f.after_destroy(&controller));
        Ok(())
    }

    /// Destroys every controller.
    pub fn destroy_all(&self) {
        for controller in self.inventory() {
            if let Err(e) = self.destroy(controller.name()) {
                warn!(controller = %controller.name(), error = %e, "Cannot destroy controller");
            }
        }
    }
}

impl std::fmt::Debug for PolicyControllerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .inventory()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        f.debug_struct("PolicyControllerFactory")
            .field("controllers", &names)
            .finish()
    }
}
