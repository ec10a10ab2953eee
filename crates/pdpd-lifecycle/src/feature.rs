//! Controller hooks feeding the lifecycle state machine.

use pdpd_controller::{PolicyController, PolicyControllerFeature};
use std::sync::{Arc, Weak};

use crate::fsm::LifecycleFsm;

/// Reports controller creation, rules changes and destruction so the state
/// machine can refresh its policy-type registry.
pub struct LifecycleFeature {
    fsm: Weak<LifecycleFsm>,
}

impl LifecycleFeature {
    pub const NAME: &'static str = "lifecycle";

    pub fn new(fsm: &Arc<LifecycleFsm>) -> Self {
        Self {
            fsm: Arc::downgrade(fsm),
        }
    }

    fn notify(&self, controller: &PolicyController) {
        if let Some(fsm) = self.fsm.upgrade() {
            fsm.controller_changed(controller.name());
        }
    }
}

impl PolicyControllerFeature for LifecycleFeature {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn sequence_number(&self) -> i32 {
        1
    }

    fn after_create(&self, controller: &Arc<PolicyController>) -> bool {
        self.notify(controller);
        false
    }

    fn after_update(&self, controller: &PolicyController) -> bool {
        self.notify(controller);
        false
    }

    fn after_destroy(&self, controller: &PolicyController) -> bool {
        self.notify(controller);
        false
    }
}
