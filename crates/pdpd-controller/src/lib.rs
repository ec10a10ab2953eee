//! # pdpd Controller
//!
//! Policy controllers and their registry.
//!
//! - [`PolicyController`]: topic sources and sinks bound to one rule session,
//!   with start/stop/lock/unlock and event offering.
//! - [`DroolsController`]: the rule session stand-in, brained when rules
//!   coordinates are loaded, brainless otherwise.
//! - [`PolicyControllerFactory`]: controllers indexed by name and by
//!   `groupId:artifactId`.
//! - [`PolicyControllerFeature`]: ordered before/after hooks registered at
//!   start-up.

pub mod controller;
pub mod drools;
pub mod error;
pub mod factory;
pub mod feature;

pub use controller::{PolicyController, CONTROLLER_NAME_PROPERTY, POLICY_TYPES_PROPERTY};
pub use drools::{DroolsConfiguration, DroolsController, Fact};
pub use error::{ControllerError, ControllerResult};
pub use factory::PolicyControllerFactory;
pub use feature::{FeatureRegistry, PolicyControllerFeature};
