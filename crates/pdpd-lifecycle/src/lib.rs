//! # pdpd Lifecycle
//!
//! The PDP lifecycle state machine and its policy reconciliation engine.
//!
//! - [`LifecycleFsm`]: PASSIVE/ACTIVE/SAFE/TERMINATED state, PAP request
//!   handling and status heartbeats.
//! - [`reconcile`]: pure planning of deploy and undeploy actions in type
//!   precedence order.
//! - [`handlers`]: the native controller, native artifact and rule-session
//!   policy-type handlers.
//! - [`LifecycleFeature`]: controller hooks keeping the policy-type registry
//!   in step with controller brain changes.

pub mod error;
pub mod feature;
pub mod fsm;
pub mod handlers;
pub mod native;
pub mod reconcile;
pub mod state;

pub use error::{LifecycleError, LifecycleResult};
pub use feature::LifecycleFeature;
pub use fsm::LifecycleFsm;
pub use reconcile::{deploy_order, merge_policies, undeploy_order, ReconcilePlan};
pub use state::Operation;
