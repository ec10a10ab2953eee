//! PDP state table.
//!
//! Which operations each [`PdpState`] accepts, and which transitions a state
//! change request may perform, are kept here in one place.

use pdpd_core::types::PdpState;
use std::fmt;

use crate::error::{LifecycleError, LifecycleResult};

/// Operations exposed by the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Start,
    Stop,
    Shutdown,
    Status,
    Update,
    StateChange,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Shutdown => "shutdown",
            Operation::Status => "status",
            Operation::Update => "update",
            Operation::StateChange => "stateChange",
        };
        f.write_str(name)
    }
}

/// True when `op` may be invoked while in `state`.
///
/// SAFE accepts nothing. TERMINATED only accepts the operations that bring
/// the PDP up or keep it down.
pub fn allowed(state: PdpState, op: Operation) -> bool {
    use Operation::*;
    match state {
        PdpState::Terminated => matches!(op, Start | Stop | Shutdown),
        PdpState::Passive | PdpState::Active => true,
        PdpState::Safe => false,
    }
}

/// Fails with `Unsupported` when `op` is not allowed in `state`.
pub fn ensure_allowed(state: PdpState, op: Operation) -> LifecycleResult<()> {
    if allowed(state, op) {
        Ok(())
    } else {
        Err(LifecycleError::unsupported(op.to_string(), state))
    }
}

/// True when a state change request may move `from` to `to`.
pub fn can_transition(from: PdpState, to: PdpState) -> bool {
    match (from, to) {
        (_, PdpState::Safe) => false,
        (PdpState::Safe, _) => false,
        (PdpState::Terminated, _) => false,
        (PdpState::Passive | PdpState::Active, _) => true,
    }
}

/// True while the PDP holds messaging resources.
pub fn is_alive(state: PdpState) -> bool {
    matches!(state, PdpState::Passive | PdpState::Active)
}
