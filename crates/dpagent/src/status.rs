//! Status publication hook.
//!
//! After every successful Configure/Modify/Delete and during resync
//! adoption, the owning configurator pushes the entity's post-change device
//! state here. `state: None` reports a confirmed removal. How published
//! states reach the operational-state feed is the transport's concern, not
//! the engine's; the channel is bounded and drops the oldest update on
//! overflow (newest state wins).

use dpagent_common::notify::{self, NotifyReceiver, NotifySender, OverflowPolicy};
use dpagent_device::api::{
    AclState, BridgeDomainState, FibState, InterfaceState, RouteState, XConnectState,
};
use serde::Serialize;

/// Post-change device state of one entity.
#[derive(Debug, Clone, Serialize)]
pub enum StatusEvent {
    Interface {
        name: String,
        state: Option<InterfaceState>,
    },
    BridgeDomain {
        name: String,
        state: Option<BridgeDomainState>,
    },
    Fib {
        name: String,
        state: Option<FibState>,
    },
    XConnect {
        name: String,
        state: Option<XConnectState>,
    },
    Acl {
        name: String,
        state: Option<AclState>,
    },
    Route {
        name: String,
        state: Option<RouteState>,
    },
}

impl StatusEvent {
    /// Name of the entity the update concerns.
    pub fn name(&self) -> &str {
        match self {
            StatusEvent::Interface { name, .. }
            | StatusEvent::BridgeDomain { name, .. }
            | StatusEvent::Fib { name, .. }
            | StatusEvent::XConnect { name, .. }
            | StatusEvent::Acl { name, .. }
            | StatusEvent::Route { name, .. } => name,
        }
    }

    /// True if the update reports a confirmed removal.
    pub fn is_removal(&self) -> bool {
        match self {
            StatusEvent::Interface { state, .. } => state.is_none(),
            StatusEvent::BridgeDomain { state, .. } => state.is_none(),
            StatusEvent::Fib { state, .. } => state.is_none(),
            StatusEvent::XConnect { state, .. } => state.is_none(),
            StatusEvent::Acl { state, .. } => state.is_none(),
            StatusEvent::Route { state, .. } => state.is_none(),
        }
    }
}

/// Sending half of the status channel, held by every configurator.
pub type StatusSender = NotifySender<StatusEvent>;
/// Receiving half of the status channel, drained by the read side.
pub type StatusReceiver = NotifyReceiver<StatusEvent>;

/// Creates the agent-wide status channel.
pub fn status_channel(capacity: usize) -> (StatusSender, StatusReceiver) {
    notify::bounded("status", capacity, OverflowPolicy::DropOldest)
}
