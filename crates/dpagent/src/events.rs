//! Change events consumed by the dispatcher.
//!
//! The northbound transport translates its feed items into these typed
//! events; the dispatcher consumes each exactly once. `old`/`new` carry the
//! previous and desired value: a put with no previous value is a create, a
//! put with one is a modify, and a delete carries only the previous value.

use dpagent_device::api::{
    AclConfig, BridgeDomainConfig, FibEntry, InterfaceConfig, RouteConfig, XConnectPair,
};

/// One incremental desired-state change for a single entity.
#[derive(Debug, Clone)]
pub struct Change<T> {
    /// Previous desired value, absent on first creation.
    pub old: Option<T>,
    /// New desired value, absent on deletion.
    pub new: Option<T>,
}

impl<T> Change<T> {
    /// A put with no known previous value.
    pub fn put(new: T) -> Self {
        Self {
            old: None,
            new: Some(new),
        }
    }

    /// A put replacing a known previous value.
    pub fn replace(old: T, new: T) -> Self {
        Self {
            old: Some(old),
            new: Some(new),
        }
    }

    /// A deletion of a known previous value.
    pub fn delete(old: T) -> Self {
        Self {
            old: Some(old),
            new: None,
        }
    }
}

/// A desired-state change routed to the matching configurator.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Interface(Change<InterfaceConfig>),
    BridgeDomain(Change<BridgeDomainConfig>),
    Fib(Change<FibEntry>),
    XConnect(Change<XConnectPair>),
    Acl(Change<AclConfig>),
    Route(Change<RouteConfig>),
}

/// The complete desired state of every entity type, delivered by a full
/// resync event.
#[derive(Debug, Clone, Default)]
pub struct ResyncSnapshot {
    pub interfaces: Vec<InterfaceConfig>,
    pub bridge_domains: Vec<BridgeDomainConfig>,
    pub fibs: Vec<FibEntry>,
    pub xconnects: Vec<XConnectPair>,
    pub acls: Vec<AclConfig>,
    pub routes: Vec<RouteConfig>,
}
