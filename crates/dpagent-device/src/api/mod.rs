//! Per-entity device session traits.
//!
//! Each submodule defines the desired-configuration type, the dumped
//! device-state type, and the session trait for one entity type:
//!
//! - [`iface`]: network interfaces
//! - [`bridge`]: bridge domains and their member bindings
//! - [`fib`]: L2 forwarding entries
//! - [`xconnect`]: interface cross-connects
//! - [`acl`]: access-control lists
//! - [`route`]: L3 routes
//!
//! All calls are synchronous from the caller's perspective; `create` calls
//! return the device-assigned index. `check_compatibility` verifies the
//! session's message set against the running device and is invoked once per
//! configurator at construction time.

pub mod acl;
pub mod bridge;
pub mod fib;
pub mod iface;
pub mod route;
pub mod xconnect;

pub use acl::{AclAction, AclApi, AclConfig, AclRule, AclState};
pub use bridge::{
    ArpTerminationEntry, BridgeApi, BridgeDomainConfig, BridgeDomainState, BridgeInterface,
    BridgeMemberState,
};
pub use fib::{FibApi, FibEntry, FibState};
pub use iface::{InterfaceApi, InterfaceConfig, InterfaceKind, InterfaceState};
pub use route::{RouteApi, RouteConfig, RouteState};
pub use xconnect::{XConnectApi, XConnectPair, XConnectState};
