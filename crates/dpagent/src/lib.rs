//! dpagent: control-plane agent for a packet-processing dataplane.
//!
//! The agent keeps the dataplane's live configuration (interfaces, bridge
//! domains, L2 FIB entries, cross-connects, ACLs, routes) synchronized with
//! a declarative desired state supplied from the northbound side. Desired
//! state arrives as discrete put/delete change events or as a full snapshot
//! (resync); the agent translates it into ordered device calls, tracks the
//! device-assigned indices, and recovers consistency after restarts.
//!
//! # Architecture
//!
//! ```text
//! [desired-state feed] ──> [Dispatcher] ──> Configurators ──> [device]
//!                               │                │
//!                               │           registries + pending caches
//!                               │                │
//!                               └── dependency notifications ──┘
//! ```
//!
//! One configurator exists per entity type. Each owns an indexed registry
//! (name <-> device index + metadata), exclusive device sessions, a capped
//! error log, and, for dependency-sensitive entity types, a pair of
//! pending caches holding operations blocked on a missing prerequisite.
//! A single serialized dispatcher loop is the only writer to all of them;
//! after every external event it drains the dependency notifications the
//! event produced, so one change's ripple effects are observable as a unit.
//!
//! No state is persisted: registries are rebuilt from a device dump plus
//! the desired-state snapshot on every start.

pub mod acl;
pub mod bridge;
pub mod context;
pub mod daemon;
pub mod events;
pub mod fib;
pub mod iface;
pub mod keys;
pub mod route;
pub mod status;
pub mod xconnect;

/// Registry name used in dependency constraints on interfaces.
pub const INTERFACE_REGISTRY: &str = "interfaces";
/// Registry name used in dependency constraints on bridge domains.
pub const BRIDGE_REGISTRY: &str = "bridge-domains";

pub use context::{AgentConfig, AgentContext};
pub use daemon::{AgentHandles, DaemonError, DeviceSessions, Dispatcher};
pub use events::{Change, ChangeEvent, ResyncSnapshot};
pub use status::{StatusEvent, StatusReceiver, StatusSender};
