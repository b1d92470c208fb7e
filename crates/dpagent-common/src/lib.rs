//! Common reconciliation machinery for the dpagent control plane.
//!
//! This crate provides the generic building blocks shared by every
//! configurator in the agent:
//!
//! - [`IndexedRegistry`]: name/index/metadata table with secondary indices
//!   and change subscriptions
//! - [`PendingCache`]: holding area for operations blocked on a missing
//!   prerequisite entity
//! - [`notify`]: bounded notification channel with an explicit overflow
//!   policy
//! - [`ErrorLog`]: capped per-entity failure history
//!
//! # Architecture
//!
//! The agent follows a single-writer model: one serialized event loop owns
//! every registry, cache and error log. Producers (desired-state watchers,
//! device listeners) communicate with the loop only through bounded queues,
//! so none of the types here carry their own concurrency contract beyond
//! the cheap interior mutability required to share read access.
//!
//! A configurator registers an entity after the device confirmed it exists,
//! unregisters it once the device confirmed removal, and parks blocked
//! operations in a [`PendingCache`] keyed by the entity's own name. Registry
//! subscriptions feed dependency resolution: a downstream configurator
//! re-validates its cached entries whenever an upstream registry reports an
//! `Added` or `Removed` entity.

mod errorlog;
pub mod notify;
mod pending;
mod registry;

pub use errorlog::{ErrorEntry, ErrorLog, OpKind, DEFAULT_ERROR_CAPACITY};
pub use notify::{NotifyReceiver, NotifySender, OverflowPolicy};
pub use pending::{Dependency, PendingCache, PendingEntry};
pub use registry::{
    IndexedRegistry, RegistryEvent, RegistryEventKind, RegistryMetadata, SecondaryKey,
    SharedRegistry,
};
