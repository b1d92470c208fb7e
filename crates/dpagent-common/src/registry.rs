//! Indexed registry: the agent's view of what exists on the device.
//!
//! Every configurator owns one registry per entity type it manages. An entry
//! maps the northbound symbolic name to the device-assigned index plus
//! entity-specific metadata, and exists if and only if the corresponding
//! object is believed to exist on the device. Secondary indices are derived
//! from metadata (e.g. "all bridge domains referencing interface X") and are
//! rebuilt incrementally on register/unregister.
//!
//! Registries have no concurrent-writer contract: a single serialized event
//! loop is the only writer. [`SharedRegistry`] exists so dependent
//! configurators can hold cheap read handles.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::notify::{self, NotifyReceiver, NotifySender, OverflowPolicy};

/// Default capacity of a registry subscription queue.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 1024;

/// A derived lookup key computed from entry metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecondaryKey {
    /// The index field this key belongs to (e.g. "interface").
    pub field: String,
    /// The value under that field (e.g. an interface name).
    pub value: String,
}

impl SecondaryKey {
    /// Creates a new secondary key.
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Metadata attached to a registry entry.
///
/// `secondary_keys` returns the derived keys this entry should be findable
/// under; the registry diffs old vs. new keys on every overwrite.
pub trait RegistryMetadata: Clone {
    /// Derived secondary keys for this metadata. Default: none.
    fn secondary_keys(&self) -> Vec<SecondaryKey> {
        Vec::new()
    }
}

impl RegistryMetadata for () {}

/// Kind of a registry change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEventKind {
    /// The entry was registered (created or overwritten).
    Added,
    /// The entry was unregistered.
    Removed,
}

/// Notification delivered to registry subscribers.
///
/// Events are pushed after the registry's own state has been updated, so a
/// subscriber's lookup against the registry while handling the event is
/// guaranteed consistent with it.
#[derive(Debug, Clone)]
pub struct RegistryEvent<M> {
    pub kind: RegistryEventKind,
    pub name: String,
    pub index: u32,
    pub metadata: M,
}

#[derive(Debug, Clone)]
struct Entry<M> {
    index: u32,
    metadata: M,
}

/// Name/index/metadata table with secondary indices and subscriptions.
pub struct IndexedRegistry<M: RegistryMetadata> {
    title: String,
    by_name: HashMap<String, Entry<M>>,
    by_index: HashMap<u32, String>,
    secondary: HashMap<SecondaryKey, BTreeSet<String>>,
    subscribers: Vec<NotifySender<RegistryEvent<M>>>,
}

/// Shared handle to a registry. Dependent configurators hold read clones;
/// only the owning configurator writes.
pub type SharedRegistry<M> = Arc<Mutex<IndexedRegistry<M>>>;

impl<M: RegistryMetadata> IndexedRegistry<M> {
    /// Creates an empty registry. `title` identifies it in log messages.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            by_name: HashMap::new(),
            by_index: HashMap::new(),
            secondary: HashMap::new(),
            subscribers: Vec::new(),
        }
    }

    /// Creates an empty registry wrapped in a shared handle.
    pub fn new_shared(title: impl Into<String>) -> SharedRegistry<M> {
        Arc::new(Mutex::new(Self::new(title)))
    }

    /// Returns the registry title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Registers `name` under `index` with the given metadata.
    ///
    /// Overwrites any existing entry of the same name (last-write-wins) and
    /// updates secondary indices by diffing the old and new derived keys. If
    /// a different name currently holds `index` (stale after device-side
    /// index reuse), that entry is evicted first and its removal notified.
    pub fn register(&mut self, name: impl AsRef<str>, index: u32, metadata: M) {
        let name = name.as_ref().to_string();

        if let Some(old) = self.by_name.remove(&name) {
            self.by_index.remove(&old.index);
            self.remove_secondary(&name, &old.metadata);
        }
        if let Some(holder) = self.by_index.get(&index).cloned() {
            log::warn!(
                "{}: index {} reassigned from {} to {}, evicting stale entry",
                self.title,
                index,
                holder,
                name
            );
            self.unregister(&holder);
        }

        for key in metadata.secondary_keys() {
            self.secondary.entry(key).or_default().insert(name.clone());
        }
        self.by_index.insert(index, name.clone());
        self.by_name.insert(
            name.clone(),
            Entry {
                index,
                metadata: metadata.clone(),
            },
        );
        log::debug!("{}: registered {} -> {}", self.title, name, index);

        self.publish(RegistryEventKind::Added, &name, index, metadata);
    }

    /// Unregisters `name`, returning its index and metadata.
    ///
    /// A no-op returning `None` if the name is absent; never errors.
    pub fn unregister(&mut self, name: &str) -> Option<(u32, M)> {
        let entry = self.by_name.remove(name)?;
        self.by_index.remove(&entry.index);
        self.remove_secondary(name, &entry.metadata);
        log::debug!("{}: unregistered {} ({})", self.title, name, entry.index);

        self.publish(
            RegistryEventKind::Removed,
            name,
            entry.index,
            entry.metadata.clone(),
        );
        Some((entry.index, entry.metadata))
    }

    /// Looks up an entry by name.
    pub fn lookup_by_name(&self, name: &str) -> Option<(u32, M)> {
        self.by_name
            .get(name)
            .map(|e| (e.index, e.metadata.clone()))
    }

    /// Looks up an entry by device index.
    pub fn lookup_by_index(&self, index: u32) -> Option<(String, M)> {
        let name = self.by_index.get(&index)?;
        let entry = self.by_name.get(name)?;
        Some((name.clone(), entry.metadata.clone()))
    }

    /// Returns the names registered under a derived secondary key, sorted.
    pub fn lookup_by_secondary(&self, field: &str, value: &str) -> Vec<String> {
        self.secondary
            .get(&SecondaryKey::new(field, value))
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Returns all registered names.
    pub fn names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Returns true if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Subscribes to change notifications with default queue parameters.
    ///
    /// Notifications are delivered in subscriber registration order, after
    /// the registry state has been updated. The queue is bounded; on
    /// overflow the oldest notification is dropped and the drop logged.
    pub fn subscribe(&mut self, label: impl Into<String>) -> NotifyReceiver<RegistryEvent<M>> {
        self.subscribe_with(
            label,
            DEFAULT_SUBSCRIPTION_CAPACITY,
            OverflowPolicy::DropOldest,
        )
    }

    /// Subscribes with an explicit queue capacity and overflow policy.
    pub fn subscribe_with(
        &mut self,
        label: impl Into<String>,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> NotifyReceiver<RegistryEvent<M>> {
        let (tx, rx) = notify::bounded(label, capacity, policy);
        self.subscribers.push(tx);
        rx
    }

    fn publish(&self, kind: RegistryEventKind, name: &str, index: u32, metadata: M) {
        for sub in &self.subscribers {
            sub.send(RegistryEvent {
                kind,
                name: name.to_string(),
                index,
                metadata: metadata.clone(),
            });
        }
    }

    fn remove_secondary(&mut self, name: &str, metadata: &M) {
        for key in metadata.secondary_keys() {
            if let Some(names) = self.secondary.get_mut(&key) {
                names.remove(name);
                if names.is_empty() {
                    self.secondary.remove(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq)]
    struct Meta {
        members: Vec<String>,
    }

    impl Meta {
        fn with(members: &[&str]) -> Self {
            Self {
                members: members.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl RegistryMetadata for Meta {
        fn secondary_keys(&self) -> Vec<SecondaryKey> {
            self.members
                .iter()
                .map(|m| SecondaryKey::new("member", m))
                .collect()
        }
    }

    #[test]
    fn test_bidirectional_lookup() {
        let mut reg: IndexedRegistry<Meta> = IndexedRegistry::new("test");
        reg.register("bd1", 3, Meta::with(&["if0"]));

        let (idx, meta) = reg.lookup_by_name("bd1").unwrap();
        assert_eq!(idx, 3);
        assert_eq!(meta, Meta::with(&["if0"]));

        let (name, meta) = reg.lookup_by_index(3).unwrap();
        assert_eq!(name, "bd1");
        assert_eq!(meta, Meta::with(&["if0"]));
    }

    #[test]
    fn test_unregister_leaves_other_entries() {
        // register bd0 and bd1, drop bd0, bd1 must survive untouched
        let mut reg: IndexedRegistry<Meta> = IndexedRegistry::new("test");
        reg.register("bd0", 0, Meta::with(&[]));
        reg.register("bd1", 1, Meta::with(&["if1"]));

        let removed = reg.unregister("bd0");
        assert_eq!(removed.map(|(i, _)| i), Some(0));

        assert!(reg.lookup_by_name("bd0").is_none());
        assert!(reg.lookup_by_index(0).is_none());
        let (idx, meta) = reg.lookup_by_name("bd1").unwrap();
        assert_eq!(idx, 1);
        assert_eq!(meta, Meta::with(&["if1"]));
    }

    #[test]
    fn test_unregister_absent_is_noop() {
        let mut reg: IndexedRegistry<()> = IndexedRegistry::new("test");
        assert!(reg.unregister("ghost").is_none());
    }

    #[test]
    fn test_register_overwrites_and_rediffs_secondary() {
        let mut reg: IndexedRegistry<Meta> = IndexedRegistry::new("test");
        reg.register("bd1", 1, Meta::with(&["if0", "if1"]));
        reg.register("bd1", 1, Meta::with(&["if1", "if2"]));

        assert!(reg.lookup_by_secondary("member", "if0").is_empty());
        assert_eq!(reg.lookup_by_secondary("member", "if1"), vec!["bd1"]);
        assert_eq!(reg.lookup_by_secondary("member", "if2"), vec!["bd1"]);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_secondary_shared_by_multiple_entries() {
        let mut reg: IndexedRegistry<Meta> = IndexedRegistry::new("test");
        reg.register("bd1", 1, Meta::with(&["if0"]));
        reg.register("bd2", 2, Meta::with(&["if0"]));

        assert_eq!(reg.lookup_by_secondary("member", "if0"), vec!["bd1", "bd2"]);

        reg.unregister("bd1");
        assert_eq!(reg.lookup_by_secondary("member", "if0"), vec!["bd2"]);
    }

    #[test]
    fn test_index_reuse_evicts_stale_holder() {
        let mut reg: IndexedRegistry<()> = IndexedRegistry::new("test");
        reg.register("old", 7, ());
        reg.register("new", 7, ());

        assert!(reg.lookup_by_name("old").is_none());
        let (name, _) = reg.lookup_by_index(7).unwrap();
        assert_eq!(name, "new");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_subscription_sees_adds_and_removes() {
        let mut reg: IndexedRegistry<Meta> = IndexedRegistry::new("test");
        let rx = reg.subscribe("sub");

        reg.register("bd1", 1, Meta::with(&["if0"]));
        reg.unregister("bd1");

        let events = rx.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, RegistryEventKind::Added);
        assert_eq!(events[0].name, "bd1");
        assert_eq!(events[0].index, 1);
        assert_eq!(events[1].kind, RegistryEventKind::Removed);
        assert_eq!(events[1].name, "bd1");
    }

    #[test]
    fn test_subscription_state_is_consistent_at_delivery() {
        // events are queued after the state change, so the registry already
        // reflects the event when the subscriber drains it
        let mut reg: IndexedRegistry<()> = IndexedRegistry::new("test");
        let rx = reg.subscribe("sub");

        reg.register("if1", 5, ());
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.kind, RegistryEventKind::Added);
        assert_eq!(reg.lookup_by_name(&ev.name), Some((5, ())));
    }
}
