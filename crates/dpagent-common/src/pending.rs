//! Pending cache for operations blocked on a missing prerequisite.
//!
//! A configurator that cannot realize an operation because a referenced
//! entity (interface, bridge domain, ...) is not registered yet parks the
//! desired value here, keyed by the blocked entity's own name, together
//! with the set of unmet dependencies. When an upstream registry reports
//! the dependency as present, [`PendingCache::satisfy`] yields the names
//! whose constraint sets ran empty; the configurator then re-validates them
//! against the registries (the authoritative source) and retries.
//!
//! An entry leaves the cache only through a successful retry or through
//! explicit, caller-driven deletion of the blocked operation. Membership is
//! mutually exclusive with membership in the configurator's main registry;
//! upholding that is the caller's contract.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

/// A dependency on an entry in another registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    /// The registry holding the prerequisite (e.g. "interfaces").
    pub registry: String,
    /// The prerequisite's name within that registry.
    pub name: String,
}

impl Dependency {
    /// Creates a new dependency constraint.
    pub fn new(registry: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.registry, self.name)
    }
}

/// A parked operation with its unmet dependencies.
#[derive(Debug, Clone)]
pub struct PendingEntry<T> {
    /// The desired value to realize once the dependencies exist.
    pub value: T,
    /// Dependencies not yet observed as registered.
    pub missing: HashSet<Dependency>,
    /// When the entry was parked.
    pub since: DateTime<Utc>,
}

/// Cache of operations waiting for their prerequisites.
pub struct PendingCache<T> {
    title: String,
    entries: HashMap<String, PendingEntry<T>>,
    /// Reverse index: dependency -> names waiting on it.
    waiters: HashMap<Dependency, HashSet<String>>,
}

impl<T> PendingCache<T> {
    /// Creates an empty cache. `title` identifies it in log messages.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            entries: HashMap::new(),
            waiters: HashMap::new(),
        }
    }

    /// Parks `value` under `name` with the given unmet dependencies.
    ///
    /// Re-inserting an already-cached name replaces its value and
    /// constraint set.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: T,
        missing: impl IntoIterator<Item = Dependency>,
    ) {
        let name = name.into();
        self.detach_waiters(&name);

        let missing: HashSet<Dependency> = missing.into_iter().collect();
        for dep in &missing {
            self.waiters
                .entry(dep.clone())
                .or_default()
                .insert(name.clone());
        }
        log::debug!(
            "{}: cached {} waiting on {} dependencies",
            self.title,
            name,
            missing.len()
        );
        self.entries.insert(
            name,
            PendingEntry {
                value,
                missing,
                since: Utc::now(),
            },
        );
    }

    /// Removes a parked operation, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<T> {
        self.detach_waiters(name);
        self.entries.remove(name).map(|e| e.value)
    }

    /// Marks a dependency as satisfied and returns the names whose
    /// constraint sets became empty, sorted for deterministic retry order.
    ///
    /// Returned entries stay cached; the caller re-validates each against
    /// the registries and removes it on successful retry. Entries with
    /// other constraints still unmet are not returned.
    pub fn satisfy(&mut self, dep: &Dependency) -> Vec<String> {
        let mut ready = Vec::new();
        if let Some(waiting) = self.waiters.remove(dep) {
            for name in waiting {
                if let Some(entry) = self.entries.get_mut(&name) {
                    entry.missing.remove(dep);
                    if entry.missing.is_empty() {
                        ready.push(name);
                    }
                }
            }
        }
        ready.sort();
        ready
    }

    /// Returns a reference to a parked entry.
    pub fn get(&self, name: &str) -> Option<&PendingEntry<T>> {
        self.entries.get(name)
    }

    /// Returns true if `name` is parked here.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Names of all parked operations.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Iterates over parked entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PendingEntry<T>)> {
        self.entries.iter()
    }

    /// Number of parked operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every parked operation. Used when a full snapshot replaces
    /// all pending intent.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            log::debug!("{}: cleared {} pending entries", self.title, self.entries.len());
        }
        self.entries.clear();
        self.waiters.clear();
    }

    fn detach_waiters(&mut self, name: &str) {
        if let Some(entry) = self.entries.get(name) {
            for dep in &entry.missing {
                if let Some(waiting) = self.waiters.get_mut(dep) {
                    waiting.remove(name);
                    if waiting.is_empty() {
                        self.waiters.remove(dep);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep_if(name: &str) -> Dependency {
        Dependency::new("interfaces", name)
    }

    fn dep_bd(name: &str) -> Dependency {
        Dependency::new("bridge-domains", name)
    }

    #[test]
    fn test_insert_and_remove() {
        let mut cache: PendingCache<&str> = PendingCache::new("test");
        cache.insert("fib1", "value", vec![dep_if("if1")]);

        assert!(cache.contains("fib1"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.remove("fib1"), Some("value"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_satisfy_single_dependency() {
        let mut cache: PendingCache<&str> = PendingCache::new("test");
        cache.insert("fib1", "value", vec![dep_if("if1")]);

        assert!(cache.satisfy(&dep_if("other")).is_empty());

        let ready = cache.satisfy(&dep_if("if1"));
        assert_eq!(ready, vec!["fib1"]);
        // stays cached until the caller's retry succeeds
        assert!(cache.contains("fib1"));
    }

    #[test]
    fn test_satisfy_waits_for_all_dependencies() {
        let mut cache: PendingCache<&str> = PendingCache::new("test");
        cache.insert("fib1", "value", vec![dep_if("if1"), dep_bd("bd1")]);

        assert!(cache.satisfy(&dep_bd("bd1")).is_empty());
        assert_eq!(cache.satisfy(&dep_if("if1")), vec!["fib1"]);
    }

    #[test]
    fn test_satisfy_fires_once_per_dependency() {
        // a second identical event must not re-surface the same entry
        let mut cache: PendingCache<&str> = PendingCache::new("test");
        cache.insert("fib1", "value", vec![dep_if("if1")]);

        assert_eq!(cache.satisfy(&dep_if("if1")), vec!["fib1"]);
        assert!(cache.satisfy(&dep_if("if1")).is_empty());
    }

    #[test]
    fn test_reinsert_replaces_constraints() {
        let mut cache: PendingCache<&str> = PendingCache::new("test");
        cache.insert("fib1", "v1", vec![dep_if("if1")]);
        cache.insert("fib1", "v2", vec![dep_bd("bd1")]);

        // old constraint no longer applies
        assert!(cache.satisfy(&dep_if("if1")).is_empty());
        assert_eq!(cache.satisfy(&dep_bd("bd1")), vec!["fib1"]);
        assert_eq!(cache.remove("fib1"), Some("v2"));
    }

    #[test]
    fn test_multiple_waiters_on_one_dependency() {
        let mut cache: PendingCache<&str> = PendingCache::new("test");
        cache.insert("fib1", "a", vec![dep_if("if1")]);
        cache.insert("fib2", "b", vec![dep_if("if1")]);

        let ready = cache.satisfy(&dep_if("if1"));
        assert_eq!(ready, vec!["fib1", "fib2"]);
    }
}
