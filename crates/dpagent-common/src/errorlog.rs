//! Bounded per-entity failure history.
//!
//! Every failed configurator operation is recorded here in addition to being
//! returned to the caller. The log keeps a capped number of entries across
//! all entity names; beyond the cap the single oldest entry (by insertion
//! sequence) is evicted. A confirmed successful delete of an entity purges
//! its entire history.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Maximum number of stored entries before the oldest is evicted.
pub const DEFAULT_ERROR_CAPACITY: usize = 50;

/// Which lifecycle operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OpKind {
    Create,
    Modify,
    Delete,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Create => write!(f, "create"),
            OpKind::Modify => write!(f, "modify"),
            OpKind::Delete => write!(f, "delete"),
        }
    }
}

/// A single recorded failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    /// Name of the entity the operation targeted.
    pub entity: String,
    /// The failed operation.
    pub op: OpKind,
    /// Error message as returned by the operation.
    pub message: String,
    /// Monotonically increasing insertion sequence.
    pub seq: u64,
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
}

/// Capped failure history keyed by entity name.
pub struct ErrorLog {
    title: String,
    capacity: usize,
    seq: u64,
    stored: usize,
    entries: HashMap<String, Vec<ErrorEntry>>,
    /// Insertion order for eviction; purged names are skipped lazily.
    order: VecDeque<(u64, String)>,
}

impl ErrorLog {
    /// Creates an error log with the default capacity.
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_capacity(title, DEFAULT_ERROR_CAPACITY)
    }

    /// Creates an error log holding at most `capacity` entries.
    pub fn with_capacity(title: impl Into<String>, capacity: usize) -> Self {
        assert!(capacity > 0, "error log capacity must be > 0");
        Self {
            title: title.into(),
            capacity,
            seq: 0,
            stored: 0,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Records a failure for `entity`, evicting the oldest stored entry if
    /// the capacity bound would be exceeded.
    pub fn record(&mut self, entity: impl AsRef<str>, op: OpKind, message: impl Into<String>) {
        let entity = entity.as_ref().to_string();
        let entry = ErrorEntry {
            entity: entity.clone(),
            op,
            message: message.into(),
            seq: self.seq,
            at: Utc::now(),
        };
        log::debug!(
            "{}: recorded {} failure for {} (seq {})",
            self.title,
            op,
            entity,
            entry.seq
        );
        self.order.push_back((self.seq, entity.clone()));
        self.entries.entry(entity).or_default().push(entry);
        self.seq += 1;
        self.stored += 1;

        while self.stored > self.capacity {
            self.evict_oldest();
        }
    }

    /// Removes the whole history of `entity`, returning how many entries
    /// were dropped. Called on confirmed successful delete.
    pub fn purge(&mut self, entity: &str) -> usize {
        match self.entries.remove(entity) {
            Some(removed) => {
                self.stored -= removed.len();
                log::debug!(
                    "{}: purged {} error entries for {}",
                    self.title,
                    removed.len(),
                    entity
                );
                removed.len()
            }
            None => 0,
        }
    }

    /// Recorded failures for one entity, oldest first.
    pub fn errors_for(&self, entity: &str) -> &[ErrorEntry] {
        self.entries.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All stored entries across entities, ordered by insertion sequence.
    pub fn snapshot(&self) -> Vec<ErrorEntry> {
        let mut all: Vec<ErrorEntry> = self.entries.values().flatten().cloned().collect();
        all.sort_by_key(|e| e.seq);
        all
    }

    /// Number of stored entries.
    pub fn total(&self) -> usize {
        self.stored
    }

    /// The configured capacity bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_oldest(&mut self) {
        while let Some((seq, name)) = self.order.pop_front() {
            let Some(list) = self.entries.get_mut(&name) else {
                // history already purged, stale order marker
                continue;
            };
            let Some(pos) = list.iter().position(|e| e.seq == seq) else {
                continue;
            };
            list.remove(pos);
            if list.is_empty() {
                self.entries.remove(&name);
            }
            self.stored -= 1;
            log::debug!("{}: evicted oldest error entry (seq {})", self.title, seq);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_lookup() {
        let mut elog = ErrorLog::new("test");
        elog.record("if1", OpKind::Create, "device says no");
        elog.record("if1", OpKind::Modify, "still no");
        elog.record("bd1", OpKind::Delete, "busy");

        assert_eq!(elog.total(), 3);
        assert_eq!(elog.errors_for("if1").len(), 2);
        assert_eq!(elog.errors_for("if1")[0].message, "device says no");
        assert_eq!(elog.errors_for("bd1").len(), 1);
        assert!(elog.errors_for("ghost").is_empty());
    }

    #[test]
    fn test_eviction_drops_single_oldest() {
        let mut elog = ErrorLog::with_capacity("test", 3);
        elog.record("a", OpKind::Create, "e0");
        elog.record("b", OpKind::Create, "e1");
        elog.record("a", OpKind::Create, "e2");
        elog.record("c", OpKind::Create, "e3");

        assert_eq!(elog.total(), 3);
        let seqs: Vec<u64> = elog.snapshot().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        // oldest entry for "a" is gone, the newer one survives
        assert_eq!(elog.errors_for("a").len(), 1);
        assert_eq!(elog.errors_for("a")[0].message, "e2");
    }

    #[test]
    fn test_purge_removes_whole_history() {
        let mut elog = ErrorLog::new("test");
        elog.record("if1", OpKind::Create, "e0");
        elog.record("if1", OpKind::Modify, "e1");
        elog.record("bd1", OpKind::Create, "e2");

        assert_eq!(elog.purge("if1"), 2);
        assert_eq!(elog.total(), 1);
        assert!(elog.errors_for("if1").is_empty());
        assert_eq!(elog.errors_for("bd1").len(), 1);
    }

    #[test]
    fn test_eviction_skips_purged_markers() {
        let mut elog = ErrorLog::with_capacity("test", 2);
        elog.record("a", OpKind::Create, "e0");
        elog.record("b", OpKind::Create, "e1");
        elog.purge("a");
        elog.record("c", OpKind::Create, "e2");
        elog.record("d", OpKind::Create, "e3");

        // b (seq 1) is the oldest live entry and must be the one evicted
        assert_eq!(elog.total(), 2);
        assert!(elog.errors_for("b").is_empty());
        assert_eq!(elog.errors_for("c").len(), 1);
        assert_eq!(elog.errors_for("d").len(), 1);
    }

    #[test]
    fn test_snapshot_ordered_by_sequence() {
        let mut elog = ErrorLog::new("test");
        elog.record("x", OpKind::Create, "e0");
        elog.record("y", OpKind::Delete, "e1");
        elog.record("x", OpKind::Modify, "e2");

        let ops: Vec<OpKind> = elog.snapshot().iter().map(|e| e.op).collect();
        assert_eq!(ops, vec![OpKind::Create, OpKind::Delete, OpKind::Modify]);
    }
}
