//! Bounded notification channel with an explicit overflow policy.
//!
//! Registry subscriptions and status publication use this channel instead of
//! an unbounded fan-out. The capacity and the behavior on overflow are part
//! of the channel's contract: every dropped notification is logged and
//! counted, never silently discarded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// What to do when a send would exceed the channel capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to make room for the new one.
    ///
    /// The receiver observes the most recent state. This is the default for
    /// registry subscriptions, where a newer event supersedes older ones.
    DropOldest,
    /// Reject the new item and keep the queue as-is.
    DropNewest,
}

struct Shared<T> {
    label: String,
    capacity: usize,
    policy: OverflowPolicy,
    queue: VecDeque<T>,
    dropped: u64,
}

/// Sending half of a bounded notification channel. Cloneable; a send never
/// blocks.
pub struct NotifySender<T> {
    inner: Arc<Mutex<Shared<T>>>,
}

impl<T> Clone for NotifySender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Receiving half of a bounded notification channel.
pub struct NotifyReceiver<T> {
    inner: Arc<Mutex<Shared<T>>>,
}

/// Creates a bounded notification channel.
///
/// `label` identifies the channel in overflow log messages. `capacity` must
/// be non-zero.
pub fn bounded<T>(
    label: impl Into<String>,
    capacity: usize,
    policy: OverflowPolicy,
) -> (NotifySender<T>, NotifyReceiver<T>) {
    assert!(capacity > 0, "notification channel capacity must be > 0");
    let inner = Arc::new(Mutex::new(Shared {
        label: label.into(),
        capacity,
        policy,
        queue: VecDeque::with_capacity(capacity),
        dropped: 0,
    }));
    (
        NotifySender {
            inner: Arc::clone(&inner),
        },
        NotifyReceiver { inner },
    )
}

impl<T> NotifySender<T> {
    /// Enqueues a notification, applying the overflow policy if the channel
    /// is full. Returns `true` if the item was enqueued, `false` if it was
    /// dropped (DropNewest overflow).
    pub fn send(&self, item: T) -> bool {
        let mut shared = self.inner.lock().expect("notify channel poisoned");
        if shared.queue.len() < shared.capacity {
            shared.queue.push_back(item);
            return true;
        }
        match shared.policy {
            OverflowPolicy::DropOldest => {
                shared.queue.pop_front();
                shared.dropped += 1;
                log::warn!(
                    "{}: notification queue full (capacity {}), dropped oldest ({} total)",
                    shared.label,
                    shared.capacity,
                    shared.dropped
                );
                shared.queue.push_back(item);
                true
            }
            OverflowPolicy::DropNewest => {
                shared.dropped += 1;
                log::warn!(
                    "{}: notification queue full (capacity {}), dropped newest ({} total)",
                    shared.label,
                    shared.capacity,
                    shared.dropped
                );
                false
            }
        }
    }

    /// Number of notifications dropped due to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().expect("notify channel poisoned").dropped
    }
}

impl<T> NotifyReceiver<T> {
    /// Removes and returns the oldest queued notification, if any.
    pub fn try_recv(&self) -> Option<T> {
        self.inner
            .lock()
            .expect("notify channel poisoned")
            .queue
            .pop_front()
    }

    /// Removes and returns all queued notifications in order.
    pub fn drain(&self) -> Vec<T> {
        let mut shared = self.inner.lock().expect("notify channel poisoned");
        shared.queue.drain(..).collect()
    }

    /// Number of queued notifications.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("notify channel poisoned").queue.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of notifications dropped due to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().expect("notify channel poisoned").dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_recv_in_order() {
        let (tx, rx) = bounded("test", 4, OverflowPolicy::DropOldest);
        tx.send(1);
        tx.send(2);
        tx.send(3);

        assert_eq!(rx.try_recv(), Some(1));
        assert_eq!(rx.drain(), vec![2, 3]);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let (tx, rx) = bounded("test", 2, OverflowPolicy::DropOldest);
        assert!(tx.send(1));
        assert!(tx.send(2));
        assert!(tx.send(3));

        assert_eq!(rx.drain(), vec![2, 3]);
        assert_eq!(rx.dropped(), 1);
    }

    #[test]
    fn test_drop_newest_keeps_oldest() {
        let (tx, rx) = bounded("test", 2, OverflowPolicy::DropNewest);
        assert!(tx.send(1));
        assert!(tx.send(2));
        assert!(!tx.send(3));

        assert_eq!(rx.drain(), vec![1, 2]);
        assert_eq!(tx.dropped(), 1);
    }

    #[test]
    fn test_sender_clone_shares_queue() {
        let (tx, rx) = bounded("test", 4, OverflowPolicy::DropOldest);
        let tx2 = tx.clone();
        tx.send("a");
        tx2.send("b");

        assert_eq!(rx.drain(), vec!["a", "b"]);
    }
}
