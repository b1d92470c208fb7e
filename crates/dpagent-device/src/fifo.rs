//! FIFO request/reply correlation.
//!
//! Some device calls (batched FIB add/delete) complete asynchronously on the
//! underlying transport. Correlation is positional: requests are pushed in
//! send order and replies are matched to the front of the queue in the same
//! order.
//!
//! INVARIANT: the device never reorders replies within one session's call
//! stream. This is a narrower guarantee than matching by request ID and
//! every transport plugged in behind a session trait must preserve it. If
//! the target protocol carries request IDs, prefer explicit ID correlation
//! over this queue.

use std::collections::VecDeque;

/// Positional correlation queue for in-flight requests.
#[derive(Debug)]
pub struct ReplyFifo<T> {
    label: String,
    pending: VecDeque<T>,
}

impl<T> ReplyFifo<T> {
    /// Creates an empty correlation queue. `label` identifies the session
    /// in log messages.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            pending: VecDeque::new(),
        }
    }

    /// Records a request in send order.
    pub fn push(&mut self, request: T) {
        self.pending.push_back(request);
    }

    /// Matches the next reply to the oldest in-flight request.
    ///
    /// Returns `None` if no request is in flight, which indicates a
    /// protocol violation on the device side; callers log and drop such
    /// replies.
    pub fn complete(&mut self) -> Option<T> {
        let matched = self.pending.pop_front();
        if matched.is_none() {
            log::warn!("{}: reply with no in-flight request", self.label);
        }
        matched
    }

    /// Number of requests awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if no request is awaiting a reply.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replies_match_in_send_order() {
        let mut fifo = ReplyFifo::new("fib");
        fifo.push("add aa:bb");
        fifo.push("add cc:dd");
        fifo.push("del aa:bb");

        assert_eq!(fifo.in_flight(), 3);
        assert_eq!(fifo.complete(), Some("add aa:bb"));
        assert_eq!(fifo.complete(), Some("add cc:dd"));
        assert_eq!(fifo.complete(), Some("del aa:bb"));
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_unexpected_reply_returns_none() {
        let mut fifo: ReplyFifo<&str> = ReplyFifo::new("fib");
        assert_eq!(fifo.complete(), None);
    }
}
