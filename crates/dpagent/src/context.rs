//! Explicit agent context.
//!
//! Constructed once at startup and handed to every component; there is no
//! process-wide singleton and no global mutable state. The context owns the
//! agent configuration and the sending half of the status channel.

use dpagent_common::DEFAULT_ERROR_CAPACITY;

use crate::status::{self, StatusReceiver, StatusSender};

/// Agent-wide tunables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Capacity of the incremental-change input queue.
    pub change_queue_capacity: usize,
    /// Capacity of the resync request queue.
    pub resync_queue_capacity: usize,
    /// Capacity of the status publication channel.
    pub status_queue_capacity: usize,
    /// Per-entity-type error log capacity.
    pub error_log_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            change_queue_capacity: 1024,
            resync_queue_capacity: 4,
            status_queue_capacity: 1024,
            error_log_capacity: DEFAULT_ERROR_CAPACITY,
        }
    }
}

impl AgentConfig {
    /// Sets the incremental-change queue capacity.
    pub fn with_change_queue_capacity(mut self, capacity: usize) -> Self {
        self.change_queue_capacity = capacity;
        self
    }

    /// Sets the error log capacity.
    pub fn with_error_log_capacity(mut self, capacity: usize) -> Self {
        self.error_log_capacity = capacity;
        self
    }
}

/// Shared construction-time context for all agent components.
pub struct AgentContext {
    config: AgentConfig,
    status_tx: StatusSender,
}

impl AgentContext {
    /// Creates the context and returns the receiving half of the status
    /// channel for the read side.
    pub fn new(config: AgentConfig) -> (Self, StatusReceiver) {
        let (status_tx, status_rx) = status::status_channel(config.status_queue_capacity);
        (Self { config, status_tx }, status_rx)
    }

    /// The agent configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// A sender handle for status publication.
    pub fn status_sender(&self) -> StatusSender {
        self.status_tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let cfg = AgentConfig::default()
            .with_change_queue_capacity(16)
            .with_error_log_capacity(5);
        assert_eq!(cfg.change_queue_capacity, 16);
        assert_eq!(cfg.error_log_capacity, 5);
        assert_eq!(cfg.resync_queue_capacity, 4);
    }

    #[test]
    fn test_context_status_channel() {
        let (ctx, rx) = AgentContext::new(AgentConfig::default());
        ctx.status_sender().send(crate::status::StatusEvent::Route {
            name: "vrf0/10.0.0.0/24/1.1.1.1".to_string(),
            state: None,
        });
        assert_eq!(rx.len(), 1);
    }
}
