//! The agent daemon: serialized event dispatch.

mod dispatcher;

pub use dispatcher::{AgentHandles, DaemonError, DeviceSessions, Dispatcher};
