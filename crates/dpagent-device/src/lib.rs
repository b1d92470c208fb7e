//! Device-driver boundary for the dpagent control plane.
//!
//! The reconciliation engine never sees the device's wire protocol; it
//! depends only on the per-entity session traits in [`api`], on the status
//! codes in [`error`], and on the assumption that every call is synchronous
//! from the caller's point of view. Implementations translate these calls
//! onto whatever transport the packet-processing engine speaks.
//!
//! Sessions are exclusive: each configurator owns its own session handle and
//! never shares it with another entity type, so request streams of distinct
//! types cannot interleave on one correlation queue.
//!
//! [`MockDevice`] provides an in-process implementation of all session
//! traits with index allocation, dump support, call recording and fault
//! injection; the test suite and the placeholder binary wiring run against
//! it.

pub mod api;
pub mod error;
pub mod fifo;
mod mock;

pub use error::{DeviceError, DeviceIndex, DeviceResult, DeviceStatus};
pub use fifo::ReplyFifo;
pub use mock::{MockDevice, MockDeviceConfig};
