//! L2 FIB session: static MAC forwarding entries.
//!
//! FIB calls are batched on the wire and complete asynchronously on the
//! transport; implementations correlate replies positionally through
//! [`crate::fifo::ReplyFifo`]. From the caller's perspective every call is
//! still synchronous.

use serde::{Deserialize, Serialize};

use crate::error::{DeviceIndex, DeviceResult};

/// Desired configuration of one L2 forwarding entry.
///
/// The MAC address is the entry's natural key within its bridge domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibEntry {
    pub phys_address: String,
    /// Name of the owning bridge domain.
    pub bridge_domain: String,
    /// Name of the interface frames are forwarded out of.
    pub outgoing_interface: String,
    /// Forward through the domain's BVI.
    pub bvi: bool,
    /// Entry survives MAC aging.
    pub static_config: bool,
}

impl FibEntry {
    /// Creates a static, non-BVI entry.
    pub fn new(
        mac: impl Into<String>,
        bridge_domain: impl Into<String>,
        outgoing_interface: impl Into<String>,
    ) -> Self {
        Self {
            phys_address: mac.into(),
            bridge_domain: bridge_domain.into(),
            outgoing_interface: outgoing_interface.into(),
            bvi: false,
            static_config: true,
        }
    }
}

/// One FIB entry as reported by a device dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibState {
    pub phys_address: String,
    pub bd_index: DeviceIndex,
    pub if_index: DeviceIndex,
    pub bvi: bool,
    pub static_config: bool,
}

/// Device session for L2 FIB calls.
pub trait FibApi: Send {
    /// Installs a forwarding entry.
    fn add(
        &mut self,
        mac: &str,
        bd_index: DeviceIndex,
        if_index: DeviceIndex,
        bvi: bool,
        static_config: bool,
    ) -> DeviceResult<()>;

    /// Removes a forwarding entry.
    fn del(&mut self, mac: &str, bd_index: DeviceIndex, if_index: DeviceIndex) -> DeviceResult<()>;

    /// Dumps all forwarding entries currently present on the device.
    fn dump(&mut self) -> DeviceResult<Vec<FibState>>;

    /// Verifies the session's message set against the running device.
    fn check_compatibility(&mut self) -> DeviceResult<()>;
}
