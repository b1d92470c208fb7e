//! Cross-connect session: unidirectional L2 interface pairs.

use serde::{Deserialize, Serialize};

use crate::error::{DeviceIndex, DeviceResult};

/// Desired configuration of one cross-connect.
///
/// The receive interface is the pair's natural key: an interface can be the
/// receive side of at most one cross-connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XConnectPair {
    pub receive_interface: String,
    pub transmit_interface: String,
}

impl XConnectPair {
    /// Creates a cross-connect pair.
    pub fn new(rx: impl Into<String>, tx: impl Into<String>) -> Self {
        Self {
            receive_interface: rx.into(),
            transmit_interface: tx.into(),
        }
    }
}

/// One cross-connect as reported by a device dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XConnectState {
    pub rx_if_index: DeviceIndex,
    pub tx_if_index: DeviceIndex,
}

/// Device session for cross-connect calls.
pub trait XConnectApi: Send {
    /// Connects `rx` to `tx`.
    fn set(&mut self, rx_if_index: DeviceIndex, tx_if_index: DeviceIndex) -> DeviceResult<()>;

    /// Removes the connection from `rx` to `tx`.
    fn unset(&mut self, rx_if_index: DeviceIndex, tx_if_index: DeviceIndex) -> DeviceResult<()>;

    /// Dumps all cross-connects currently present on the device.
    fn dump(&mut self) -> DeviceResult<Vec<XConnectState>>;

    /// Verifies the session's message set against the running device.
    fn check_compatibility(&mut self) -> DeviceResult<()>;
}
