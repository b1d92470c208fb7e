//! Interface session: create, update, delete and dump network interfaces.

use serde::{Deserialize, Serialize};

use crate::error::{DeviceIndex, DeviceResult};

/// Default interface MTU when the northbound config does not set one.
pub const DEFAULT_MTU: u32 = 1500;

/// Kind of a dataplane interface.
///
/// The kind is fixed at creation; changing it requires destroying and
/// recreating the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterfaceKind {
    #[default]
    Ethernet,
    Loopback,
    Tap,
}

/// Desired configuration of one interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Symbolic northbound name, unique across interfaces.
    pub name: String,
    pub kind: InterfaceKind,
    /// Administrative state.
    pub enabled: bool,
    pub mtu: u32,
    /// MAC address, device default when absent.
    pub phys_address: Option<String>,
    /// Assigned IP addresses in CIDR notation.
    pub ip_addresses: Vec<String>,
}

impl InterfaceConfig {
    /// Creates an enabled interface config with default MTU.
    pub fn new(name: impl Into<String>, kind: InterfaceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: true,
            mtu: DEFAULT_MTU,
            phys_address: None,
            ip_addresses: Vec::new(),
        }
    }

    /// Sets the administrative state.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the MTU.
    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Sets the MAC address.
    pub fn with_phys_address(mut self, mac: impl Into<String>) -> Self {
        self.phys_address = Some(mac.into());
        self
    }

    /// Adds an IP address in CIDR notation.
    pub fn with_ip(mut self, addr: impl Into<String>) -> Self {
        self.ip_addresses.push(addr.into());
        self
    }
}

/// One interface as reported by a device dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceState {
    pub name: String,
    pub if_index: DeviceIndex,
    pub kind: InterfaceKind,
    pub enabled: bool,
    pub mtu: u32,
    pub phys_address: Option<String>,
    pub ip_addresses: Vec<String>,
}

impl InterfaceState {
    /// Projects the dumped state back onto a desired-configuration value,
    /// used by resync to compare against the northbound snapshot.
    pub fn to_config(&self) -> InterfaceConfig {
        InterfaceConfig {
            name: self.name.clone(),
            kind: self.kind,
            enabled: self.enabled,
            mtu: self.mtu,
            phys_address: self.phys_address.clone(),
            ip_addresses: self.ip_addresses.clone(),
        }
    }
}

/// Device session for interface calls.
pub trait InterfaceApi: Send {
    /// Creates an interface, returning the device-assigned index.
    fn create(&mut self, cfg: &InterfaceConfig) -> DeviceResult<DeviceIndex>;

    /// Applies in-place attribute changes to an existing interface.
    fn update(&mut self, index: DeviceIndex, cfg: &InterfaceConfig) -> DeviceResult<()>;

    /// Deletes an interface.
    fn delete(&mut self, index: DeviceIndex) -> DeviceResult<()>;

    /// Dumps all interfaces currently present on the device.
    fn dump(&mut self) -> DeviceResult<Vec<InterfaceState>>;

    /// Verifies the session's message set against the running device.
    fn check_compatibility(&mut self) -> DeviceResult<()>;
}
