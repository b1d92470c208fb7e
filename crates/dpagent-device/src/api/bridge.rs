//! Bridge-domain session: domain lifecycle, member bindings and ARP
//! termination entries.

use serde::{Deserialize, Serialize};

use crate::error::{DeviceIndex, DeviceResult};

/// One interface's desired membership in a bridge domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeInterface {
    /// Interface name (resolved through the interface registry at bind
    /// time).
    pub name: String,
    /// Whether this member is the bridged virtual interface. At most one
    /// member of a domain may set this.
    pub bvi: bool,
    pub split_horizon_group: u8,
}

impl BridgeInterface {
    /// Creates a non-BVI member with split horizon group 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bvi: false,
            split_horizon_group: 0,
        }
    }

    /// Marks this member as the BVI.
    pub fn as_bvi(mut self) -> Self {
        self.bvi = true;
        self
    }
}

/// Static ARP entry terminated by the bridge domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArpTerminationEntry {
    pub ip_address: String,
    pub phys_address: String,
}

/// Desired configuration of one bridge domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeDomainConfig {
    /// Symbolic northbound name, unique across bridge domains.
    pub name: String,
    pub flood: bool,
    pub unknown_unicast_flood: bool,
    pub forward: bool,
    pub learn: bool,
    pub arp_termination: bool,
    /// MAC aging time in minutes, 0 disables aging.
    pub mac_age: u8,
    pub interfaces: Vec<BridgeInterface>,
    pub arp_termination_table: Vec<ArpTerminationEntry>,
}

impl BridgeDomainConfig {
    /// Creates a bridge domain with flooding, forwarding and learning
    /// enabled and no members.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flood: true,
            unknown_unicast_flood: true,
            forward: true,
            learn: true,
            arp_termination: false,
            mac_age: 0,
            interfaces: Vec::new(),
            arp_termination_table: Vec::new(),
        }
    }

    /// Adds a member interface.
    pub fn with_interface(mut self, member: BridgeInterface) -> Self {
        self.interfaces.push(member);
        self
    }

    /// Adds an ARP termination entry.
    pub fn with_arp_entry(mut self, ip: impl Into<String>, mac: impl Into<String>) -> Self {
        self.arp_termination_table.push(ArpTerminationEntry {
            ip_address: ip.into(),
            phys_address: mac.into(),
        });
        self
    }

    /// Returns the BVI member, if one is configured.
    pub fn bvi(&self) -> Option<&BridgeInterface> {
        self.interfaces.iter().find(|i| i.bvi)
    }

    /// True if a base parameter differs from `other`. Base parameters can
    /// only change by destroying and recreating the domain on the device.
    pub fn params_differ(&self, other: &BridgeDomainConfig) -> bool {
        self.flood != other.flood
            || self.unknown_unicast_flood != other.unknown_unicast_flood
            || self.forward != other.forward
            || self.learn != other.learn
            || self.arp_termination != other.arp_termination
            || self.mac_age != other.mac_age
    }
}

/// One bound member as reported by a device dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeMemberState {
    pub if_index: DeviceIndex,
    pub bvi: bool,
    pub split_horizon_group: u8,
}

/// One bridge domain as reported by a device dump.
///
/// The device keeps the northbound name as the domain tag, so dumps can be
/// correlated with the desired snapshot by name; a domain with an empty tag
/// cannot be correlated and is treated as obsolete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeDomainState {
    pub name: String,
    pub bd_index: DeviceIndex,
    pub flood: bool,
    pub unknown_unicast_flood: bool,
    pub forward: bool,
    pub learn: bool,
    pub arp_termination: bool,
    pub mac_age: u8,
    pub interfaces: Vec<BridgeMemberState>,
    pub arp_termination_table: Vec<ArpTerminationEntry>,
}

/// Device session for bridge-domain calls.
pub trait BridgeApi: Send {
    /// Creates a bridge domain with the config's base parameters, returning
    /// the device-assigned index. Members and ARP entries are bound through
    /// separate calls.
    fn create(&mut self, cfg: &BridgeDomainConfig) -> DeviceResult<DeviceIndex>;

    /// Deletes a bridge domain. The device drops member bindings and FIB
    /// entries of the domain on its own.
    fn delete(&mut self, index: DeviceIndex) -> DeviceResult<()>;

    /// Binds an interface into a bridge domain.
    fn set_member(
        &mut self,
        bd_index: DeviceIndex,
        if_index: DeviceIndex,
        bvi: bool,
        split_horizon_group: u8,
    ) -> DeviceResult<()>;

    /// Unbinds an interface from a bridge domain.
    fn unset_member(&mut self, bd_index: DeviceIndex, if_index: DeviceIndex) -> DeviceResult<()>;

    /// Installs an ARP termination entry.
    fn add_arp_entry(
        &mut self,
        bd_index: DeviceIndex,
        entry: &ArpTerminationEntry,
    ) -> DeviceResult<()>;

    /// Removes an ARP termination entry.
    fn del_arp_entry(
        &mut self,
        bd_index: DeviceIndex,
        entry: &ArpTerminationEntry,
    ) -> DeviceResult<()>;

    /// Dumps all bridge domains currently present on the device.
    fn dump(&mut self) -> DeviceResult<Vec<BridgeDomainState>>;

    /// Verifies the session's message set against the running device.
    fn check_compatibility(&mut self) -> DeviceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_differ() {
        let a = BridgeDomainConfig::new("bd1");
        let mut b = a.clone();
        assert!(!a.params_differ(&b));

        b.mac_age = 5;
        assert!(a.params_differ(&b));

        let mut c = a.clone();
        c.interfaces.push(BridgeInterface::new("if0"));
        // member changes are not a base-parameter difference
        assert!(!a.params_differ(&c));
    }

    #[test]
    fn test_bvi_lookup() {
        let bd = BridgeDomainConfig::new("bd1")
            .with_interface(BridgeInterface::new("if0"))
            .with_interface(BridgeInterface::new("loop0").as_bvi());
        assert_eq!(bd.bvi().map(|i| i.name.as_str()), Some("loop0"));
    }
}
