//! ACL session: rule lists and their interface assignments.
//!
//! Rule field translation beyond this structure (exact match encodings) is
//! a transport concern and stays behind the session implementation.

use serde::{Deserialize, Serialize};

use crate::error::{DeviceIndex, DeviceResult};

/// What to do with a matching packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AclAction {
    #[default]
    Deny,
    Permit,
    /// Permit and create a reflexive session for return traffic.
    Reflect,
}

/// One match/action rule.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AclRule {
    pub action: AclAction,
    /// Source network in CIDR notation, any when absent.
    pub src_network: Option<String>,
    /// Destination network in CIDR notation, any when absent.
    pub dst_network: Option<String>,
    /// IP protocol number, any when absent.
    pub protocol: Option<u8>,
}

impl AclRule {
    /// Creates a rule with the given action matching everything.
    pub fn new(action: AclAction) -> Self {
        Self {
            action,
            ..Default::default()
        }
    }

    /// Restricts the rule to a source network.
    pub fn with_src(mut self, network: impl Into<String>) -> Self {
        self.src_network = Some(network.into());
        self
    }

    /// Restricts the rule to a destination network.
    pub fn with_dst(mut self, network: impl Into<String>) -> Self {
        self.dst_network = Some(network.into());
        self
    }

    /// Restricts the rule to an IP protocol.
    pub fn with_protocol(mut self, proto: u8) -> Self {
        self.protocol = Some(proto);
        self
    }
}

/// Desired configuration of one ACL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclConfig {
    /// Symbolic northbound name, unique across ACLs.
    pub name: String,
    pub rules: Vec<AclRule>,
    /// Names of interfaces the ACL applies to on ingress.
    pub ingress: Vec<String>,
    /// Names of interfaces the ACL applies to on egress.
    pub egress: Vec<String>,
}

impl AclConfig {
    /// Creates an ACL with the given rules and no assignments.
    pub fn new(name: impl Into<String>, rules: Vec<AclRule>) -> Self {
        Self {
            name: name.into(),
            rules,
            ingress: Vec::new(),
            egress: Vec::new(),
        }
    }

    /// Assigns the ACL to an interface on ingress.
    pub fn with_ingress(mut self, ifname: impl Into<String>) -> Self {
        self.ingress.push(ifname.into());
        self
    }

    /// Assigns the ACL to an interface on egress.
    pub fn with_egress(mut self, ifname: impl Into<String>) -> Self {
        self.egress.push(ifname.into());
        self
    }
}

/// One ACL as reported by a device dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclState {
    pub name: String,
    pub acl_index: DeviceIndex,
    pub rules: Vec<AclRule>,
    pub ingress: Vec<DeviceIndex>,
    pub egress: Vec<DeviceIndex>,
}

/// Device session for ACL calls.
pub trait AclApi: Send {
    /// Creates an ACL from its rule list, returning the device-assigned
    /// index.
    fn create(&mut self, name: &str, rules: &[AclRule]) -> DeviceResult<DeviceIndex>;

    /// Replaces the rule list of an existing ACL in place.
    fn update(&mut self, index: DeviceIndex, rules: &[AclRule]) -> DeviceResult<()>;

    /// Deletes an ACL. The device drops its interface assignments.
    fn delete(&mut self, index: DeviceIndex) -> DeviceResult<()>;

    /// Replaces the full interface assignment of an ACL.
    fn set_interfaces(
        &mut self,
        index: DeviceIndex,
        ingress: &[DeviceIndex],
        egress: &[DeviceIndex],
    ) -> DeviceResult<()>;

    /// Dumps all ACLs currently present on the device.
    fn dump(&mut self) -> DeviceResult<Vec<AclState>>;

    /// Verifies the session's message set against the running device.
    fn check_compatibility(&mut self) -> DeviceResult<()>;
}
