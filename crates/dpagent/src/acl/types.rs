//! ACL registry metadata.

use dpagent_common::{RegistryMetadata, SecondaryKey};
use dpagent_device::api::AclConfig;

/// Secondary-index field mapping assigned interfaces to ACLs.
pub const ACL_INTERFACE_KEY: &str = "interface";

/// Metadata attached to a registered ACL.
#[derive(Debug, Clone)]
pub struct AclMeta {
    /// Full desired configuration.
    pub config: AclConfig,
    /// Ingress assignments currently applied on the device.
    pub bound_ingress: Vec<String>,
    /// Egress assignments currently applied on the device.
    pub bound_egress: Vec<String>,
}

impl AclMeta {
    pub fn new(config: AclConfig, bound_ingress: Vec<String>, bound_egress: Vec<String>) -> Self {
        Self {
            config,
            bound_ingress,
            bound_egress,
        }
    }

    /// True if the interface is applied in either direction.
    pub fn is_bound(&self, ifname: &str) -> bool {
        self.bound_ingress.iter().any(|b| b == ifname)
            || self.bound_egress.iter().any(|b| b == ifname)
    }
}

impl RegistryMetadata for AclMeta {
    fn secondary_keys(&self) -> Vec<SecondaryKey> {
        self.config
            .ingress
            .iter()
            .chain(self.config.egress.iter())
            .map(|ifname| SecondaryKey::new(ACL_INTERFACE_KEY, ifname.as_str()))
            .collect()
    }
}
