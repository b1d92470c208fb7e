//! Bridge-domain registry metadata.

use dpagent_common::{RegistryMetadata, SecondaryKey};
use dpagent_device::api::BridgeDomainConfig;

/// Secondary-index field mapping member interface names to the bridge
/// domains that reference them.
pub const MEMBER_INTERFACE_KEY: &str = "interface";

/// Metadata attached to a registered bridge domain.
#[derive(Debug, Clone)]
pub struct BridgeDomainMeta {
    /// Full desired configuration.
    pub config: BridgeDomainConfig,
    /// Names of member interfaces currently bound on the device. Desired
    /// members missing from this list are waiting for their interface to
    /// register.
    pub bound: Vec<String>,
}

impl BridgeDomainMeta {
    pub fn new(config: BridgeDomainConfig, bound: Vec<String>) -> Self {
        Self { config, bound }
    }

    /// True if the named member is bound on the device.
    pub fn is_bound(&self, ifname: &str) -> bool {
        self.bound.iter().any(|b| b == ifname)
    }
}

impl RegistryMetadata for BridgeDomainMeta {
    fn secondary_keys(&self) -> Vec<SecondaryKey> {
        self.config
            .interfaces
            .iter()
            .map(|m| SecondaryKey::new(MEMBER_INTERFACE_KEY, m.name.as_str()))
            .collect()
    }
}
