//! FIB registry metadata.

use dpagent_common::{RegistryMetadata, SecondaryKey};
use dpagent_device::api::FibEntry;

/// Secondary-index field mapping outgoing interfaces to FIB entries.
pub const FIB_INTERFACE_KEY: &str = "interface";
/// Secondary-index field mapping bridge domains to FIB entries.
pub const FIB_BRIDGE_KEY: &str = "bridge-domain";

/// Metadata attached to a registered FIB entry: its full desired value.
#[derive(Debug, Clone)]
pub struct FibMeta {
    pub entry: FibEntry,
}

impl FibMeta {
    pub fn new(entry: FibEntry) -> Self {
        Self { entry }
    }
}

impl RegistryMetadata for FibMeta {
    fn secondary_keys(&self) -> Vec<SecondaryKey> {
        vec![
            SecondaryKey::new(FIB_INTERFACE_KEY, self.entry.outgoing_interface.as_str()),
            SecondaryKey::new(FIB_BRIDGE_KEY, self.entry.bridge_domain.as_str()),
        ]
    }
}
