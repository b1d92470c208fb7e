//! Cross-connect registry metadata.
//!
//! The registry is keyed by the receive interface name; the transmit side
//! is reachable through a secondary index.

use dpagent_common::{RegistryMetadata, SecondaryKey};
use dpagent_device::api::XConnectPair;

/// Secondary-index field mapping transmit interfaces to cross-connects.
pub const XC_TRANSMIT_KEY: &str = "transmit-interface";

/// Metadata attached to a registered cross-connect.
#[derive(Debug, Clone)]
pub struct XConnectMeta {
    pub pair: XConnectPair,
}

impl XConnectMeta {
    pub fn new(pair: XConnectPair) -> Self {
        Self { pair }
    }
}

impl RegistryMetadata for XConnectMeta {
    fn secondary_keys(&self) -> Vec<SecondaryKey> {
        vec![SecondaryKey::new(
            XC_TRANSMIT_KEY,
            self.pair.transmit_interface.as_str(),
        )]
    }
}
