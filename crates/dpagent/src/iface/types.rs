//! Interface registry metadata.

use dpagent_common::RegistryMetadata;
use dpagent_device::api::InterfaceConfig;

/// Metadata attached to a registered interface: its full desired
/// configuration.
#[derive(Debug, Clone)]
pub struct InterfaceMeta {
    pub config: InterfaceConfig,
}

impl InterfaceMeta {
    pub fn new(config: InterfaceConfig) -> Self {
        Self { config }
    }
}

impl RegistryMetadata for InterfaceMeta {}
