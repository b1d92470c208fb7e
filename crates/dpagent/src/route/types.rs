//! Route registry metadata.
//!
//! Routes are keyed by their composite natural key (`vrf/dst/next-hop`);
//! no single field identifies a route on its own.

use dpagent_common::{RegistryMetadata, SecondaryKey};
use dpagent_device::api::RouteConfig;

/// Secondary-index field mapping outgoing interfaces to routes.
pub const ROUTE_INTERFACE_KEY: &str = "interface";

/// Metadata attached to a registered route.
#[derive(Debug, Clone)]
pub struct RouteMeta {
    pub config: RouteConfig,
}

impl RouteMeta {
    pub fn new(config: RouteConfig) -> Self {
        Self { config }
    }
}

impl RegistryMetadata for RouteMeta {
    fn secondary_keys(&self) -> Vec<SecondaryKey> {
        self.config
            .outgoing_interface
            .iter()
            .map(|ifname| SecondaryKey::new(ROUTE_INTERFACE_KEY, ifname.as_str()))
            .collect()
    }
}
