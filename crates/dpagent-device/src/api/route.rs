//! Route session: L3 routes keyed by VRF, destination and next hop.

use serde::{Deserialize, Serialize};

use crate::error::{DeviceIndex, DeviceResult};

/// Desired configuration of one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub vrf: u32,
    /// Destination network in CIDR notation.
    pub dst_network: String,
    pub next_hop_addr: String,
    /// Outgoing interface name; next-hop resolution is left to the device
    /// when absent.
    pub outgoing_interface: Option<String>,
    pub weight: u32,
    pub preference: u32,
}

impl RouteConfig {
    /// Creates a route in VRF 0 with weight 1 and preference 0.
    pub fn new(dst_network: impl Into<String>, next_hop: impl Into<String>) -> Self {
        Self {
            vrf: 0,
            dst_network: dst_network.into(),
            next_hop_addr: next_hop.into(),
            outgoing_interface: None,
            weight: 1,
            preference: 0,
        }
    }

    /// Sets the VRF.
    pub fn with_vrf(mut self, vrf: u32) -> Self {
        self.vrf = vrf;
        self
    }

    /// Sets the outgoing interface.
    pub fn with_interface(mut self, ifname: impl Into<String>) -> Self {
        self.outgoing_interface = Some(ifname.into());
        self
    }

    /// The route's composite natural key (`vrf/dst/next-hop`).
    pub fn key(&self) -> String {
        route_key(self.vrf, &self.dst_network, &self.next_hop_addr)
    }
}

/// One route as reported by a device dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteState {
    pub vrf: u32,
    pub dst_network: String,
    pub next_hop_addr: String,
    pub if_index: Option<DeviceIndex>,
    pub weight: u32,
    pub preference: u32,
}

impl RouteState {
    /// The route's composite natural key (`vrf/dst/next-hop`).
    pub fn key(&self) -> String {
        route_key(self.vrf, &self.dst_network, &self.next_hop_addr)
    }
}

/// Builds the composite natural key identifying a route.
pub fn route_key(vrf: u32, dst_network: &str, next_hop: &str) -> String {
    format!("vrf{}/{}/{}", vrf, dst_network, next_hop)
}

/// Device session for route calls.
pub trait RouteApi: Send {
    /// Installs a route. `if_index` carries the resolved outgoing
    /// interface when the config names one.
    fn add(&mut self, cfg: &RouteConfig, if_index: Option<DeviceIndex>) -> DeviceResult<()>;

    /// Removes a route.
    fn del(&mut self, cfg: &RouteConfig, if_index: Option<DeviceIndex>) -> DeviceResult<()>;

    /// Dumps all routes currently present on the device.
    fn dump(&mut self) -> DeviceResult<Vec<RouteState>>;

    /// Verifies the session's message set against the running device.
    fn check_compatibility(&mut self) -> DeviceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_key() {
        let route = RouteConfig::new("10.0.0.0/24", "192.168.1.1").with_vrf(2);
        assert_eq!(route.key(), "vrf2/10.0.0.0/24/192.168.1.1");
    }
}
