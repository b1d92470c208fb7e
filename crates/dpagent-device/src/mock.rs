//! In-process mock device.
//!
//! Implements every session trait against in-memory tables. Indices are
//! allocated from a free-list so deleted indices are reused, the way real
//! devices hand them out; index 0 is a valid, routinely assigned index.
//! Every call is recorded for assertions, failures can be injected per call
//! name, and dumps answer from the live tables.
//!
//! The mock also mirrors the device's cascading behavior: deleting an
//! interface drops its bridge memberships, cross-connects, FIB entries and
//! routes; deleting a bridge domain drops its FIB entries.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::api::{
    AclApi, AclRule, AclState, ArpTerminationEntry, BridgeApi, BridgeDomainConfig,
    BridgeDomainState, BridgeMemberState, FibApi, FibState, InterfaceApi, InterfaceConfig,
    InterfaceState, RouteApi, RouteConfig, RouteState, XConnectApi, XConnectState,
};
use crate::error::{DeviceError, DeviceIndex, DeviceResult, DeviceStatus};
use crate::fifo::ReplyFifo;

/// Configuration for the mock device.
#[derive(Debug, Clone)]
pub struct MockDeviceConfig {
    /// Whether compatibility checks succeed.
    pub compatible: bool,
    /// First index handed out by each allocator.
    pub first_index: DeviceIndex,
}

impl Default for MockDeviceConfig {
    fn default() -> Self {
        Self {
            compatible: true,
            first_index: 0,
        }
    }
}

#[derive(Debug)]
struct IndexAllocator {
    next: DeviceIndex,
    free: BTreeSet<DeviceIndex>,
}

impl IndexAllocator {
    fn new(first: DeviceIndex) -> Self {
        Self {
            next: first,
            free: BTreeSet::new(),
        }
    }

    fn alloc(&mut self) -> DeviceIndex {
        if let Some(&idx) = self.free.iter().next() {
            self.free.remove(&idx);
            return idx;
        }
        let idx = self.next;
        self.next += 1;
        idx
    }

    fn release(&mut self, idx: DeviceIndex) {
        self.free.insert(idx);
    }
}

struct MockState {
    config: MockDeviceConfig,
    if_alloc: IndexAllocator,
    bd_alloc: IndexAllocator,
    acl_alloc: IndexAllocator,
    interfaces: BTreeMap<DeviceIndex, InterfaceState>,
    bridges: BTreeMap<DeviceIndex, BridgeDomainState>,
    fibs: Vec<FibState>,
    /// rx interface index -> tx interface index
    xconnects: BTreeMap<DeviceIndex, DeviceIndex>,
    acls: BTreeMap<DeviceIndex, AclState>,
    routes: BTreeMap<String, RouteState>,
    fib_fifo: ReplyFifo<String>,
    calls: Vec<String>,
    failures: HashMap<&'static str, VecDeque<DeviceStatus>>,
}

impl MockState {
    fn record(&mut self, call: String) {
        self.calls.push(call);
    }

    fn take_failure(&mut self, call: &'static str) -> DeviceResult<()> {
        if let Some(queue) = self.failures.get_mut(call) {
            if let Some(status) = queue.pop_front() {
                return Err(DeviceError::call(call, status));
            }
        }
        Ok(())
    }

    fn check_compat(&mut self, call: String) -> DeviceResult<()> {
        self.record(call);
        if self.config.compatible {
            Ok(())
        } else {
            Err(DeviceError::Incompatible(
                "mock device configured as incompatible".to_string(),
            ))
        }
    }

    fn interface_exists(&self, idx: DeviceIndex) -> bool {
        self.interfaces.contains_key(&idx)
    }

    /// Cascade executed by the device when an interface disappears.
    fn drop_interface_references(&mut self, idx: DeviceIndex) {
        for bd in self.bridges.values_mut() {
            bd.interfaces.retain(|m| m.if_index != idx);
        }
        self.xconnects
            .retain(|rx, tx| *rx != idx && *tx != idx);
        self.fibs.retain(|f| f.if_index != idx);
        self.routes.retain(|_, r| r.if_index != Some(idx));
    }
}

/// Cloneable handle to the mock device. Each configurator gets its own
/// clone as its exclusive session.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Creates a mock device with default configuration.
    pub fn new() -> Self {
        Self::with_config(MockDeviceConfig::default())
    }

    /// Creates a mock device with the given configuration.
    pub fn with_config(config: MockDeviceConfig) -> Self {
        let first = config.first_index;
        Self {
            state: Arc::new(Mutex::new(MockState {
                config,
                if_alloc: IndexAllocator::new(first),
                bd_alloc: IndexAllocator::new(first),
                acl_alloc: IndexAllocator::new(first),
                interfaces: BTreeMap::new(),
                bridges: BTreeMap::new(),
                fibs: Vec::new(),
                xconnects: BTreeMap::new(),
                acls: BTreeMap::new(),
                routes: BTreeMap::new(),
                fib_fifo: ReplyFifo::new("mock-fib"),
                calls: Vec::new(),
                failures: HashMap::new(),
            })),
        }
    }

    /// Returns another handle to the same device, used as one
    /// configurator's exclusive session.
    pub fn session(&self) -> MockDevice {
        self.clone()
    }

    /// All recorded calls in invocation order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn call_count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Recorded calls that mutate device state (dumps and compatibility
    /// checks filtered out).
    pub fn mutations(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| !c.contains(".dump") && !c.contains(".compat"))
            .cloned()
            .collect()
    }

    /// Clears the recorded call log.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Makes the next invocation of `call` fail with `status`.
    pub fn fail_next(&self, call: &'static str, status: DeviceStatus) {
        self.lock()
            .failures
            .entry(call)
            .or_default()
            .push_back(status);
    }

    /// Device index of the named interface, if present.
    pub fn interface_index(&self, name: &str) -> Option<DeviceIndex> {
        self.lock()
            .interfaces
            .iter()
            .find(|(_, s)| s.name == name)
            .map(|(idx, _)| *idx)
    }

    /// Device index of the named bridge domain, if present.
    pub fn bridge_index(&self, name: &str) -> Option<DeviceIndex> {
        self.lock()
            .bridges
            .iter()
            .find(|(_, s)| s.name == name)
            .map(|(idx, _)| *idx)
    }

    /// Number of members bound to the named bridge domain.
    pub fn bridge_member_count(&self, name: &str) -> usize {
        self.lock()
            .bridges
            .values()
            .find(|s| s.name == name)
            .map(|s| s.interfaces.len())
            .unwrap_or(0)
    }

    /// Number of FIB entries on the device.
    pub fn fib_count(&self) -> usize {
        self.lock().fibs.len()
    }

    /// Number of routes on the device.
    pub fn route_count(&self) -> usize {
        self.lock().routes.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock device poisoned")
    }
}

impl InterfaceApi for MockDevice {
    fn create(&mut self, cfg: &InterfaceConfig) -> DeviceResult<DeviceIndex> {
        let mut st = self.lock();
        st.record(format!("iface.create {}", cfg.name));
        st.take_failure("iface.create")?;
        let idx = st.if_alloc.alloc();
        st.interfaces.insert(
            idx,
            InterfaceState {
                name: cfg.name.clone(),
                if_index: idx,
                kind: cfg.kind,
                enabled: cfg.enabled,
                mtu: cfg.mtu,
                phys_address: cfg.phys_address.clone(),
                ip_addresses: cfg.ip_addresses.clone(),
            },
        );
        Ok(idx)
    }

    fn update(&mut self, index: DeviceIndex, cfg: &InterfaceConfig) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("iface.update {}", cfg.name));
        st.take_failure("iface.update")?;
        let state = st
            .interfaces
            .get_mut(&index)
            .ok_or_else(|| DeviceError::call("iface.update", DeviceStatus::ItemNotFound))?;
        state.enabled = cfg.enabled;
        state.mtu = cfg.mtu;
        state.phys_address = cfg.phys_address.clone();
        state.ip_addresses = cfg.ip_addresses.clone();
        Ok(())
    }

    fn delete(&mut self, index: DeviceIndex) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("iface.delete {}", index));
        st.take_failure("iface.delete")?;
        if st.interfaces.remove(&index).is_none() {
            return Err(DeviceError::call("iface.delete", DeviceStatus::ItemNotFound));
        }
        st.if_alloc.release(index);
        st.drop_interface_references(index);
        Ok(())
    }

    fn dump(&mut self) -> DeviceResult<Vec<InterfaceState>> {
        let mut st = self.lock();
        st.record("iface.dump".to_string());
        Ok(st.interfaces.values().cloned().collect())
    }

    fn check_compatibility(&mut self) -> DeviceResult<()> {
        self.lock().check_compat("iface.compat".to_string())
    }
}

impl BridgeApi for MockDevice {
    fn create(&mut self, cfg: &BridgeDomainConfig) -> DeviceResult<DeviceIndex> {
        let mut st = self.lock();
        st.record(format!("bridge.create {}", cfg.name));
        st.take_failure("bridge.create")?;
        let idx = st.bd_alloc.alloc();
        st.bridges.insert(
            idx,
            BridgeDomainState {
                name: cfg.name.clone(),
                bd_index: idx,
                flood: cfg.flood,
                unknown_unicast_flood: cfg.unknown_unicast_flood,
                forward: cfg.forward,
                learn: cfg.learn,
                arp_termination: cfg.arp_termination,
                mac_age: cfg.mac_age,
                interfaces: Vec::new(),
                arp_termination_table: Vec::new(),
            },
        );
        Ok(idx)
    }

    fn delete(&mut self, index: DeviceIndex) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("bridge.delete {}", index));
        st.take_failure("bridge.delete")?;
        if st.bridges.remove(&index).is_none() {
            return Err(DeviceError::call("bridge.delete", DeviceStatus::ItemNotFound));
        }
        st.bd_alloc.release(index);
        st.fibs.retain(|f| f.bd_index != index);
        Ok(())
    }

    fn set_member(
        &mut self,
        bd_index: DeviceIndex,
        if_index: DeviceIndex,
        bvi: bool,
        split_horizon_group: u8,
    ) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("bridge.set_member {} {}", bd_index, if_index));
        st.take_failure("bridge.set_member")?;
        if !st.interface_exists(if_index) {
            return Err(DeviceError::call(
                "bridge.set_member",
                DeviceStatus::ItemNotFound,
            ));
        }
        let bd = st
            .bridges
            .get_mut(&bd_index)
            .ok_or_else(|| DeviceError::call("bridge.set_member", DeviceStatus::ItemNotFound))?;
        bd.interfaces.retain(|m| m.if_index != if_index);
        bd.interfaces.push(BridgeMemberState {
            if_index,
            bvi,
            split_horizon_group,
        });
        Ok(())
    }

    fn unset_member(&mut self, bd_index: DeviceIndex, if_index: DeviceIndex) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("bridge.unset_member {} {}", bd_index, if_index));
        st.take_failure("bridge.unset_member")?;
        let bd = st
            .bridges
            .get_mut(&bd_index)
            .ok_or_else(|| DeviceError::call("bridge.unset_member", DeviceStatus::ItemNotFound))?;
        bd.interfaces.retain(|m| m.if_index != if_index);
        Ok(())
    }

    fn add_arp_entry(
        &mut self,
        bd_index: DeviceIndex,
        entry: &ArpTerminationEntry,
    ) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("bridge.add_arp {} {}", bd_index, entry.ip_address));
        st.take_failure("bridge.add_arp")?;
        let bd = st
            .bridges
            .get_mut(&bd_index)
            .ok_or_else(|| DeviceError::call("bridge.add_arp", DeviceStatus::ItemNotFound))?;
        bd.arp_termination_table.retain(|e| e != entry);
        bd.arp_termination_table.push(entry.clone());
        Ok(())
    }

    fn del_arp_entry(
        &mut self,
        bd_index: DeviceIndex,
        entry: &ArpTerminationEntry,
    ) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("bridge.del_arp {} {}", bd_index, entry.ip_address));
        st.take_failure("bridge.del_arp")?;
        let bd = st
            .bridges
            .get_mut(&bd_index)
            .ok_or_else(|| DeviceError::call("bridge.del_arp", DeviceStatus::ItemNotFound))?;
        bd.arp_termination_table.retain(|e| e != entry);
        Ok(())
    }

    fn dump(&mut self) -> DeviceResult<Vec<BridgeDomainState>> {
        let mut st = self.lock();
        st.record("bridge.dump".to_string());
        Ok(st.bridges.values().cloned().collect())
    }

    fn check_compatibility(&mut self) -> DeviceResult<()> {
        self.lock().check_compat("bridge.compat".to_string())
    }
}

impl FibApi for MockDevice {
    fn add(
        &mut self,
        mac: &str,
        bd_index: DeviceIndex,
        if_index: DeviceIndex,
        bvi: bool,
        static_config: bool,
    ) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("fib.add {} bd{}", mac, bd_index));
        st.take_failure("fib.add")?;
        if !st.bridges.contains_key(&bd_index) || !st.interface_exists(if_index) {
            return Err(DeviceError::call("fib.add", DeviceStatus::ItemNotFound));
        }
        // positional correlation: reply matches the oldest in-flight request
        st.fib_fifo.push(format!("add {}", mac));
        st.fibs
            .retain(|f| !(f.phys_address == mac && f.bd_index == bd_index));
        st.fibs.push(FibState {
            phys_address: mac.to_string(),
            bd_index,
            if_index,
            bvi,
            static_config,
        });
        st.fib_fifo.complete();
        Ok(())
    }

    fn del(&mut self, mac: &str, bd_index: DeviceIndex, _if_index: DeviceIndex) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("fib.del {} bd{}", mac, bd_index));
        st.take_failure("fib.del")?;
        st.fib_fifo.push(format!("del {}", mac));
        st.fibs
            .retain(|f| !(f.phys_address == mac && f.bd_index == bd_index));
        st.fib_fifo.complete();
        Ok(())
    }

    fn dump(&mut self) -> DeviceResult<Vec<FibState>> {
        let mut st = self.lock();
        st.record("fib.dump".to_string());
        Ok(st.fibs.clone())
    }

    fn check_compatibility(&mut self) -> DeviceResult<()> {
        self.lock().check_compat("fib.compat".to_string())
    }
}

impl XConnectApi for MockDevice {
    fn set(&mut self, rx_if_index: DeviceIndex, tx_if_index: DeviceIndex) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("xconnect.set {}->{}", rx_if_index, tx_if_index));
        st.take_failure("xconnect.set")?;
        if !st.interface_exists(rx_if_index) || !st.interface_exists(tx_if_index) {
            return Err(DeviceError::call("xconnect.set", DeviceStatus::ItemNotFound));
        }
        st.xconnects.insert(rx_if_index, tx_if_index);
        Ok(())
    }

    fn unset(&mut self, rx_if_index: DeviceIndex, tx_if_index: DeviceIndex) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("xconnect.unset {}->{}", rx_if_index, tx_if_index));
        st.take_failure("xconnect.unset")?;
        st.xconnects.remove(&rx_if_index);
        Ok(())
    }

    fn dump(&mut self) -> DeviceResult<Vec<XConnectState>> {
        let mut st = self.lock();
        st.record("xconnect.dump".to_string());
        Ok(st
            .xconnects
            .iter()
            .map(|(rx, tx)| XConnectState {
                rx_if_index: *rx,
                tx_if_index: *tx,
            })
            .collect())
    }

    fn check_compatibility(&mut self) -> DeviceResult<()> {
        self.lock().check_compat("xconnect.compat".to_string())
    }
}

impl AclApi for MockDevice {
    fn create(&mut self, name: &str, rules: &[AclRule]) -> DeviceResult<DeviceIndex> {
        let mut st = self.lock();
        st.record(format!("acl.create {}", name));
        st.take_failure("acl.create")?;
        let idx = st.acl_alloc.alloc();
        st.acls.insert(
            idx,
            AclState {
                name: name.to_string(),
                acl_index: idx,
                rules: rules.to_vec(),
                ingress: Vec::new(),
                egress: Vec::new(),
            },
        );
        Ok(idx)
    }

    fn update(&mut self, index: DeviceIndex, rules: &[AclRule]) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("acl.update {}", index));
        st.take_failure("acl.update")?;
        let acl = st
            .acls
            .get_mut(&index)
            .ok_or_else(|| DeviceError::call("acl.update", DeviceStatus::ItemNotFound))?;
        acl.rules = rules.to_vec();
        Ok(())
    }

    fn delete(&mut self, index: DeviceIndex) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("acl.delete {}", index));
        st.take_failure("acl.delete")?;
        if st.acls.remove(&index).is_none() {
            return Err(DeviceError::call("acl.delete", DeviceStatus::ItemNotFound));
        }
        st.acl_alloc.release(index);
        Ok(())
    }

    fn set_interfaces(
        &mut self,
        index: DeviceIndex,
        ingress: &[DeviceIndex],
        egress: &[DeviceIndex],
    ) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("acl.set_interfaces {}", index));
        st.take_failure("acl.set_interfaces")?;
        let acl = st
            .acls
            .get_mut(&index)
            .ok_or_else(|| DeviceError::call("acl.set_interfaces", DeviceStatus::ItemNotFound))?;
        acl.ingress = ingress.to_vec();
        acl.egress = egress.to_vec();
        Ok(())
    }

    fn dump(&mut self) -> DeviceResult<Vec<AclState>> {
        let mut st = self.lock();
        st.record("acl.dump".to_string());
        Ok(st.acls.values().cloned().collect())
    }

    fn check_compatibility(&mut self) -> DeviceResult<()> {
        self.lock().check_compat("acl.compat".to_string())
    }
}

impl RouteApi for MockDevice {
    fn add(&mut self, cfg: &RouteConfig, if_index: Option<DeviceIndex>) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("route.add {}", cfg.key()));
        st.take_failure("route.add")?;
        if let Some(idx) = if_index {
            if !st.interface_exists(idx) {
                return Err(DeviceError::call("route.add", DeviceStatus::ItemNotFound));
            }
        }
        st.routes.insert(
            cfg.key(),
            RouteState {
                vrf: cfg.vrf,
                dst_network: cfg.dst_network.clone(),
                next_hop_addr: cfg.next_hop_addr.clone(),
                if_index,
                weight: cfg.weight,
                preference: cfg.preference,
            },
        );
        Ok(())
    }

    fn del(&mut self, cfg: &RouteConfig, _if_index: Option<DeviceIndex>) -> DeviceResult<()> {
        let mut st = self.lock();
        st.record(format!("route.del {}", cfg.key()));
        st.take_failure("route.del")?;
        st.routes.remove(&cfg.key());
        Ok(())
    }

    fn dump(&mut self) -> DeviceResult<Vec<RouteState>> {
        let mut st = self.lock();
        st.record("route.dump".to_string());
        Ok(st.routes.values().cloned().collect())
    }

    fn check_compatibility(&mut self) -> DeviceResult<()> {
        self.lock().check_compat("route.compat".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InterfaceKind;

    fn add_iface(dev: &mut MockDevice, name: &str) -> DeviceIndex {
        InterfaceApi::create(dev, &InterfaceConfig::new(name, InterfaceKind::Ethernet)).unwrap()
    }

    #[test]
    fn test_index_allocation_reuses_released() {
        let mut dev = MockDevice::new();
        let i0 = add_iface(&mut dev, "if0");
        let i1 = add_iface(&mut dev, "if1");
        assert_eq!((i0, i1), (0, 1));

        InterfaceApi::delete(&mut dev, i0).unwrap();
        // released index is reused
        assert_eq!(add_iface(&mut dev, "if2"), 0);
    }

    #[test]
    fn test_fail_next_fires_once() {
        let mut dev = MockDevice::new();
        dev.fail_next("iface.create", DeviceStatus::TableFull);

        let cfg = InterfaceConfig::new("if0", InterfaceKind::Ethernet);
        let err = InterfaceApi::create(&mut dev, &cfg).unwrap_err();
        assert_eq!(
            err,
            DeviceError::call("iface.create", DeviceStatus::TableFull)
        );

        assert!(InterfaceApi::create(&mut dev, &cfg).is_ok());
    }

    #[test]
    fn test_interface_delete_cascades() {
        let mut dev = MockDevice::new();
        let if0 = add_iface(&mut dev, "if0");
        let if1 = add_iface(&mut dev, "if1");
        let bd = BridgeApi::create(&mut dev, &BridgeDomainConfig::new("bd1")).unwrap();
        dev.set_member(bd, if0, false, 0).unwrap();
        FibApi::add(&mut dev, "aa:bb:cc:dd:ee:ff", bd, if0, false, true).unwrap();
        XConnectApi::set(&mut dev, if0, if1).unwrap();

        InterfaceApi::delete(&mut dev, if0).unwrap();

        assert_eq!(dev.bridge_member_count("bd1"), 0);
        assert_eq!(dev.fib_count(), 0);
        assert!(XConnectApi::dump(&mut dev).unwrap().is_empty());
    }

    #[test]
    fn test_bridge_delete_flushes_fibs() {
        let mut dev = MockDevice::new();
        let if0 = add_iface(&mut dev, "if0");
        let bd = BridgeApi::create(&mut dev, &BridgeDomainConfig::new("bd1")).unwrap();
        FibApi::add(&mut dev, "aa:bb:cc:dd:ee:ff", bd, if0, false, true).unwrap();

        BridgeApi::delete(&mut dev, bd).unwrap();
        assert_eq!(dev.fib_count(), 0);
    }

    #[test]
    fn test_call_recording_and_mutations_filter() {
        let mut dev = MockDevice::new();
        add_iface(&mut dev, "if0");
        InterfaceApi::dump(&mut dev).unwrap();
        InterfaceApi::check_compatibility(&mut dev).unwrap();

        assert_eq!(dev.calls().len(), 3);
        assert_eq!(dev.mutations(), vec!["iface.create if0"]);
    }

    #[test]
    fn test_incompatible_device() {
        let mut dev = MockDevice::with_config(MockDeviceConfig {
            compatible: false,
            ..Default::default()
        });
        assert!(matches!(
            InterfaceApi::check_compatibility(&mut dev),
            Err(DeviceError::Incompatible(_))
        ));
    }
}
