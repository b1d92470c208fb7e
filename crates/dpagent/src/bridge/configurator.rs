//! Bridge-domain lifecycle against the device.
//!
//! A bridge domain itself has no creation prerequisite, but its member
//! bindings depend on the referenced interfaces. Binding follows the batch
//! rule: members whose interface is not registered yet are skipped, never
//! failed, and are bound later when the interface registry reports them.
//! Base-parameter changes can only be applied by destroying and recreating
//! the domain; member and ARP-table changes apply in place.

use std::collections::HashSet;
use std::sync::MutexGuard;

use dpagent_common::{ErrorLog, IndexedRegistry, OpKind, SharedRegistry};
use dpagent_device::api::{
    ArpTerminationEntry, BridgeApi, BridgeDomainConfig, BridgeDomainState, BridgeInterface,
};
use dpagent_device::{DeviceError, DeviceIndex};
use thiserror::Error;

use super::types::{BridgeDomainMeta, MEMBER_INTERFACE_KEY};
use crate::iface::InterfaceMeta;
use crate::status::{StatusEvent, StatusSender};

/// Error type for bridge-domain operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// More than one member is flagged as the BVI.
    #[error("bridge domain {0} configures {1} BVI members, at most one allowed")]
    MultipleBvi(String, usize),
    /// The device rejected a call.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Bridge-domain configurator.
pub struct BridgeDomainConfigurator {
    device: Box<dyn BridgeApi>,
    registry: SharedRegistry<BridgeDomainMeta>,
    interfaces: SharedRegistry<InterfaceMeta>,
    errors: ErrorLog,
    status: StatusSender,
}

impl BridgeDomainConfigurator {
    /// Creates the configurator, verifying device compatibility first.
    pub fn new(
        mut device: Box<dyn BridgeApi>,
        interfaces: SharedRegistry<InterfaceMeta>,
        status: StatusSender,
    ) -> Result<Self, BridgeError> {
        device.check_compatibility()?;
        Ok(Self {
            device,
            registry: IndexedRegistry::new_shared("bridge-domains"),
            interfaces,
            errors: ErrorLog::new("bridge-domains"),
            status,
        })
    }

    /// Replaces the error log (capacity tuning at construction time).
    pub fn with_error_log(mut self, errors: ErrorLog) -> Self {
        self.errors = errors;
        self
    }

    /// Shared handle to the bridge-domain registry.
    pub fn registry(&self) -> SharedRegistry<BridgeDomainMeta> {
        SharedRegistry::clone(&self.registry)
    }

    /// The bridge-domain error log.
    pub fn error_log(&self) -> &ErrorLog {
        &self.errors
    }

    /// Creates the bridge domain, binds whatever members resolve, installs
    /// ARP termination entries and registers the domain.
    pub fn configure(&mut self, cfg: &BridgeDomainConfig) -> Result<(), BridgeError> {
        let result = self.do_configure(cfg);
        if let Err(err) = &result {
            self.errors.record(&cfg.name, OpKind::Create, err.to_string());
        }
        result
    }

    /// Applies the difference between `old` and `new`. A base-parameter
    /// change recreates the domain; member and ARP changes apply in place.
    pub fn modify(
        &mut self,
        old: &BridgeDomainConfig,
        new: &BridgeDomainConfig,
    ) -> Result<(), BridgeError> {
        let result = self.do_modify(old, new);
        if let Err(err) = &result {
            self.errors.record(&new.name, OpKind::Modify, err.to_string());
        }
        result
    }

    /// Unbinds resolvable members, deletes the domain and unregisters it.
    pub fn delete(&mut self, cfg: &BridgeDomainConfig) -> Result<(), BridgeError> {
        match self.do_delete(cfg) {
            Ok(()) => {
                self.errors.purge(&cfg.name);
                Ok(())
            }
            Err(err) => {
                self.errors.record(&cfg.name, OpKind::Delete, err.to_string());
                Err(err)
            }
        }
    }

    /// Binds an interface that just registered into every bridge domain
    /// referencing it as a member.
    pub fn resolve_interface_added(&mut self, ifname: &str, if_index: DeviceIndex) {
        let referencing = self.reg().lookup_by_secondary(MEMBER_INTERFACE_KEY, ifname);
        for bd_name in referencing {
            let Some((bd_index, mut meta)) = self.reg().lookup_by_name(&bd_name) else {
                continue;
            };
            if meta.is_bound(ifname) {
                continue;
            }
            let Some(member) = meta
                .config
                .interfaces
                .iter()
                .find(|m| m.name == ifname)
                .cloned()
            else {
                continue;
            };
            log::info!("binding interface {} into bridge domain {}", ifname, bd_name);
            match self
                .device
                .set_member(bd_index, if_index, member.bvi, member.split_horizon_group)
            {
                Ok(()) => {
                    meta.bound.push(ifname.to_string());
                    self.reg().register(&bd_name, bd_index, meta);
                    self.publish_current(&bd_name);
                }
                Err(err) => {
                    log::error!(
                        "binding {} into bridge domain {} failed: {}",
                        ifname,
                        bd_name,
                        err
                    );
                    self.errors.record(&bd_name, OpKind::Modify, err.to_string());
                }
            }
        }
    }

    /// Records that an interface disappeared; the device already dropped
    /// the binding itself, so only bookkeeping and status change here.
    pub fn resolve_interface_removed(&mut self, ifname: &str) {
        let referencing = self.reg().lookup_by_secondary(MEMBER_INTERFACE_KEY, ifname);
        for bd_name in referencing {
            let Some((bd_index, mut meta)) = self.reg().lookup_by_name(&bd_name) else {
                continue;
            };
            if !meta.is_bound(ifname) {
                continue;
            }
            meta.bound.retain(|b| b != ifname);
            self.reg().register(&bd_name, bd_index, meta);
            self.publish_current(&bd_name);
        }
    }

    /// Reconciles the full desired bridge-domain set against a device dump.
    pub fn resync(&mut self, desired: &[BridgeDomainConfig]) -> Result<(), BridgeError> {
        log::info!("resyncing {} desired bridge domains", desired.len());
        let mut first_err: Option<BridgeError> = None;

        // invalid items abort only themselves
        let mut valid: Vec<&BridgeDomainConfig> = Vec::new();
        for cfg in desired {
            match self.validate(cfg) {
                Ok(()) => valid.push(cfg),
                Err(err) => {
                    log::error!("resync: {}", err);
                    self.errors.record(&cfg.name, OpKind::Create, err.to_string());
                    first_err.get_or_insert(err);
                }
            }
        }

        let dumped = self.device.dump()?;
        for state in &dumped {
            let wanted = valid.iter().find(|cfg| cfg.name == state.name);
            match wanted {
                // an unnamed dump cannot be correlated and counts as obsolete
                None => {
                    if let Err(err) = self.remove_dumped(state) {
                        first_err.get_or_insert(err);
                    }
                }
                Some(cfg) if !params_match(state, cfg) => {
                    log::debug!(
                        "bridge domain {} base parameters drifted, recreating",
                        state.name
                    );
                    if let Err(err) = self.remove_dumped(state) {
                        first_err.get_or_insert(err);
                        continue;
                    }
                    if let Err(err) = self.configure(cfg) {
                        first_err.get_or_insert(err);
                    }
                }
                Some(cfg) => {
                    if let Err(err) = self.adopt_dumped(state, cfg) {
                        self.errors.record(&cfg.name, OpKind::Modify, err.to_string());
                        first_err.get_or_insert(err);
                    }
                }
            }
        }

        for cfg in &valid {
            if !dumped.iter().any(|s| s.name == cfg.name) {
                if let Err(err) = self.configure(cfg) {
                    first_err.get_or_insert(err);
                }
            }
        }

        let registered = self.reg().names();
        for name in registered {
            let dumped_has = dumped.iter().any(|s| s.name == name);
            let desired_has = valid.iter().any(|c| c.name == name);
            if !dumped_has && !desired_has {
                self.reg().unregister(&name);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn do_configure(&mut self, cfg: &BridgeDomainConfig) -> Result<(), BridgeError> {
        self.validate(cfg)?;

        let existing = self.reg().lookup_by_name(&cfg.name);
        if let Some((_, meta)) = existing {
            log::debug!("bridge domain {} already registered, modifying", cfg.name);
            return self.do_modify(&meta.config, cfg);
        }

        log::info!("configuring bridge domain {}", cfg.name);
        let bd_index = self.device.create(cfg)?;

        let mut first_err: Option<BridgeError> = None;
        let (bound, unresolved) = self.bind_members(bd_index, &cfg.interfaces, &mut first_err);
        if !unresolved.is_empty() {
            log::debug!(
                "bridge domain {}: members {:?} postponed until their interface registers",
                cfg.name,
                unresolved
            );
        }

        for entry in &cfg.arp_termination_table {
            if let Err(err) = self.device.add_arp_entry(bd_index, entry) {
                log::error!(
                    "bridge domain {}: ARP termination entry {} failed: {}",
                    cfg.name,
                    entry.ip_address,
                    err
                );
                first_err.get_or_insert(err.into());
            }
        }

        self.reg().register(
            &cfg.name,
            bd_index,
            BridgeDomainMeta::new(cfg.clone(), bound),
        );
        self.publish_current(&cfg.name);

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn do_modify(
        &mut self,
        old: &BridgeDomainConfig,
        new: &BridgeDomainConfig,
    ) -> Result<(), BridgeError> {
        self.validate(new)?;

        if new.params_differ(old) {
            log::debug!("bridge domain {} base parameters changed, recreating", new.name);
            self.do_delete(old)?;
            return self.do_configure(new);
        }

        let found = self.reg().lookup_by_name(&old.name);
        let Some((bd_index, meta)) = found else {
            // missing old state, the diff cannot be trusted
            log::warn!(
                "bridge domain {} modify without registered old state, creating as new",
                new.name
            );
            return self.do_configure(new);
        };

        let mut first_err: Option<BridgeError> = None;
        let mut bound = meta.bound.clone();

        let (to_set, to_unset) = member_diff(&new.interfaces, &old.interfaces);
        for member in &to_unset {
            bound.retain(|b| b != &member.name);
            let resolved = self.lookup_interface(&member.name);
            let Some(if_index) = resolved else {
                // interface already gone, the device dropped the binding
                continue;
            };
            if let Err(err) = self.device.unset_member(bd_index, if_index) {
                log::error!(
                    "bridge domain {}: unbinding {} failed: {}",
                    new.name,
                    member.name,
                    err
                );
                first_err.get_or_insert(err.into());
            }
        }
        for member in &to_set {
            let Some(if_index) = self.lookup_interface(&member.name) else {
                log::debug!(
                    "bridge domain {}: member {} postponed until its interface registers",
                    new.name,
                    member.name
                );
                continue;
            };
            match self
                .device
                .set_member(bd_index, if_index, member.bvi, member.split_horizon_group)
            {
                Ok(()) => bound.push(member.name.clone()),
                Err(err) => {
                    log::error!(
                        "bridge domain {}: binding {} failed: {}",
                        new.name,
                        member.name,
                        err
                    );
                    first_err.get_or_insert(err.into());
                }
            }
        }

        let (to_add, to_remove) = arp_diff(&new.arp_termination_table, &old.arp_termination_table);
        for entry in to_add {
            if let Err(err) = self.device.add_arp_entry(bd_index, entry) {
                log::error!("bridge domain {}: ARP add failed: {}", new.name, err);
                first_err.get_or_insert(err.into());
            }
        }
        for entry in to_remove {
            if let Err(err) = self.device.del_arp_entry(bd_index, entry) {
                log::error!("bridge domain {}: ARP remove failed: {}", new.name, err);
                first_err.get_or_insert(err.into());
            }
        }

        self.reg()
            .register(&new.name, bd_index, BridgeDomainMeta::new(new.clone(), bound));
        self.publish_current(&new.name);

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn do_delete(&mut self, cfg: &BridgeDomainConfig) -> Result<(), BridgeError> {
        let found = self.reg().lookup_by_name(&cfg.name);
        let Some((bd_index, meta)) = found else {
            log::debug!("bridge domain {} not registered, nothing to delete", cfg.name);
            return Ok(());
        };

        log::info!("deleting bridge domain {}", cfg.name);
        for member in &meta.bound {
            let Some(if_index) = self.lookup_interface(member) else {
                continue;
            };
            if let Err(err) = self.device.unset_member(bd_index, if_index) {
                log::error!(
                    "bridge domain {}: unbinding {} failed: {}",
                    cfg.name,
                    member,
                    err
                );
            }
        }

        self.device.delete(bd_index)?;
        self.reg().unregister(&cfg.name);
        self.status.send(StatusEvent::BridgeDomain {
            name: cfg.name.clone(),
            state: None,
        });
        Ok(())
    }

    /// Deletes a dumped domain and clears any bookkeeping for it.
    fn remove_dumped(&mut self, state: &BridgeDomainState) -> Result<(), BridgeError> {
        log::debug!("bridge domain {:?} is obsolete, deleting", state.name);
        if let Err(err) = self.device.delete(state.bd_index) {
            log::error!("resync: delete of bridge domain {} failed: {}", state.name, err);
            if !state.name.is_empty() {
                self.errors
                    .record(&state.name, OpKind::Delete, err.to_string());
            }
            return Err(err.into());
        }
        if !state.name.is_empty() {
            self.reg().unregister(&state.name);
            self.status.send(StatusEvent::BridgeDomain {
                name: state.name.clone(),
                state: None,
            });
        }
        Ok(())
    }

    /// Converges a dumped domain whose base parameters already match the
    /// desired config: member and ARP diffs only, no call when identical.
    fn adopt_dumped(
        &mut self,
        state: &BridgeDomainState,
        cfg: &BridgeDomainConfig,
    ) -> Result<(), BridgeError> {
        let mut first_err: Option<BridgeError> = None;

        // resolve desired members through the interface registry
        let mut resolved: Vec<(String, DeviceIndex, bool, u8)> = Vec::new();
        for member in &cfg.interfaces {
            match self.lookup_interface(&member.name) {
                Some(if_index) => resolved.push((
                    member.name.clone(),
                    if_index,
                    member.bvi,
                    member.split_horizon_group,
                )),
                None => log::debug!(
                    "bridge domain {}: member {} postponed until its interface registers",
                    cfg.name,
                    member.name
                ),
            }
        }

        let want: HashSet<(DeviceIndex, bool, u8)> = resolved
            .iter()
            .map(|(_, idx, bvi, shg)| (*idx, *bvi, *shg))
            .collect();
        let have: HashSet<(DeviceIndex, bool, u8)> = state
            .interfaces
            .iter()
            .map(|m| (m.if_index, m.bvi, m.split_horizon_group))
            .collect();

        for member in &state.interfaces {
            if !want.contains(&(member.if_index, member.bvi, member.split_horizon_group)) {
                if let Err(err) = self.device.unset_member(state.bd_index, member.if_index) {
                    log::error!(
                        "resync: unbinding if{} from bridge domain {} failed: {}",
                        member.if_index,
                        cfg.name,
                        err
                    );
                    first_err.get_or_insert(err.into());
                }
            }
        }
        for (name, if_index, bvi, shg) in &resolved {
            if !have.contains(&(*if_index, *bvi, *shg)) {
                if let Err(err) = self.device.set_member(state.bd_index, *if_index, *bvi, *shg) {
                    log::error!(
                        "resync: binding {} into bridge domain {} failed: {}",
                        name,
                        cfg.name,
                        err
                    );
                    first_err.get_or_insert(err.into());
                }
            }
        }

        let (to_add, to_remove) = arp_diff(&cfg.arp_termination_table, &state.arp_termination_table);
        for entry in to_add {
            if let Err(err) = self.device.add_arp_entry(state.bd_index, entry) {
                first_err.get_or_insert(err.into());
            }
        }
        for entry in to_remove {
            if let Err(err) = self.device.del_arp_entry(state.bd_index, entry) {
                first_err.get_or_insert(err.into());
            }
        }

        let bound = resolved.into_iter().map(|(name, ..)| name).collect();
        self.reg().register(
            &cfg.name,
            state.bd_index,
            BridgeDomainMeta::new(cfg.clone(), bound),
        );
        self.publish_current(&cfg.name);

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Binds the members whose interface resolves, skipping the rest; a
    /// single unresolvable member never blocks the batch.
    fn bind_members(
        &mut self,
        bd_index: DeviceIndex,
        members: &[BridgeInterface],
        first_err: &mut Option<BridgeError>,
    ) -> (Vec<String>, Vec<String>) {
        let mut bound = Vec::new();
        let mut unresolved = Vec::new();
        for member in members {
            let Some(if_index) = self.lookup_interface(&member.name) else {
                unresolved.push(member.name.clone());
                continue;
            };
            match self
                .device
                .set_member(bd_index, if_index, member.bvi, member.split_horizon_group)
            {
                Ok(()) => bound.push(member.name.clone()),
                Err(err) => {
                    log::error!("binding {} failed: {}", member.name, err);
                    first_err.get_or_insert(err.into());
                }
            }
        }
        (bound, unresolved)
    }

    fn validate(&self, cfg: &BridgeDomainConfig) -> Result<(), BridgeError> {
        let bvi_count = cfg.interfaces.iter().filter(|m| m.bvi).count();
        if bvi_count > 1 {
            return Err(BridgeError::MultipleBvi(cfg.name.clone(), bvi_count));
        }
        Ok(())
    }

    fn lookup_interface(&self, name: &str) -> Option<DeviceIndex> {
        self.interfaces
            .lock()
            .expect("interface registry poisoned")
            .lookup_by_name(name)
            .map(|(idx, _)| idx)
    }

    /// Publishes the domain's current device state, looked up from a fresh
    /// dump; a domain the device no longer reports publishes as removed.
    fn publish_current(&mut self, name: &str) {
        match self.device.dump() {
            Ok(dump) => {
                let state = dump.into_iter().find(|s| s.name == name);
                self.status.send(StatusEvent::BridgeDomain {
                    name: name.to_string(),
                    state,
                });
            }
            Err(err) => log::warn!("status dump for bridge domain {} failed: {}", name, err),
        }
    }

    fn reg(&self) -> MutexGuard<'_, IndexedRegistry<BridgeDomainMeta>> {
        self.registry.lock().expect("bridge registry poisoned")
    }
}

fn params_match(state: &BridgeDomainState, cfg: &BridgeDomainConfig) -> bool {
    state.flood == cfg.flood
        && state.unknown_unicast_flood == cfg.unknown_unicast_flood
        && state.forward == cfg.forward
        && state.learn == cfg.learn
        && state.arp_termination == cfg.arp_termination
        && state.mac_age == cfg.mac_age
}

/// Member lists to set and unset when moving from `old_members` to
/// `new_members`.
///
/// A BVI change unsets both the previous and the upcoming BVI member and
/// re-sets them so their flags are correct on the device.
fn member_diff(
    new_members: &[BridgeInterface],
    old_members: &[BridgeInterface],
) -> (Vec<BridgeInterface>, Vec<BridgeInterface>) {
    let new_bvi = new_members.iter().find(|m| m.bvi);
    let old_bvi = old_members.iter().find(|m| m.bvi);
    let bvi_changed = match (old_bvi, new_bvi) {
        (None, None) => false,
        (Some(o), Some(n)) => o.name != n.name,
        _ => true,
    };

    let mut to_unset = Vec::new();
    for old in old_members {
        if !new_members.iter().any(|n| n.name == old.name) {
            to_unset.push(old.clone());
            continue;
        }
        if bvi_changed {
            if old_bvi.is_some_and(|b| b.name == old.name) {
                to_unset.push(old.clone());
                continue;
            }
            if new_bvi.is_some_and(|b| b.name == old.name) {
                to_unset.push(old.clone());
            }
        }
    }

    let mut to_set = Vec::new();
    for new in new_members {
        if !old_members.iter().any(|o| o.name == new.name) {
            to_set.push(new.clone());
            continue;
        }
        if bvi_changed {
            if old_bvi.is_some_and(|b| b.name == new.name) {
                to_set.push(new.clone());
                continue;
            }
            if new_bvi.is_some_and(|b| b.name == new.name) {
                to_set.push(new.clone());
            }
        }
    }

    (to_set, to_unset)
}

/// ARP termination entries to add and remove when moving from `old` to
/// `new`.
fn arp_diff<'a>(
    new: &'a [ArpTerminationEntry],
    old: &'a [ArpTerminationEntry],
) -> (Vec<&'a ArpTerminationEntry>, Vec<&'a ArpTerminationEntry>) {
    let to_add = new.iter().filter(|n| !old.contains(n)).collect();
    let to_remove = old.iter().filter(|o| !new.contains(o)).collect();
    (to_add, to_remove)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::InterfaceConfigurator;
    use crate::status;
    use dpagent_device::api::{InterfaceApi, InterfaceConfig, InterfaceKind};
    use dpagent_device::MockDevice;

    struct Fixture {
        ifaces: InterfaceConfigurator,
        bridges: BridgeDomainConfigurator,
        device: MockDevice,
    }

    fn setup() -> Fixture {
        let device = MockDevice::new();
        let (tx, _rx) = status::status_channel(256);
        let ifaces =
            InterfaceConfigurator::new(Box::new(device.session()), tx.clone()).unwrap();
        let bridges = BridgeDomainConfigurator::new(
            Box::new(device.session()),
            ifaces.registry(),
            tx,
        )
        .unwrap();
        Fixture {
            ifaces,
            bridges,
            device,
        }
    }

    fn eth(name: &str) -> InterfaceConfig {
        InterfaceConfig::new(name, InterfaceKind::Ethernet)
    }

    #[test]
    fn test_configure_binds_resolved_members_only() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("if0")).unwrap();

        let bd = BridgeDomainConfig::new("bd1")
            .with_interface(BridgeInterface::new("if0"))
            .with_interface(BridgeInterface::new("missing"));
        // an unresolvable member never fails the batch
        fx.bridges.configure(&bd).unwrap();

        assert_eq!(fx.device.bridge_member_count("bd1"), 1);
        let reg = fx.bridges.registry();
        let (_, meta) = reg.lock().unwrap().lookup_by_name("bd1").unwrap();
        assert_eq!(meta.bound, vec!["if0"]);
    }

    #[test]
    fn test_configure_rejects_multiple_bvi() {
        let mut fx = setup();
        let bd = BridgeDomainConfig::new("bd1")
            .with_interface(BridgeInterface::new("a").as_bvi())
            .with_interface(BridgeInterface::new("b").as_bvi());

        assert!(matches!(
            fx.bridges.configure(&bd),
            Err(BridgeError::MultipleBvi(_, 2))
        ));
        assert_eq!(fx.device.call_count("bridge.create"), 0);
        assert_eq!(fx.bridges.error_log().errors_for("bd1").len(), 1);
    }

    #[test]
    fn test_resolve_interface_added_binds_pending_member() {
        let mut fx = setup();
        let bd = BridgeDomainConfig::new("bd1").with_interface(BridgeInterface::new("if0"));
        fx.bridges.configure(&bd).unwrap();
        assert_eq!(fx.device.bridge_member_count("bd1"), 0);

        fx.ifaces.configure(&eth("if0")).unwrap();
        let if_index = fx.device.interface_index("if0").unwrap();
        fx.bridges.resolve_interface_added("if0", if_index);

        assert_eq!(fx.device.bridge_member_count("bd1"), 1);

        // a second identical notification must not issue another bind
        fx.device.clear_calls();
        fx.bridges.resolve_interface_added("if0", if_index);
        assert_eq!(fx.device.call_count("bridge.set_member"), 0);
    }

    #[test]
    fn test_modify_params_recreates_domain() {
        let mut fx = setup();
        let old = BridgeDomainConfig::new("bd1");
        fx.bridges.configure(&old).unwrap();

        let mut new = old.clone();
        new.mac_age = 10;
        fx.bridges.modify(&old, &new).unwrap();

        assert_eq!(fx.device.call_count("bridge.delete"), 1);
        assert_eq!(fx.device.call_count("bridge.create"), 2);
    }

    #[test]
    fn test_modify_members_in_place() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("if0")).unwrap();
        fx.ifaces.configure(&eth("if1")).unwrap();

        let old = BridgeDomainConfig::new("bd1").with_interface(BridgeInterface::new("if0"));
        fx.bridges.configure(&old).unwrap();

        let new = BridgeDomainConfig::new("bd1").with_interface(BridgeInterface::new("if1"));
        fx.bridges.modify(&old, &new).unwrap();

        assert_eq!(fx.device.call_count("bridge.delete"), 0);
        assert_eq!(fx.device.call_count("bridge.unset_member"), 1);
        assert_eq!(fx.device.call_count("bridge.set_member"), 2);
        let reg = fx.bridges.registry();
        let (_, meta) = reg.lock().unwrap().lookup_by_name("bd1").unwrap();
        assert_eq!(meta.bound, vec!["if1"]);
    }

    #[test]
    fn test_delete_unregisters_and_notifies() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("if0")).unwrap();
        let bd = BridgeDomainConfig::new("bd1").with_interface(BridgeInterface::new("if0"));
        fx.bridges.configure(&bd).unwrap();

        let reg = fx.bridges.registry();
        let events = reg.lock().unwrap().subscribe("test");

        fx.bridges.delete(&bd).unwrap();
        assert!(reg.lock().unwrap().lookup_by_name("bd1").is_none());
        assert!(fx.device.bridge_index("bd1").is_none());

        let removed = events.drain();
        assert_eq!(removed.len(), 1);
        assert_eq!(
            removed[0].kind,
            dpagent_common::RegistryEventKind::Removed
        );
    }

    #[test]
    fn test_member_diff_bvi_reassignment() {
        let old = vec![
            BridgeInterface::new("if0").as_bvi(),
            BridgeInterface::new("if1"),
        ];
        let new = vec![
            BridgeInterface::new("if0"),
            BridgeInterface::new("if1").as_bvi(),
        ];

        let (to_set, to_unset) = member_diff(&new, &old);
        // both members are unset and re-set so their BVI flags flip
        let unset_names: Vec<&str> = to_unset.iter().map(|m| m.name.as_str()).collect();
        let set_names: Vec<&str> = to_set.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(unset_names, vec!["if0", "if1"]);
        assert_eq!(set_names, vec!["if0", "if1"]);
    }

    #[test]
    fn test_member_diff_plain_add_remove() {
        let old = vec![BridgeInterface::new("if0"), BridgeInterface::new("if1")];
        let new = vec![BridgeInterface::new("if1"), BridgeInterface::new("if2")];

        let (to_set, to_unset) = member_diff(&new, &old);
        assert_eq!(to_unset.len(), 1);
        assert_eq!(to_unset[0].name, "if0");
        assert_eq!(to_set.len(), 1);
        assert_eq!(to_set[0].name, "if2");
    }

    #[test]
    fn test_arp_diff() {
        let old_bd = BridgeDomainConfig::new("bd")
            .with_arp_entry("10.0.0.1", "aa:aa:aa:aa:aa:01")
            .with_arp_entry("10.0.0.2", "aa:aa:aa:aa:aa:02");
        let new_bd = BridgeDomainConfig::new("bd")
            .with_arp_entry("10.0.0.2", "aa:aa:aa:aa:aa:02")
            .with_arp_entry("10.0.0.3", "aa:aa:aa:aa:aa:03");

        let (to_add, to_remove) =
            arp_diff(&new_bd.arp_termination_table, &old_bd.arp_termination_table);
        assert_eq!(to_add.len(), 1);
        assert_eq!(to_add[0].ip_address, "10.0.0.3");
        assert_eq!(to_remove.len(), 1);
        assert_eq!(to_remove[0].ip_address, "10.0.0.1");
    }

    #[test]
    fn test_resync_converged_makes_no_device_mutations() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("if0")).unwrap();
        let bd = BridgeDomainConfig::new("bd1")
            .with_interface(BridgeInterface::new("if0"))
            .with_arp_entry("10.0.0.1", "aa:aa:aa:aa:aa:01");
        fx.bridges.configure(&bd).unwrap();
        fx.device.clear_calls();

        fx.bridges.resync(std::slice::from_ref(&bd)).unwrap();
        assert!(fx.device.mutations().is_empty());
    }

    #[test]
    fn test_resync_deletes_obsolete_before_creating_missing() {
        let mut fx = setup();
        fx.bridges
            .configure(&BridgeDomainConfig::new("stale"))
            .unwrap();
        fx.device.clear_calls();

        fx.bridges
            .resync(&[BridgeDomainConfig::new("fresh")])
            .unwrap();

        let mutations = fx.device.mutations();
        assert_eq!(mutations.len(), 2);
        assert!(mutations[0].starts_with("bridge.delete"));
        assert!(mutations[1].starts_with("bridge.create fresh"));
        assert!(fx.device.bridge_index("stale").is_none());
    }

    #[test]
    fn test_resync_converges_member_drift() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("if0")).unwrap();
        fx.ifaces.configure(&eth("if1")).unwrap();
        // device has if0 bound, desired wants if1
        let initial = BridgeDomainConfig::new("bd1").with_interface(BridgeInterface::new("if0"));
        fx.bridges.configure(&initial).unwrap();
        fx.device.clear_calls();

        let desired = BridgeDomainConfig::new("bd1").with_interface(BridgeInterface::new("if1"));
        fx.bridges.resync(&[desired]).unwrap();

        assert_eq!(fx.device.call_count("bridge.unset_member"), 1);
        assert_eq!(fx.device.call_count("bridge.set_member"), 1);
        assert_eq!(fx.device.call_count("bridge.create"), 0);
    }
}
