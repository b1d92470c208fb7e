//! L2 FIB lifecycle against the device.
//!
//! Every FIB entry depends on its bridge domain and its outgoing interface.
//! An entry whose prerequisites are not registered yet is parked in the
//! add-cache; a delete whose prerequisites vanished first is parked in the
//! delete-cache until the device is confirmed to have dropped the entry or
//! the prerequisite returns. An entry is registered XOR parked, never both.

use std::sync::MutexGuard;

use dpagent_common::{
    Dependency, ErrorLog, IndexedRegistry, OpKind, PendingCache, SharedRegistry,
};
use dpagent_device::api::{FibApi, FibEntry, FibState};
use dpagent_device::{DeviceError, DeviceIndex};
use thiserror::Error;

use super::types::{FibMeta, FIB_BRIDGE_KEY, FIB_INTERFACE_KEY};
use crate::bridge::BridgeDomainMeta;
use crate::iface::InterfaceMeta;
use crate::status::{StatusEvent, StatusSender};
use crate::{BRIDGE_REGISTRY, INTERFACE_REGISTRY};

/// Error type for FIB operations.
#[derive(Debug, Error)]
pub enum FibError {
    /// The entry has no MAC address.
    #[error("FIB entry has no MAC address")]
    MissingMac,
    /// The entry names no bridge domain.
    #[error("FIB entry {0} names no bridge domain")]
    MissingBridgeDomain(String),
    /// The entry names no outgoing interface.
    #[error("FIB entry {0} names no outgoing interface")]
    MissingInterface(String),
    /// The device rejected a call.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// FIB configurator with add/delete dependency caches.
pub struct FibConfigurator {
    device: Box<dyn FibApi>,
    registry: SharedRegistry<FibMeta>,
    add_cache: PendingCache<FibEntry>,
    del_cache: PendingCache<FibEntry>,
    interfaces: SharedRegistry<InterfaceMeta>,
    bridges: SharedRegistry<BridgeDomainMeta>,
    index_seq: u32,
    errors: ErrorLog,
    status: StatusSender,
}

impl FibConfigurator {
    /// Creates the configurator, verifying device compatibility first.
    pub fn new(
        mut device: Box<dyn FibApi>,
        interfaces: SharedRegistry<InterfaceMeta>,
        bridges: SharedRegistry<BridgeDomainMeta>,
        status: StatusSender,
    ) -> Result<Self, FibError> {
        device.check_compatibility()?;
        Ok(Self {
            device,
            registry: IndexedRegistry::new_shared("fib"),
            add_cache: PendingCache::new("fib-add-cache"),
            del_cache: PendingCache::new("fib-del-cache"),
            interfaces,
            bridges,
            index_seq: 0,
            errors: ErrorLog::new("fib"),
            status,
        })
    }

    /// Replaces the error log (capacity tuning at construction time).
    pub fn with_error_log(mut self, errors: ErrorLog) -> Self {
        self.errors = errors;
        self
    }

    /// Shared handle to the FIB registry.
    pub fn registry(&self) -> SharedRegistry<FibMeta> {
        SharedRegistry::clone(&self.registry)
    }

    /// The FIB error log.
    pub fn error_log(&self) -> &ErrorLog {
        &self.errors
    }

    /// True if the MAC is parked in the add-cache.
    pub fn is_pending_add(&self, mac: &str) -> bool {
        self.add_cache.contains(mac)
    }

    /// True if the MAC is parked in the delete-cache.
    pub fn is_pending_delete(&self, mac: &str) -> bool {
        self.del_cache.contains(mac)
    }

    /// Installs the entry, or parks it when a prerequisite is missing.
    /// A missing prerequisite is not an error.
    pub fn configure(&mut self, entry: &FibEntry) -> Result<(), FibError> {
        let result = self.do_configure(entry);
        if let Err(err) = &result {
            self.errors
                .record(&entry.phys_address, OpKind::Create, err.to_string());
        }
        result
    }

    /// Replaces `old` with `new`: the old entry is removed (or parked for
    /// removal) and the new one installed (or parked), whichever each side
    /// allows.
    pub fn modify(&mut self, old: &FibEntry, new: &FibEntry) -> Result<(), FibError> {
        let deleted = self.delete(old);
        let configured = self.configure(new);
        match (deleted, configured) {
            (Err(err), _) => Err(err),
            (Ok(()), result) => result,
        }
    }

    /// Removes the entry: cancels a parked creation, deletes from the
    /// device when the prerequisites still resolve, or parks the delete
    /// until the device drop is confirmed.
    pub fn delete(&mut self, entry: &FibEntry) -> Result<(), FibError> {
        match self.do_delete(entry) {
            Ok(confirmed) => {
                if confirmed {
                    self.errors.purge(&entry.phys_address);
                }
                Ok(())
            }
            Err(err) => {
                self.errors
                    .record(&entry.phys_address, OpKind::Delete, err.to_string());
                Err(err)
            }
        }
    }

    /// Re-validates parked entries after an interface registered.
    pub fn resolve_interface_added(&mut self, ifname: &str) {
        self.resolve_added(Dependency::new(INTERFACE_REGISTRY, ifname));
    }

    /// Re-validates parked entries after a bridge domain registered.
    pub fn resolve_bridge_added(&mut self, bdname: &str) {
        self.resolve_added(Dependency::new(BRIDGE_REGISTRY, bdname));
    }

    /// Moves realized entries that referenced the vanished interface back
    /// into the add-cache and re-arms parked ones.
    pub fn resolve_interface_removed(&mut self, ifname: &str) {
        self.resolve_removed(FIB_INTERFACE_KEY, ifname);
    }

    /// Moves realized entries that referenced the vanished bridge domain
    /// back into the add-cache and re-arms parked ones.
    pub fn resolve_bridge_removed(&mut self, bdname: &str) {
        self.resolve_removed(FIB_BRIDGE_KEY, bdname);
    }

    /// Reconciles the full desired FIB set against a device dump. Dumped
    /// indices are correlated back to names through the interface and
    /// bridge-domain registries, so those must have been resynced first.
    pub fn resync(&mut self, desired: &[FibEntry]) -> Result<(), FibError> {
        log::info!("resyncing {} desired FIB entries", desired.len());
        // the snapshot replaces all pending intent
        self.add_cache.clear();
        self.del_cache.clear();

        let mut first_err: Option<FibError> = None;
        let dumped = self.device.dump()?;

        for state in &dumped {
            let bd_name = self.lookup_bridge_name(state.bd_index);
            let if_name = self.lookup_interface_name(state.if_index);
            let wanted = desired
                .iter()
                .find(|e| e.phys_address == state.phys_address);
            match wanted {
                None => {
                    log::debug!("FIB entry {} is obsolete, deleting", state.phys_address);
                    if let Err(err) =
                        self.device.del(&state.phys_address, state.bd_index, state.if_index)
                    {
                        log::error!("resync: delete of {} failed: {}", state.phys_address, err);
                        self.errors
                            .record(&state.phys_address, OpKind::Delete, err.to_string());
                        first_err.get_or_insert(err.into());
                        continue;
                    }
                    self.reg().unregister(&state.phys_address);
                    self.publish(&state.phys_address, None);
                }
                Some(entry) => {
                    let converged = bd_name.as_deref() == Some(entry.bridge_domain.as_str())
                        && if_name.as_deref() == Some(entry.outgoing_interface.as_str())
                        && state.bvi == entry.bvi
                        && state.static_config == entry.static_config;
                    if converged {
                        if !self.reg().contains(&entry.phys_address) {
                            let idx = self.next_index();
                            self.reg().register(
                                &entry.phys_address,
                                idx,
                                FibMeta::new(entry.clone()),
                            );
                        }
                        self.publish(&entry.phys_address, Some(state.clone()));
                    } else {
                        log::debug!("FIB entry {} drifted, replacing", entry.phys_address);
                        if let Err(err) =
                            self.device.del(&state.phys_address, state.bd_index, state.if_index)
                        {
                            self.errors
                                .record(&state.phys_address, OpKind::Modify, err.to_string());
                            first_err.get_or_insert(err.into());
                            continue;
                        }
                        self.reg().unregister(&state.phys_address);
                        if let Err(err) = self.configure(entry) {
                            first_err.get_or_insert(err);
                        }
                    }
                }
            }
        }

        for entry in desired {
            if !dumped.iter().any(|s| s.phys_address == entry.phys_address) {
                if let Err(err) = self.configure(entry) {
                    first_err.get_or_insert(err);
                }
            }
        }

        let registered = self.reg().names();
        for name in registered {
            let dumped_has = dumped.iter().any(|s| s.phys_address == name);
            let desired_has = desired.iter().any(|e| e.phys_address == name);
            if !dumped_has && !desired_has {
                self.reg().unregister(&name);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn do_configure(&mut self, entry: &FibEntry) -> Result<(), FibError> {
        self.validate(entry)?;
        let name = entry.phys_address.clone();

        // a newer desired add overrides a parked delete of the same MAC
        self.del_cache.remove(&name);

        match self.resolve_deps(entry) {
            Err(missing) => {
                log::debug!(
                    "FIB entry {} waiting on {} prerequisites, cached",
                    name,
                    missing.len()
                );
                self.reg().unregister(&name);
                self.add_cache.insert(name, entry.clone(), missing);
                Ok(())
            }
            Ok((bd_index, if_index)) => {
                log::info!("configuring FIB entry {}", name);
                self.device
                    .add(&name, bd_index, if_index, entry.bvi, entry.static_config)?;
                self.add_cache.remove(&name);
                let idx = self.next_index();
                self.reg().register(&name, idx, FibMeta::new(entry.clone()));
                self.publish(
                    &name,
                    Some(FibState {
                        phys_address: name.clone(),
                        bd_index,
                        if_index,
                        bvi: entry.bvi,
                        static_config: entry.static_config,
                    }),
                );
                Ok(())
            }
        }
    }

    /// Returns whether the removal is confirmed (device-level or nothing
    /// to remove) as opposed to parked in the delete-cache.
    fn do_delete(&mut self, entry: &FibEntry) -> Result<bool, FibError> {
        let name = &entry.phys_address;

        if self.add_cache.remove(name).is_some() {
            log::debug!("FIB entry {} dropped from add-cache", name);
            return Ok(true);
        }

        let found = self.reg().lookup_by_name(name);
        let Some((_, meta)) = found else {
            log::debug!("FIB entry {} not registered, nothing to delete", name);
            return Ok(true);
        };

        match self.resolve_deps(&meta.entry) {
            Ok((bd_index, if_index)) => {
                log::info!("deleting FIB entry {}", name);
                self.device.del(name, bd_index, if_index)?;
                self.reg().unregister(name);
                self.publish(name, None);
                Ok(true)
            }
            Err(missing) => {
                // the prerequisite vanished first; the device drops the
                // entry with it, keep it parked until that is observed
                log::debug!(
                    "FIB entry {} delete waiting on {} prerequisites, cached",
                    name,
                    missing.len()
                );
                self.reg().unregister(name);
                self.del_cache.insert(name.clone(), meta.entry, missing);
                Ok(false)
            }
        }
    }

    fn resolve_added(&mut self, dep: Dependency) {
        // pending deletes first, freeing device slots before re-adds
        for name in self.del_cache.satisfy(&dep) {
            let Some(entry) = self.del_cache.get(&name).map(|e| e.value.clone()) else {
                continue;
            };
            match self.resolve_deps(&entry) {
                Ok((bd_index, if_index)) => match self.device.del(&name, bd_index, if_index) {
                    Ok(()) => {
                        self.del_cache.remove(&name);
                        self.errors.purge(&name);
                        self.publish(&name, None);
                    }
                    Err(err) => {
                        log::error!("deferred delete of FIB entry {} failed: {}", name, err);
                        self.errors.record(&name, OpKind::Delete, err.to_string());
                    }
                },
                Err(missing) => self.del_cache.insert(name, entry, missing),
            }
        }

        for name in self.add_cache.satisfy(&dep) {
            let Some(entry) = self.add_cache.get(&name).map(|e| e.value.clone()) else {
                continue;
            };
            match self.resolve_deps(&entry) {
                Ok((bd_index, if_index)) => {
                    match self
                        .device
                        .add(&name, bd_index, if_index, entry.bvi, entry.static_config)
                    {
                        Ok(()) => {
                            log::info!("configuring previously cached FIB entry {}", name);
                            self.add_cache.remove(&name);
                            let idx = self.next_index();
                            self.reg().register(&name, idx, FibMeta::new(entry.clone()));
                            self.publish(
                                &name,
                                Some(FibState {
                                    phys_address: name.clone(),
                                    bd_index,
                                    if_index,
                                    bvi: entry.bvi,
                                    static_config: entry.static_config,
                                }),
                            );
                        }
                        Err(err) => {
                            log::error!("deferred add of FIB entry {} failed: {}", name, err);
                            self.errors.record(&name, OpKind::Create, err.to_string());
                        }
                    }
                }
                Err(missing) => self.add_cache.insert(name, entry, missing),
            }
        }
    }

    fn resolve_removed(&mut self, field: &'static str, depname: &str) {
        // realized entries referencing the vanished prerequisite: the
        // device dropped them with it, move them back to the add-cache
        // instead of leaving a stale index behind
        let affected = self.reg().lookup_by_secondary(field, depname);
        for name in affected {
            let Some((_, meta)) = self.reg().lookup_by_name(&name) else {
                continue;
            };
            log::debug!(
                "FIB entry {} lost prerequisite {}, moving back to add-cache",
                name,
                depname
            );
            self.reg().unregister(&name);
            let missing = self.missing_deps(&meta.entry);
            self.add_cache.insert(name.clone(), meta.entry, missing);
            self.publish(&name, None);
        }

        // parked entries whose constraint sets predate the removal re-arm
        for cache_is_add in [true, false] {
            let names = if cache_is_add {
                self.add_cache.names()
            } else {
                self.del_cache.names()
            };
            for name in names {
                let entry = if cache_is_add {
                    self.add_cache.get(&name).map(|e| e.value.clone())
                } else {
                    self.del_cache.get(&name).map(|e| e.value.clone())
                };
                let Some(entry) = entry else { continue };
                let refers = match field {
                    FIB_INTERFACE_KEY => entry.outgoing_interface == depname,
                    _ => entry.bridge_domain == depname,
                };
                if !refers {
                    continue;
                }
                let missing = self.missing_deps(&entry);
                if cache_is_add {
                    self.add_cache.insert(name, entry, missing);
                } else {
                    self.del_cache.insert(name, entry, missing);
                }
            }
        }
    }

    fn validate(&self, entry: &FibEntry) -> Result<(), FibError> {
        if entry.phys_address.is_empty() {
            return Err(FibError::MissingMac);
        }
        if entry.bridge_domain.is_empty() {
            return Err(FibError::MissingBridgeDomain(entry.phys_address.clone()));
        }
        if entry.outgoing_interface.is_empty() {
            return Err(FibError::MissingInterface(entry.phys_address.clone()));
        }
        Ok(())
    }

    /// Resolves both prerequisites, or reports which are missing.
    fn resolve_deps(&self, entry: &FibEntry) -> Result<(DeviceIndex, DeviceIndex), Vec<Dependency>> {
        let bd = self
            .bridges
            .lock()
            .expect("bridge registry poisoned")
            .lookup_by_name(&entry.bridge_domain)
            .map(|(idx, _)| idx);
        let iface = self
            .interfaces
            .lock()
            .expect("interface registry poisoned")
            .lookup_by_name(&entry.outgoing_interface)
            .map(|(idx, _)| idx);

        match (bd, iface) {
            (Some(bd_index), Some(if_index)) => Ok((bd_index, if_index)),
            _ => {
                let mut missing = Vec::new();
                if bd.is_none() {
                    missing.push(Dependency::new(BRIDGE_REGISTRY, entry.bridge_domain.as_str()));
                }
                if iface.is_none() {
                    missing.push(Dependency::new(
                        INTERFACE_REGISTRY,
                        entry.outgoing_interface.as_str(),
                    ));
                }
                Err(missing)
            }
        }
    }

    fn missing_deps(&self, entry: &FibEntry) -> Vec<Dependency> {
        match self.resolve_deps(entry) {
            Ok(_) => Vec::new(),
            Err(missing) => missing,
        }
    }

    fn lookup_bridge_name(&self, index: DeviceIndex) -> Option<String> {
        self.bridges
            .lock()
            .expect("bridge registry poisoned")
            .lookup_by_index(index)
            .map(|(name, _)| name)
    }

    fn lookup_interface_name(&self, index: DeviceIndex) -> Option<String> {
        self.interfaces
            .lock()
            .expect("interface registry poisoned")
            .lookup_by_index(index)
            .map(|(name, _)| name)
    }

    fn next_index(&mut self) -> u32 {
        let idx = self.index_seq;
        self.index_seq += 1;
        idx
    }

    fn publish(&self, name: &str, state: Option<FibState>) {
        self.status.send(StatusEvent::Fib {
            name: name.to_string(),
            state,
        });
    }

    fn reg(&self) -> MutexGuard<'_, IndexedRegistry<FibMeta>> {
        self.registry.lock().expect("fib registry poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeDomainConfigurator;
    use crate::iface::InterfaceConfigurator;
    use crate::status;
    use dpagent_device::api::{BridgeDomainConfig, InterfaceConfig, InterfaceKind};
    use dpagent_device::MockDevice;

    struct Fixture {
        ifaces: InterfaceConfigurator,
        bridges: BridgeDomainConfigurator,
        fibs: FibConfigurator,
        device: MockDevice,
    }

    fn setup() -> Fixture {
        let device = MockDevice::new();
        let (tx, _rx) = status::status_channel(256);
        let ifaces = InterfaceConfigurator::new(Box::new(device.session()), tx.clone()).unwrap();
        let bridges =
            BridgeDomainConfigurator::new(Box::new(device.session()), ifaces.registry(), tx.clone())
                .unwrap();
        let fibs = FibConfigurator::new(
            Box::new(device.session()),
            ifaces.registry(),
            bridges.registry(),
            tx,
        )
        .unwrap();
        Fixture {
            ifaces,
            bridges,
            fibs,
            device,
        }
    }

    fn eth(name: &str) -> InterfaceConfig {
        InterfaceConfig::new(name, InterfaceKind::Ethernet)
    }

    const MAC: &str = "aa:bb:cc:dd:ee:01";

    #[test]
    fn test_configure_with_resolved_dependencies() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("if1")).unwrap();
        fx.bridges.configure(&BridgeDomainConfig::new("bd1")).unwrap();

        fx.fibs.configure(&FibEntry::new(MAC, "bd1", "if1")).unwrap();

        assert_eq!(fx.device.fib_count(), 1);
        assert!(fx.fibs.registry().lock().unwrap().contains(MAC));
        assert!(!fx.fibs.is_pending_add(MAC));
    }

    #[test]
    fn test_two_missing_dependencies_resolve_in_turn() {
        // the scenario from the reconciliation contract: neither the
        // bridge domain nor the interface exists yet
        let mut fx = setup();
        let entry = FibEntry::new(MAC, "bd1", "if1");
        fx.fibs.configure(&entry).unwrap();
        assert!(fx.fibs.is_pending_add(MAC));
        assert_eq!(fx.device.fib_count(), 0);

        fx.bridges.configure(&BridgeDomainConfig::new("bd1")).unwrap();
        fx.fibs.resolve_bridge_added("bd1");
        // interface still missing
        assert!(fx.fibs.is_pending_add(MAC));
        assert_eq!(fx.device.fib_count(), 0);

        fx.ifaces.configure(&eth("if1")).unwrap();
        fx.fibs.resolve_interface_added("if1");
        assert!(!fx.fibs.is_pending_add(MAC));
        assert_eq!(fx.device.fib_count(), 1);
        assert!(fx.fibs.registry().lock().unwrap().contains(MAC));
    }

    #[test]
    fn test_cache_and_registry_are_mutually_exclusive() {
        let mut fx = setup();
        let entry = FibEntry::new(MAC, "bd1", "if1");
        fx.fibs.configure(&entry).unwrap();
        assert!(fx.fibs.is_pending_add(MAC));
        assert!(!fx.fibs.registry().lock().unwrap().contains(MAC));

        fx.ifaces.configure(&eth("if1")).unwrap();
        fx.bridges.configure(&BridgeDomainConfig::new("bd1")).unwrap();
        fx.fibs.resolve_interface_added("if1");
        fx.fibs.resolve_bridge_added("bd1");

        assert!(fx.fibs.registry().lock().unwrap().contains(MAC));
        assert!(!fx.fibs.is_pending_add(MAC));
        assert!(!fx.fibs.is_pending_delete(MAC));
    }

    #[test]
    fn test_repeated_dependency_event_realizes_once() {
        let mut fx = setup();
        fx.bridges.configure(&BridgeDomainConfig::new("bd1")).unwrap();
        fx.fibs.configure(&FibEntry::new(MAC, "bd1", "if1")).unwrap();

        fx.ifaces.configure(&eth("if1")).unwrap();
        fx.fibs.resolve_interface_added("if1");
        assert_eq!(fx.device.call_count("fib.add"), 1);

        // the same notification fired again must not re-install
        fx.fibs.resolve_interface_added("if1");
        assert_eq!(fx.device.call_count("fib.add"), 1);
    }

    #[test]
    fn test_delete_cancels_parked_creation() {
        let mut fx = setup();
        let entry = FibEntry::new(MAC, "bd1", "if1");
        fx.fibs.configure(&entry).unwrap();
        assert!(fx.fibs.is_pending_add(MAC));

        fx.fibs.delete(&entry).unwrap();
        assert!(!fx.fibs.is_pending_add(MAC));
        assert_eq!(fx.device.call_count("fib.del"), 0);
    }

    #[test]
    fn test_delete_parks_when_prerequisite_vanished() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("if1")).unwrap();
        fx.bridges.configure(&BridgeDomainConfig::new("bd1")).unwrap();
        let entry = FibEntry::new(MAC, "bd1", "if1");
        fx.fibs.configure(&entry).unwrap();

        // interface disappears before the FIB delete arrives
        fx.ifaces.configure(&eth("other")).unwrap();
        fx.ifaces.delete(&eth("if1")).unwrap();

        fx.fibs.delete(&entry).unwrap();
        assert!(fx.fibs.is_pending_delete(MAC));
        assert!(!fx.fibs.registry().lock().unwrap().contains(MAC));

        // prerequisite returns, the parked delete completes
        fx.ifaces.configure(&eth("if1")).unwrap();
        fx.fibs.resolve_interface_added("if1");
        assert!(!fx.fibs.is_pending_delete(MAC));
        assert_eq!(fx.device.fib_count(), 0);
    }

    #[test]
    fn test_prerequisite_removal_moves_entry_back_to_cache() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("if1")).unwrap();
        fx.bridges.configure(&BridgeDomainConfig::new("bd1")).unwrap();
        fx.fibs.configure(&FibEntry::new(MAC, "bd1", "if1")).unwrap();

        fx.ifaces.delete(&eth("if1")).unwrap();
        fx.fibs.resolve_interface_removed("if1");

        assert!(!fx.fibs.registry().lock().unwrap().contains(MAC));
        assert!(fx.fibs.is_pending_add(MAC));

        // and it comes back once the interface does
        fx.ifaces.configure(&eth("if1")).unwrap();
        fx.fibs.resolve_interface_added("if1");
        assert!(fx.fibs.registry().lock().unwrap().contains(MAC));
        assert_eq!(fx.device.fib_count(), 1);
    }

    #[test]
    fn test_validation_rejects_incomplete_entries() {
        let mut fx = setup();
        assert!(matches!(
            fx.fibs.configure(&FibEntry::new("", "bd1", "if1")),
            Err(FibError::MissingMac)
        ));
        assert!(matches!(
            fx.fibs.configure(&FibEntry::new(MAC, "", "if1")),
            Err(FibError::MissingBridgeDomain(_))
        ));
        assert!(matches!(
            fx.fibs.configure(&FibEntry::new(MAC, "bd1", "")),
            Err(FibError::MissingInterface(_))
        ));
        assert_eq!(fx.fibs.error_log().total(), 3);
    }

    #[test]
    fn test_resync_converged_makes_no_device_mutations() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("if1")).unwrap();
        fx.bridges.configure(&BridgeDomainConfig::new("bd1")).unwrap();
        let entry = FibEntry::new(MAC, "bd1", "if1");
        fx.fibs.configure(&entry).unwrap();
        fx.device.clear_calls();

        fx.fibs.resync(std::slice::from_ref(&entry)).unwrap();
        assert!(fx.device.mutations().is_empty());
    }

    #[test]
    fn test_resync_removes_obsolete_and_creates_missing() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("if1")).unwrap();
        fx.bridges.configure(&BridgeDomainConfig::new("bd1")).unwrap();
        fx.fibs
            .configure(&FibEntry::new("aa:bb:cc:dd:ee:99", "bd1", "if1"))
            .unwrap();
        fx.device.clear_calls();

        fx.fibs.resync(&[FibEntry::new(MAC, "bd1", "if1")]).unwrap();

        assert_eq!(fx.device.call_count("fib.del"), 1);
        assert_eq!(fx.device.call_count("fib.add"), 1);
        let reg = fx.fibs.registry();
        assert!(!reg.lock().unwrap().contains("aa:bb:cc:dd:ee:99"));
        assert!(reg.lock().unwrap().contains(MAC));
    }
}
