//! Cross-connect lifecycle against the device.
//!
//! A pair depends on both of its interfaces. Pairs whose interfaces are not
//! registered yet are parked in the add-cache; deletes whose interfaces
//! vanished first are parked in the delete-cache. Rewiring only the
//! transmit side of an existing pair is a single overwrite call.

use std::sync::MutexGuard;

use dpagent_common::{
    Dependency, ErrorLog, IndexedRegistry, OpKind, PendingCache, SharedRegistry,
};
use dpagent_device::api::{XConnectApi, XConnectPair, XConnectState};
use dpagent_device::{DeviceError, DeviceIndex};
use thiserror::Error;

use super::types::{XConnectMeta, XC_TRANSMIT_KEY};
use crate::iface::InterfaceMeta;
use crate::status::{StatusEvent, StatusSender};
use crate::INTERFACE_REGISTRY;

/// Error type for cross-connect operations.
#[derive(Debug, Error)]
pub enum XcError {
    /// The pair names no receive interface.
    #[error("cross-connect names no receive interface")]
    MissingRx,
    /// The pair names no transmit interface.
    #[error("cross-connect {0} names no transmit interface")]
    MissingTx(String),
    /// The device rejected a call.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Cross-connect configurator with add/delete dependency caches.
pub struct XConnectConfigurator {
    device: Box<dyn XConnectApi>,
    registry: SharedRegistry<XConnectMeta>,
    add_cache: PendingCache<XConnectPair>,
    del_cache: PendingCache<XConnectPair>,
    interfaces: SharedRegistry<InterfaceMeta>,
    index_seq: u32,
    errors: ErrorLog,
    status: StatusSender,
}

impl XConnectConfigurator {
    /// Creates the configurator, verifying device compatibility first.
    pub fn new(
        mut device: Box<dyn XConnectApi>,
        interfaces: SharedRegistry<InterfaceMeta>,
        status: StatusSender,
    ) -> Result<Self, XcError> {
        device.check_compatibility()?;
        Ok(Self {
            device,
            registry: IndexedRegistry::new_shared("xconnects"),
            add_cache: PendingCache::new("xconnect-add-cache"),
            del_cache: PendingCache::new("xconnect-del-cache"),
            interfaces,
            index_seq: 0,
            errors: ErrorLog::new("xconnects"),
            status,
        })
    }

    /// Replaces the error log (capacity tuning at construction time).
    pub fn with_error_log(mut self, errors: ErrorLog) -> Self {
        self.errors = errors;
        self
    }

    /// Shared handle to the cross-connect registry.
    pub fn registry(&self) -> SharedRegistry<XConnectMeta> {
        SharedRegistry::clone(&self.registry)
    }

    /// The cross-connect error log.
    pub fn error_log(&self) -> &ErrorLog {
        &self.errors
    }

    /// True if the receive interface is parked in the add-cache.
    pub fn is_pending_add(&self, rx: &str) -> bool {
        self.add_cache.contains(rx)
    }

    /// True if the receive interface is parked in the delete-cache.
    pub fn is_pending_delete(&self, rx: &str) -> bool {
        self.del_cache.contains(rx)
    }

    /// Connects the pair, or parks it when an interface is missing.
    pub fn configure(&mut self, pair: &XConnectPair) -> Result<(), XcError> {
        let result = self.do_configure(pair);
        if let Err(err) = &result {
            self.errors
                .record(&pair.receive_interface, OpKind::Create, err.to_string());
        }
        result
    }

    /// Applies the difference between `old` and `new`.
    pub fn modify(&mut self, old: &XConnectPair, new: &XConnectPair) -> Result<(), XcError> {
        let result = self.do_modify(old, new);
        if let Err(err) = &result {
            self.errors
                .record(&new.receive_interface, OpKind::Modify, err.to_string());
        }
        result
    }

    /// Removes the pair: cancels a parked creation, unsets it on the
    /// device, or parks the delete until the device drop is confirmed.
    pub fn delete(&mut self, pair: &XConnectPair) -> Result<(), XcError> {
        match self.do_delete(pair) {
            Ok(confirmed) => {
                if confirmed {
                    self.errors.purge(&pair.receive_interface);
                }
                Ok(())
            }
            Err(err) => {
                self.errors
                    .record(&pair.receive_interface, OpKind::Delete, err.to_string());
                Err(err)
            }
        }
    }

    /// Re-validates parked pairs after an interface registered.
    pub fn resolve_interface_added(&mut self, ifname: &str) {
        let dep = Dependency::new(INTERFACE_REGISTRY, ifname);

        for name in self.del_cache.satisfy(&dep) {
            let Some(pair) = self.del_cache.get(&name).map(|e| e.value.clone()) else {
                continue;
            };
            match self.resolve_deps(&pair) {
                Ok((rx_index, tx_index)) => match self.device.unset(rx_index, tx_index) {
                    Ok(()) => {
                        self.del_cache.remove(&name);
                        self.errors.purge(&name);
                        self.publish(&name, None);
                    }
                    Err(err) => {
                        log::error!("deferred unset of cross-connect {} failed: {}", name, err);
                        self.errors.record(&name, OpKind::Delete, err.to_string());
                    }
                },
                Err(missing) => self.del_cache.insert(name, pair, missing),
            }
        }

        for name in self.add_cache.satisfy(&dep) {
            let Some(pair) = self.add_cache.get(&name).map(|e| e.value.clone()) else {
                continue;
            };
            match self.resolve_deps(&pair) {
                Ok((rx_index, tx_index)) => match self.device.set(rx_index, tx_index) {
                    Ok(()) => {
                        log::info!("configuring previously cached cross-connect {}", name);
                        self.add_cache.remove(&name);
                        let idx = self.next_index();
                        self.reg().register(&name, idx, XConnectMeta::new(pair));
                        self.publish(
                            &name,
                            Some(XConnectState {
                                rx_if_index: rx_index,
                                tx_if_index: tx_index,
                            }),
                        );
                    }
                    Err(err) => {
                        log::error!("deferred set of cross-connect {} failed: {}", name, err);
                        self.errors.record(&name, OpKind::Create, err.to_string());
                    }
                },
                Err(missing) => self.add_cache.insert(name, pair, missing),
            }
        }
    }

    /// Moves realized pairs that used the vanished interface back into the
    /// add-cache and re-arms parked ones.
    pub fn resolve_interface_removed(&mut self, ifname: &str) {
        let mut affected = self.reg().lookup_by_secondary(XC_TRANSMIT_KEY, ifname);
        if self.reg().contains(ifname) {
            affected.push(ifname.to_string());
        }
        for name in affected {
            let Some((_, meta)) = self.reg().lookup_by_name(&name) else {
                continue;
            };
            log::debug!(
                "cross-connect {} lost interface {}, moving back to add-cache",
                name,
                ifname
            );
            self.reg().unregister(&name);
            let missing = self.missing_deps(&meta.pair);
            self.add_cache.insert(name.clone(), meta.pair, missing);
            self.publish(&name, None);
        }

        for name in self.add_cache.names() {
            let Some(pair) = self.add_cache.get(&name).map(|e| e.value.clone()) else {
                continue;
            };
            if pair.receive_interface != ifname && pair.transmit_interface != ifname {
                continue;
            }
            let missing = self.missing_deps(&pair);
            self.add_cache.insert(name, pair, missing);
        }
        for name in self.del_cache.names() {
            let Some(pair) = self.del_cache.get(&name).map(|e| e.value.clone()) else {
                continue;
            };
            if pair.receive_interface != ifname && pair.transmit_interface != ifname {
                continue;
            }
            let missing = self.missing_deps(&pair);
            self.del_cache.insert(name, pair, missing);
        }
    }

    /// Reconciles the full desired cross-connect set against a device
    /// dump. Interface resync must have run first.
    pub fn resync(&mut self, desired: &[XConnectPair]) -> Result<(), XcError> {
        log::info!("resyncing {} desired cross-connects", desired.len());
        self.add_cache.clear();
        self.del_cache.clear();

        let mut first_err: Option<XcError> = None;
        let dumped = self.device.dump()?;

        for state in &dumped {
            let rx_name = self.lookup_interface_name(state.rx_if_index);
            let tx_name = self.lookup_interface_name(state.tx_if_index);
            let wanted = rx_name
                .as_deref()
                .and_then(|rx| desired.iter().find(|p| p.receive_interface == rx));
            match wanted {
                None => {
                    log::debug!("cross-connect rx if{} is obsolete, unsetting", state.rx_if_index);
                    if let Err(err) = self.device.unset(state.rx_if_index, state.tx_if_index) {
                        log::error!("resync: unset failed: {}", err);
                        first_err.get_or_insert(err.into());
                        continue;
                    }
                    if let Some(rx) = rx_name {
                        self.reg().unregister(&rx);
                        self.publish(&rx, None);
                    }
                }
                Some(pair) if tx_name.as_deref() == Some(pair.transmit_interface.as_str()) => {
                    if !self.reg().contains(&pair.receive_interface) {
                        let idx = self.next_index();
                        self.reg().register(
                            &pair.receive_interface,
                            idx,
                            XConnectMeta::new(pair.clone()),
                        );
                    }
                    self.publish(&pair.receive_interface, Some(state.clone()));
                }
                Some(pair) => {
                    log::debug!(
                        "cross-connect {} transmit side drifted, rewiring",
                        pair.receive_interface
                    );
                    match self.resolve_deps(pair) {
                        Ok((rx_index, tx_index)) => {
                            if let Err(err) = self.device.set(rx_index, tx_index) {
                                self.errors.record(
                                    &pair.receive_interface,
                                    OpKind::Modify,
                                    err.to_string(),
                                );
                                first_err.get_or_insert(err.into());
                                continue;
                            }
                            let idx = self.next_index();
                            self.reg().register(
                                &pair.receive_interface,
                                idx,
                                XConnectMeta::new(pair.clone()),
                            );
                            self.publish(
                                &pair.receive_interface,
                                Some(XConnectState {
                                    rx_if_index: rx_index,
                                    tx_if_index: tx_index,
                                }),
                            );
                        }
                        Err(missing) => {
                            self.add_cache
                                .insert(pair.receive_interface.clone(), pair.clone(), missing);
                        }
                    }
                }
            }
        }

        for pair in desired {
            let dumped_has = dumped.iter().any(|s| {
                self.lookup_interface_name(s.rx_if_index).as_deref()
                    == Some(pair.receive_interface.as_str())
            });
            if !dumped_has {
                if let Err(err) = self.configure(pair) {
                    first_err.get_or_insert(err);
                }
            }
        }

        let registered = self.reg().names();
        for name in registered {
            let desired_has = desired.iter().any(|p| p.receive_interface == name);
            if !desired_has {
                self.reg().unregister(&name);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn do_configure(&mut self, pair: &XConnectPair) -> Result<(), XcError> {
        self.validate(pair)?;
        let name = pair.receive_interface.clone();

        self.del_cache.remove(&name);

        match self.resolve_deps(pair) {
            Err(missing) => {
                log::debug!(
                    "cross-connect {} waiting on {} prerequisites, cached",
                    name,
                    missing.len()
                );
                self.reg().unregister(&name);
                self.add_cache.insert(name, pair.clone(), missing);
                Ok(())
            }
            Ok((rx_index, tx_index)) => {
                log::info!("configuring cross-connect {} -> {}", name, pair.transmit_interface);
                self.device.set(rx_index, tx_index)?;
                self.add_cache.remove(&name);
                let idx = self.next_index();
                self.reg().register(&name, idx, XConnectMeta::new(pair.clone()));
                self.publish(
                    &name,
                    Some(XConnectState {
                        rx_if_index: rx_index,
                        tx_if_index: tx_index,
                    }),
                );
                Ok(())
            }
        }
    }

    fn do_modify(&mut self, old: &XConnectPair, new: &XConnectPair) -> Result<(), XcError> {
        self.validate(new)?;

        if old.receive_interface == new.receive_interface {
            let found = self.reg().lookup_by_name(&new.receive_interface);
            if let Some((idx, _)) = found {
                if let Ok((rx_index, tx_index)) = self.resolve_deps(new) {
                    // same receive side: rewiring transmit is one overwrite
                    self.device.set(rx_index, tx_index)?;
                    self.reg().register(
                        &new.receive_interface,
                        idx,
                        XConnectMeta::new(new.clone()),
                    );
                    self.publish(
                        &new.receive_interface,
                        Some(XConnectState {
                            rx_if_index: rx_index,
                            tx_if_index: tx_index,
                        }),
                    );
                    return Ok(());
                }
            }
        }

        let deleted = self.do_delete(old).map(|_| ());
        let configured = self.do_configure(new);
        match (deleted, configured) {
            (Err(err), _) => Err(err),
            (Ok(()), result) => result,
        }
    }

    fn do_delete(&mut self, pair: &XConnectPair) -> Result<bool, XcError> {
        let name = &pair.receive_interface;

        if self.add_cache.remove(name).is_some() {
            log::debug!("cross-connect {} dropped from add-cache", name);
            return Ok(true);
        }

        let found = self.reg().lookup_by_name(name);
        let Some((_, meta)) = found else {
            log::debug!("cross-connect {} not registered, nothing to delete", name);
            return Ok(true);
        };

        match self.resolve_deps(&meta.pair) {
            Ok((rx_index, tx_index)) => {
                log::info!("deleting cross-connect {}", name);
                self.device.unset(rx_index, tx_index)?;
                self.reg().unregister(name);
                self.publish(name, None);
                Ok(true)
            }
            Err(missing) => {
                log::debug!(
                    "cross-connect {} delete waiting on {} prerequisites, cached",
                    name,
                    missing.len()
                );
                self.reg().unregister(name);
                self.del_cache.insert(name.clone(), meta.pair, missing);
                Ok(false)
            }
        }
    }

    fn validate(&self, pair: &XConnectPair) -> Result<(), XcError> {
        if pair.receive_interface.is_empty() {
            return Err(XcError::MissingRx);
        }
        if pair.transmit_interface.is_empty() {
            return Err(XcError::MissingTx(pair.receive_interface.clone()));
        }
        Ok(())
    }

    fn resolve_deps(&self, pair: &XConnectPair) -> Result<(DeviceIndex, DeviceIndex), Vec<Dependency>> {
        let ifaces = self.interfaces.lock().expect("interface registry poisoned");
        let rx = ifaces
            .lookup_by_name(&pair.receive_interface)
            .map(|(idx, _)| idx);
        let tx = ifaces
            .lookup_by_name(&pair.transmit_interface)
            .map(|(idx, _)| idx);
        drop(ifaces);

        match (rx, tx) {
            (Some(rx_index), Some(tx_index)) => Ok((rx_index, tx_index)),
            _ => {
                let mut missing = Vec::new();
                if rx.is_none() {
                    missing.push(Dependency::new(
                        INTERFACE_REGISTRY,
                        pair.receive_interface.as_str(),
                    ));
                }
                if tx.is_none() {
                    missing.push(Dependency::new(
                        INTERFACE_REGISTRY,
                        pair.transmit_interface.as_str(),
                    ));
                }
                Err(missing)
            }
        }
    }

    fn missing_deps(&self, pair: &XConnectPair) -> Vec<Dependency> {
        match self.resolve_deps(pair) {
            Ok(_) => Vec::new(),
            Err(missing) => missing,
        }
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

    fn publish(&self, name: &str, state: Option<XConnectState>) {
        self.status.send(StatusEvent::XConnect {
            name: name.to_string(),
            state,
        });
    }

    fn reg(&self) -> MutexGuard<'_, IndexedRegistry<XConnectMeta>> {
        self.registry.lock().expect("xconnect registry poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::InterfaceConfigurator;
    use crate::status;
    use dpagent_device::api::{InterfaceConfig, InterfaceKind};
    use dpagent_device::MockDevice;

    struct Fixture {
        ifaces: InterfaceConfigurator,
        xconnects: XConnectConfigurator,
        device: MockDevice,
    }

    fn setup() -> Fixture {
        let device = MockDevice::new();
        let (tx, _rx) = status::status_channel(256);
        let ifaces = InterfaceConfigurator::new(Box::new(device.session()), tx.clone()).unwrap();
        let xconnects =
            XConnectConfigurator::new(Box::new(device.session()), ifaces.registry(), tx).unwrap();
        Fixture {
            ifaces,
            xconnects,
            device,
        }
    }

    fn eth(name: &str) -> InterfaceConfig {
        InterfaceConfig::new(name, InterfaceKind::Ethernet)
    }

    #[test]
    fn test_configure_with_both_interfaces_present() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("rx0")).unwrap();
        fx.ifaces.configure(&eth("tx0")).unwrap();

        fx.xconnects
            .configure(&XConnectPair::new("rx0", "tx0"))
            .unwrap();

        assert_eq!(fx.device.call_count("xconnect.set"), 1);
        assert!(fx.xconnects.registry().lock().unwrap().contains("rx0"));
    }

    #[test]
    fn test_configure_parks_until_both_interfaces_exist() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("rx0")).unwrap();

        let pair = XConnectPair::new("rx0", "tx0");
        fx.xconnects.configure(&pair).unwrap();
        assert!(fx.xconnects.is_pending_add("rx0"));
        assert_eq!(fx.device.call_count("xconnect.set"), 0);

        fx.ifaces.configure(&eth("tx0")).unwrap();
        fx.xconnects.resolve_interface_added("tx0");

        assert!(!fx.xconnects.is_pending_add("rx0"));
        assert_eq!(fx.device.call_count("xconnect.set"), 1);
    }

    #[test]
    fn test_modify_rewires_transmit_in_place() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("rx0")).unwrap();
        fx.ifaces.configure(&eth("tx0")).unwrap();
        fx.ifaces.configure(&eth("tx1")).unwrap();

        let old = XConnectPair::new("rx0", "tx0");
        fx.xconnects.configure(&old).unwrap();

        let new = XConnectPair::new("rx0", "tx1");
        fx.xconnects.modify(&old, &new).unwrap();

        // overwrite, no unset in between
        assert_eq!(fx.device.call_count("xconnect.unset"), 0);
        assert_eq!(fx.device.call_count("xconnect.set"), 2);
        let reg = fx.xconnects.registry();
        let (_, meta) = reg.lock().unwrap().lookup_by_name("rx0").unwrap();
        assert_eq!(meta.pair.transmit_interface, "tx1");
    }

    #[test]
    fn test_delete_parks_when_interface_vanished() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("rx0")).unwrap();
        fx.ifaces.configure(&eth("tx0")).unwrap();
        let pair = XConnectPair::new("rx0", "tx0");
        fx.xconnects.configure(&pair).unwrap();

        fx.ifaces.delete(&eth("tx0")).unwrap();
        fx.xconnects.delete(&pair).unwrap();
        assert!(fx.xconnects.is_pending_delete("rx0"));

        fx.ifaces.configure(&eth("tx0")).unwrap();
        fx.xconnects.resolve_interface_added("tx0");
        assert!(!fx.xconnects.is_pending_delete("rx0"));
    }

    #[test]
    fn test_interface_removal_moves_pair_back_to_cache() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("rx0")).unwrap();
        fx.ifaces.configure(&eth("tx0")).unwrap();
        let pair = XConnectPair::new("rx0", "tx0");
        fx.xconnects.configure(&pair).unwrap();

        fx.ifaces.delete(&eth("tx0")).unwrap();
        fx.xconnects.resolve_interface_removed("tx0");

        assert!(!fx.xconnects.registry().lock().unwrap().contains("rx0"));
        assert!(fx.xconnects.is_pending_add("rx0"));
    }

    #[test]
    fn test_resync_converged_makes_no_device_mutations() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("rx0")).unwrap();
        fx.ifaces.configure(&eth("tx0")).unwrap();
        let pair = XConnectPair::new("rx0", "tx0");
        fx.xconnects.configure(&pair).unwrap();
        fx.device.clear_calls();

        fx.xconnects.resync(std::slice::from_ref(&pair)).unwrap();
        assert!(fx.device.mutations().is_empty());
    }

    #[test]
    fn test_resync_unsets_obsolete() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("rx0")).unwrap();
        fx.ifaces.configure(&eth("tx0")).unwrap();
        fx.xconnects
            .configure(&XConnectPair::new("rx0", "tx0"))
            .unwrap();
        fx.device.clear_calls();

        fx.xconnects.resync(&[]).unwrap();
        assert_eq!(fx.device.call_count("xconnect.unset"), 1);
        assert!(!fx.xconnects.registry().lock().unwrap().contains("rx0"));
    }
}
