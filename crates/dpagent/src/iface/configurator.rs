//! Interface lifecycle against the device.
//!
//! Interfaces have no prerequisites of their own; they are the dependency
//! target everything else resolves against. The registry entry exists
//! exactly while the interface exists on the device.

use std::sync::MutexGuard;

use dpagent_common::{ErrorLog, IndexedRegistry, OpKind, SharedRegistry};
use dpagent_device::api::{InterfaceApi, InterfaceConfig, InterfaceState};
use dpagent_device::{DeviceError, DeviceIndex};
use thiserror::Error;

use super::types::InterfaceMeta;
use crate::status::{StatusEvent, StatusSender};

/// Error type for interface operations.
#[derive(Debug, Error)]
pub enum IfaceError {
    /// The desired value fails a structural precondition.
    #[error("interface name must not be empty")]
    EmptyName,
    /// The device rejected a call.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Interface configurator: drives interfaces through their lifecycle and
/// owns the interface registry every other configurator resolves against.
pub struct InterfaceConfigurator {
    device: Box<dyn InterfaceApi>,
    registry: SharedRegistry<InterfaceMeta>,
    errors: ErrorLog,
    status: StatusSender,
}

impl InterfaceConfigurator {
    /// Creates the configurator, verifying device compatibility first.
    pub fn new(mut device: Box<dyn InterfaceApi>, status: StatusSender) -> Result<Self, IfaceError> {
        device.check_compatibility()?;
        Ok(Self {
            device,
            registry: IndexedRegistry::new_shared("interfaces"),
            errors: ErrorLog::new("interfaces"),
            status,
        })
    }

    /// Replaces the error log (capacity tuning at construction time).
    pub fn with_error_log(mut self, errors: ErrorLog) -> Self {
        self.errors = errors;
        self
    }

    /// Shared handle to the interface registry.
    pub fn registry(&self) -> SharedRegistry<InterfaceMeta> {
        SharedRegistry::clone(&self.registry)
    }

    /// The interface error log.
    pub fn error_log(&self) -> &ErrorLog {
        &self.errors
    }

    /// Creates the interface on the device and registers it.
    ///
    /// Configuring an already-registered name applies the change as a
    /// modify instead.
    pub fn configure(&mut self, cfg: &InterfaceConfig) -> Result<(), IfaceError> {
        let result = self.do_configure(cfg);
        if let Err(err) = &result {
            self.errors.record(&cfg.name, OpKind::Create, err.to_string());
        }
        result
    }

    /// Applies the difference between `old` and `new`.
    ///
    /// Attribute changes apply in place; a kind change requires
    /// destroy-and-recreate.
    pub fn modify(&mut self, old: &InterfaceConfig, new: &InterfaceConfig) -> Result<(), IfaceError> {
        let result = self.do_modify(old, new);
        if let Err(err) = &result {
            self.errors.record(&new.name, OpKind::Modify, err.to_string());
        }
        result
    }

    /// Deletes the interface from the device and unregisters it; the
    /// registry notification tells dependents the interface is gone.
    pub fn delete(&mut self, cfg: &InterfaceConfig) -> Result<(), IfaceError> {
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

    /// Reconciles the full desired interface set against a device dump.
    ///
    /// Obsolete interfaces are deleted first to free device slots, drifted
    /// ones are updated or recreated, matching ones are adopted without a
    /// device call, and missing ones are created. Per-item errors
    /// accumulate; the first is returned.
    pub fn resync(&mut self, desired: &[InterfaceConfig]) -> Result<(), IfaceError> {
        log::info!("resyncing {} desired interfaces", desired.len());
        let dumped = self.device.dump()?;
        let mut first_err: Option<IfaceError> = None;

        for state in &dumped {
            match desired.iter().find(|cfg| cfg.name == state.name) {
                None => {
                    log::debug!("interface {} is obsolete, deleting", state.name);
                    if let Err(err) = self.device.delete(state.if_index) {
                        log::error!("resync: delete of {} failed: {}", state.name, err);
                        self.errors
                            .record(&state.name, OpKind::Delete, err.to_string());
                        first_err.get_or_insert(err.into());
                        continue;
                    }
                    self.reg().unregister(&state.name);
                    self.publish(&state.name, None);
                }
                Some(cfg) if state.to_config() == *cfg => {
                    // already converged, adopt the dumped index
                    self.reg()
                        .register(&cfg.name, state.if_index, InterfaceMeta::new(cfg.clone()));
                    self.publish(&cfg.name, Some(self.state_of(state.if_index, cfg)));
                }
                Some(cfg) => {
                    let result = if cfg.kind != state.kind {
                        self.recreate(state.if_index, cfg)
                    } else {
                        self.update_in_place(state.if_index, cfg)
                    };
                    if let Err(err) = result {
                        log::error!("resync: update of {} failed: {}", cfg.name, err);
                        self.errors
                            .record(&cfg.name, OpKind::Modify, err.to_string());
                        first_err.get_or_insert(err);
                    }
                }
            }
        }

        for cfg in desired {
            if !dumped.iter().any(|s| s.name == cfg.name) {
                if let Err(err) = self.configure(cfg) {
                    log::error!("resync: create of {} failed: {}", cfg.name, err);
                    first_err.get_or_insert(err);
                }
            }
        }

        // registry entries with neither a dumped nor a desired counterpart
        let registered = self.reg().names();
        for name in registered {
            let dumped_has = dumped.iter().any(|s| s.name == name);
            let desired_has = desired.iter().any(|c| c.name == name);
            if !dumped_has && !desired_has {
                self.reg().unregister(&name);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn do_configure(&mut self, cfg: &InterfaceConfig) -> Result<(), IfaceError> {
        if cfg.name.is_empty() {
            return Err(IfaceError::EmptyName);
        }
        let existing = self.reg().lookup_by_name(&cfg.name);
        if let Some((_, meta)) = existing {
            log::debug!("interface {} already registered, modifying", cfg.name);
            return self.do_modify(&meta.config, cfg);
        }

        log::info!("configuring interface {}", cfg.name);
        let idx = self.device.create(cfg)?;
        self.reg().register(&cfg.name, idx, InterfaceMeta::new(cfg.clone()));
        self.publish(&cfg.name, Some(self.state_of(idx, cfg)));
        Ok(())
    }

    fn do_modify(&mut self, old: &InterfaceConfig, new: &InterfaceConfig) -> Result<(), IfaceError> {
        let found = self.reg().lookup_by_name(&old.name);
        let Some((idx, _)) = found else {
            // inconsistent state, recover by creating from scratch
            log::warn!(
                "interface {} modify without registered old state, creating as new",
                new.name
            );
            return self.do_configure(new);
        };

        if old.kind != new.kind {
            log::debug!("interface {} kind changed, recreating", new.name);
            self.do_delete(old)?;
            return self.do_configure(new);
        }

        self.update_in_place(idx, new)
    }

    fn do_delete(&mut self, cfg: &InterfaceConfig) -> Result<(), IfaceError> {
        let found = self.reg().lookup_by_name(&cfg.name);
        let Some((idx, _)) = found else {
            log::debug!("interface {} not registered, nothing to delete", cfg.name);
            return Ok(());
        };

        log::info!("deleting interface {}", cfg.name);
        self.device.delete(idx)?;
        self.reg().unregister(&cfg.name);
        self.publish(&cfg.name, None);
        Ok(())
    }

    fn update_in_place(&mut self, idx: DeviceIndex, cfg: &InterfaceConfig) -> Result<(), IfaceError> {
        self.device.update(idx, cfg)?;
        self.reg().register(&cfg.name, idx, InterfaceMeta::new(cfg.clone()));
        self.publish(&cfg.name, Some(self.state_of(idx, cfg)));
        Ok(())
    }

    fn recreate(&mut self, old_idx: DeviceIndex, cfg: &InterfaceConfig) -> Result<(), IfaceError> {
        self.device.delete(old_idx)?;
        self.reg().unregister(&cfg.name);
        let idx = self.device.create(cfg)?;
        self.reg().register(&cfg.name, idx, InterfaceMeta::new(cfg.clone()));
        self.publish(&cfg.name, Some(self.state_of(idx, cfg)));
        Ok(())
    }

    fn state_of(&self, if_index: DeviceIndex, cfg: &InterfaceConfig) -> InterfaceState {
        InterfaceState {
            name: cfg.name.clone(),
            if_index,
            kind: cfg.kind,
            enabled: cfg.enabled,
            mtu: cfg.mtu,
            phys_address: cfg.phys_address.clone(),
            ip_addresses: cfg.ip_addresses.clone(),
        }
    }

    fn publish(&self, name: &str, state: Option<InterfaceState>) {
        self.status.send(StatusEvent::Interface {
            name: name.to_string(),
            state,
        });
    }

    fn reg(&self) -> MutexGuard<'_, IndexedRegistry<InterfaceMeta>> {
        self.registry.lock().expect("interface registry poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status;
    use dpagent_device::api::InterfaceKind;
    use dpagent_device::MockDevice;

    fn setup() -> (InterfaceConfigurator, MockDevice, crate::status::StatusReceiver) {
        let device = MockDevice::new();
        let (tx, rx) = status::status_channel(64);
        let cfgr = InterfaceConfigurator::new(Box::new(device.session()), tx).unwrap();
        (cfgr, device, rx)
    }

    fn eth(name: &str) -> InterfaceConfig {
        InterfaceConfig::new(name, InterfaceKind::Ethernet)
    }

    #[test]
    fn test_configure_registers_with_device_index() {
        let (mut cfgr, device, rx) = setup();
        cfgr.configure(&eth("eth0")).unwrap();

        let idx = device.interface_index("eth0").unwrap();
        let reg = cfgr.registry();
        let (reg_idx, meta) = reg.lock().unwrap().lookup_by_name("eth0").unwrap();
        assert_eq!(reg_idx, idx);
        assert_eq!(meta.config.name, "eth0");

        let ev = rx.try_recv().unwrap();
        assert!(!ev.is_removal());
        assert_eq!(ev.name(), "eth0");
    }

    #[test]
    fn test_modify_in_place_keeps_index() {
        let (mut cfgr, device, _rx) = setup();
        let old = eth("eth0");
        cfgr.configure(&old).unwrap();
        let idx = device.interface_index("eth0").unwrap();

        let new = eth("eth0").with_mtu(9000);
        cfgr.modify(&old, &new).unwrap();

        assert_eq!(device.interface_index("eth0"), Some(idx));
        assert_eq!(device.call_count("iface.update"), 1);
        assert_eq!(device.call_count("iface.create"), 1);
    }

    #[test]
    fn test_modify_kind_recreates() {
        let (mut cfgr, device, _rx) = setup();
        let old = eth("if0");
        cfgr.configure(&old).unwrap();

        let new = InterfaceConfig::new("if0", InterfaceKind::Loopback);
        cfgr.modify(&old, &new).unwrap();

        assert_eq!(device.call_count("iface.create"), 2);
        assert_eq!(device.call_count("iface.delete"), 1);
        let reg = cfgr.registry();
        let (_, meta) = reg.lock().unwrap().lookup_by_name("if0").unwrap();
        assert_eq!(meta.config.kind, InterfaceKind::Loopback);
    }

    #[test]
    fn test_delete_unregisters_and_purges_errors() {
        let (mut cfgr, device, rx) = setup();
        cfgr.configure(&eth("eth0")).unwrap();

        device.fail_next("iface.update", dpagent_device::DeviceStatus::Failure);
        let old = eth("eth0");
        let new = eth("eth0").with_mtu(9000);
        assert!(cfgr.modify(&old, &new).is_err());
        assert_eq!(cfgr.error_log().errors_for("eth0").len(), 1);

        cfgr.delete(&old).unwrap();
        assert!(cfgr.error_log().errors_for("eth0").is_empty());
        assert!(cfgr.registry().lock().unwrap().lookup_by_name("eth0").is_none());

        let last = rx.drain().pop().unwrap();
        assert!(last.is_removal());
    }

    #[test]
    fn test_delete_unknown_is_noop() {
        let (mut cfgr, device, _rx) = setup();
        cfgr.delete(&eth("ghost")).unwrap();
        assert_eq!(device.call_count("iface.delete"), 0);
    }

    #[test]
    fn test_resync_converged_makes_no_device_mutations() {
        let (mut cfgr, device, _rx) = setup();
        let desired = vec![eth("eth0"), eth("eth1").with_mtu(9000)];
        for cfg in &desired {
            cfgr.configure(cfg).unwrap();
        }
        device.clear_calls();

        cfgr.resync(&desired).unwrap();
        assert!(device.mutations().is_empty());
    }

    #[test]
    fn test_resync_deletes_obsolete_and_creates_missing() {
        let (mut cfgr, device, _rx) = setup();
        cfgr.configure(&eth("old0")).unwrap();
        device.clear_calls();

        cfgr.resync(&[eth("new0")]).unwrap();

        assert!(device.interface_index("old0").is_none());
        assert!(device.interface_index("new0").is_some());
        let reg = cfgr.registry();
        assert!(reg.lock().unwrap().lookup_by_name("old0").is_none());
        assert!(reg.lock().unwrap().lookup_by_name("new0").is_some());
    }

    #[test]
    fn test_resync_updates_drifted() {
        let (mut cfgr, device, _rx) = setup();
        cfgr.configure(&eth("eth0")).unwrap();
        device.clear_calls();

        cfgr.resync(&[eth("eth0").with_mtu(9000)]).unwrap();
        assert_eq!(device.call_count("iface.update"), 1);
        assert_eq!(device.call_count("iface.create"), 0);
    }
}
