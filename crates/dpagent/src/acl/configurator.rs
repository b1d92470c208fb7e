//! ACL lifecycle against the device.
//!
//! The ACL object itself has no prerequisite; only its interface
//! assignments do. Assignment follows the batch rule: interfaces not yet
//! registered are skipped and applied later when they appear, and a single
//! unresolvable assignment never blocks the rest. Rule changes are applied
//! in place under the same device index.

use std::collections::HashSet;
use std::sync::MutexGuard;

use dpagent_common::{ErrorLog, IndexedRegistry, OpKind, SharedRegistry};
use dpagent_device::api::{AclApi, AclConfig, AclState};
use dpagent_device::{DeviceError, DeviceIndex};
use thiserror::Error;

use super::types::{AclMeta, ACL_INTERFACE_KEY};
use crate::iface::InterfaceMeta;
use crate::status::{StatusEvent, StatusSender};

/// Error type for ACL operations.
#[derive(Debug, Error)]
pub enum AclError {
    /// The ACL has no rules.
    #[error("ACL {0} has no rules")]
    EmptyRules(String),
    /// The device rejected a call.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// ACL configurator.
pub struct AclConfigurator {
    device: Box<dyn AclApi>,
    registry: SharedRegistry<AclMeta>,
    interfaces: SharedRegistry<InterfaceMeta>,
    errors: ErrorLog,
    status: StatusSender,
}

impl AclConfigurator {
    /// Creates the configurator, verifying device compatibility first.
    pub fn new(
        mut device: Box<dyn AclApi>,
        interfaces: SharedRegistry<InterfaceMeta>,
        status: StatusSender,
    ) -> Result<Self, AclError> {
        device.check_compatibility()?;
        Ok(Self {
            device,
            registry: IndexedRegistry::new_shared("acls"),
            interfaces,
            errors: ErrorLog::new("acls"),
            status,
        })
    }

    /// Replaces the error log (capacity tuning at construction time).
    pub fn with_error_log(mut self, errors: ErrorLog) -> Self {
        self.errors = errors;
        self
    }

    /// Shared handle to the ACL registry.
    pub fn registry(&self) -> SharedRegistry<AclMeta> {
        SharedRegistry::clone(&self.registry)
    }

    /// The ACL error log.
    pub fn error_log(&self) -> &ErrorLog {
        &self.errors
    }

    /// Creates the ACL, applies resolvable interface assignments and
    /// registers it.
    pub fn configure(&mut self, cfg: &AclConfig) -> Result<(), AclError> {
        let result = self.do_configure(cfg);
        if let Err(err) = &result {
            self.errors.record(&cfg.name, OpKind::Create, err.to_string());
        }
        result
    }

    /// Applies the difference between `old` and `new`: rule changes update
    /// in place, assignment changes re-apply the assignment set.
    pub fn modify(&mut self, old: &AclConfig, new: &AclConfig) -> Result<(), AclError> {
        let result = self.do_modify(old, new);
        if let Err(err) = &result {
            self.errors.record(&new.name, OpKind::Modify, err.to_string());
        }
        result
    }

    /// Deletes the ACL; the device drops its interface assignments.
    pub fn delete(&mut self, cfg: &AclConfig) -> Result<(), AclError> {
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

    /// Applies pending assignments of ACLs referencing an interface that
    /// just registered.
    pub fn resolve_interface_added(&mut self, ifname: &str) {
        let referencing = self.reg().lookup_by_secondary(ACL_INTERFACE_KEY, ifname);
        for acl_name in referencing {
            let Some((acl_index, meta)) = self.reg().lookup_by_name(&acl_name) else {
                continue;
            };
            if meta.is_bound(ifname) {
                continue;
            }
            log::info!("applying ACL {} to interface {}", acl_name, ifname);
            match self.apply_assignments(acl_index, &meta.config) {
                Ok(()) => self.publish_current(&acl_name),
                Err(err) => {
                    log::error!("assigning ACL {} failed: {}", acl_name, err);
                    self.errors.record(&acl_name, OpKind::Modify, err.to_string());
                }
            }
        }
    }

    /// Records that an interface disappeared; the device already dropped
    /// the assignment itself.
    pub fn resolve_interface_removed(&mut self, ifname: &str) {
        let referencing = self.reg().lookup_by_secondary(ACL_INTERFACE_KEY, ifname);
        for acl_name in referencing {
            let Some((acl_index, mut meta)) = self.reg().lookup_by_name(&acl_name) else {
                continue;
            };
            if !meta.is_bound(ifname) {
                continue;
            }
            meta.bound_ingress.retain(|b| b != ifname);
            meta.bound_egress.retain(|b| b != ifname);
            self.reg().register(&acl_name, acl_index, meta);
            self.publish_current(&acl_name);
        }
    }

    /// Reconciles the full desired ACL set against a device dump.
    /// Interface resync must have run first.
    pub fn resync(&mut self, desired: &[AclConfig]) -> Result<(), AclError> {
        log::info!("resyncing {} desired ACLs", desired.len());
        let mut first_err: Option<AclError> = None;

        let mut valid: Vec<&AclConfig> = Vec::new();
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
                None => {
                    log::debug!("ACL {} is obsolete, deleting", state.name);
                    if let Err(err) = self.device.delete(state.acl_index) {
                        log::error!("resync: delete of ACL {} failed: {}", state.name, err);
                        self.errors
                            .record(&state.name, OpKind::Delete, err.to_string());
                        first_err.get_or_insert(err.into());
                        continue;
                    }
                    self.reg().unregister(&state.name);
                    self.publish(&state.name, None);
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

    fn do_configure(&mut self, cfg: &AclConfig) -> Result<(), AclError> {
        self.validate(cfg)?;

        let existing = self.reg().lookup_by_name(&cfg.name);
        if let Some((_, meta)) = existing {
            log::debug!("ACL {} already registered, modifying", cfg.name);
            return self.do_modify(&meta.config, cfg);
        }

        log::info!("configuring ACL {} with {} rules", cfg.name, cfg.rules.len());
        let acl_index = self.device.create(&cfg.name, &cfg.rules)?;

        let mut first_err: Option<AclError> = None;
        if let Err(err) = self.apply_assignments(acl_index, cfg) {
            log::error!("assigning ACL {} failed: {}", cfg.name, err);
            first_err.get_or_insert(err);
        }
        self.publish_current(&cfg.name);

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn do_modify(&mut self, old: &AclConfig, new: &AclConfig) -> Result<(), AclError> {
        self.validate(new)?;

        let found = self.reg().lookup_by_name(&old.name);
        let Some((acl_index, meta)) = found else {
            log::warn!(
                "ACL {} modify without registered old state, creating as new",
                new.name
            );
            return self.do_configure(new);
        };

        let mut first_err: Option<AclError> = None;
        if old.rules != new.rules {
            if let Err(err) = self.device.update(acl_index, &new.rules) {
                log::error!("updating rules of ACL {} failed: {}", new.name, err);
                first_err.get_or_insert(err.into());
            }
        }

        let assignments_changed = old.ingress != new.ingress
            || old.egress != new.egress
            || meta.bound_ingress != self.resolve_names(&new.ingress).0
            || meta.bound_egress != self.resolve_names(&new.egress).0;
        if assignments_changed {
            if let Err(err) = self.apply_assignments(acl_index, new) {
                log::error!("assigning ACL {} failed: {}", new.name, err);
                first_err.get_or_insert(err);
            }
        } else {
            self.reg().register(
                &new.name,
                acl_index,
                AclMeta::new(new.clone(), meta.bound_ingress, meta.bound_egress),
            );
        }
        self.publish_current(&new.name);

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn do_delete(&mut self, cfg: &AclConfig) -> Result<(), AclError> {
        let found = self.reg().lookup_by_name(&cfg.name);
        let Some((acl_index, _)) = found else {
            log::debug!("ACL {} not registered, nothing to delete", cfg.name);
            return Ok(());
        };

        log::info!("deleting ACL {}", cfg.name);
        self.device.delete(acl_index)?;
        self.reg().unregister(&cfg.name);
        self.publish(&cfg.name, None);
        Ok(())
    }

    /// Applies the resolvable part of the desired assignment set and
    /// registers the ACL with the applied lists. Unresolvable interfaces
    /// are skipped and late-bound.
    fn apply_assignments(&mut self, acl_index: DeviceIndex, cfg: &AclConfig) -> Result<(), AclError> {
        let (ingress_names, ingress_indices) = self.resolve_names(&cfg.ingress);
        let (egress_names, egress_indices) = self.resolve_names(&cfg.egress);

        let skipped = (cfg.ingress.len() - ingress_names.len())
            + (cfg.egress.len() - egress_names.len());
        if skipped > 0 {
            log::debug!(
                "ACL {}: {} assignments postponed until their interface registers",
                cfg.name,
                skipped
            );
        }

        let result = if !ingress_indices.is_empty() || !egress_indices.is_empty() {
            self.device
                .set_interfaces(acl_index, &ingress_indices, &egress_indices)
                .map_err(AclError::from)
        } else {
            Ok(())
        };

        let (bound_ingress, bound_egress) = if result.is_ok() {
            (ingress_names, egress_names)
        } else {
            (Vec::new(), Vec::new())
        };
        self.reg().register(
            &cfg.name,
            acl_index,
            AclMeta::new(cfg.clone(), bound_ingress, bound_egress),
        );
        result
    }

    /// Converges a dumped ACL with the desired config.
    fn adopt_dumped(&mut self, state: &AclState, cfg: &AclConfig) -> Result<(), AclError> {
        let mut first_err: Option<AclError> = None;

        if state.rules != cfg.rules {
            log::debug!("ACL {} rules drifted, updating", cfg.name);
            if let Err(err) = self.device.update(state.acl_index, &cfg.rules) {
                first_err.get_or_insert(err.into());
            }
        }

        let (ingress_names, ingress_indices) = self.resolve_names(&cfg.ingress);
        let (egress_names, egress_indices) = self.resolve_names(&cfg.egress);
        let want_in: HashSet<DeviceIndex> = ingress_indices.iter().copied().collect();
        let want_eg: HashSet<DeviceIndex> = egress_indices.iter().copied().collect();
        let have_in: HashSet<DeviceIndex> = state.ingress.iter().copied().collect();
        let have_eg: HashSet<DeviceIndex> = state.egress.iter().copied().collect();

        if want_in != have_in || want_eg != have_eg {
            log::debug!("ACL {} assignments drifted, re-applying", cfg.name);
            if let Err(err) =
                self.device
                    .set_interfaces(state.acl_index, &ingress_indices, &egress_indices)
            {
                first_err.get_or_insert(err.into());
            }
        }

        self.reg().register(
            &cfg.name,
            state.acl_index,
            AclMeta::new(cfg.clone(), ingress_names, egress_names),
        );
        self.publish(&cfg.name, Some(state.clone()));

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn validate(&self, cfg: &AclConfig) -> Result<(), AclError> {
        if cfg.rules.is_empty() {
            return Err(AclError::EmptyRules(cfg.name.clone()));
        }
        Ok(())
    }

    /// Splits a desired interface list into the resolvable names and their
    /// indices; unresolved names are simply absent from the result.
    fn resolve_names(&self, names: &[String]) -> (Vec<String>, Vec<DeviceIndex>) {
        let ifaces = self.interfaces.lock().expect("interface registry poisoned");
        let mut resolved_names = Vec::new();
        let mut resolved_indices = Vec::new();
        for name in names {
            if let Some((idx, _)) = ifaces.lookup_by_name(name) {
                resolved_names.push(name.clone());
                resolved_indices.push(idx);
            }
        }
        (resolved_names, resolved_indices)
    }

    fn publish_current(&mut self, name: &str) {
        match self.device.dump() {
            Ok(dump) => {
                let state = dump.into_iter().find(|s| s.name == name);
                self.status.send(StatusEvent::Acl {
                    name: name.to_string(),
                    state,
                });
            }
            Err(err) => log::warn!("status dump for ACL {} failed: {}", name, err),
        }
    }

    fn publish(&self, name: &str, state: Option<AclState>) {
        self.status.send(StatusEvent::Acl {
            name: name.to_string(),
            state,
        });
    }

    fn reg(&self) -> MutexGuard<'_, IndexedRegistry<AclMeta>> {
        self.registry.lock().expect("acl registry poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::InterfaceConfigurator;
    use crate::status;
    use dpagent_device::api::{AclAction, AclRule, InterfaceConfig, InterfaceKind};
    use dpagent_device::MockDevice;

    struct Fixture {
        ifaces: InterfaceConfigurator,
        acls: AclConfigurator,
        device: MockDevice,
    }

    fn setup() -> Fixture {
        let device = MockDevice::new();
        let (tx, _rx) = status::status_channel(256);
        let ifaces = InterfaceConfigurator::new(Box::new(device.session()), tx.clone()).unwrap();
        let acls =
            AclConfigurator::new(Box::new(device.session()), ifaces.registry(), tx).unwrap();
        Fixture {
            ifaces,
            acls,
            device,
        }
    }

    fn eth(name: &str) -> InterfaceConfig {
        InterfaceConfig::new(name, InterfaceKind::Ethernet)
    }

    fn permit_acl(name: &str) -> AclConfig {
        AclConfig::new(
            name,
            vec![AclRule::new(AclAction::Permit).with_src("10.0.0.0/8")],
        )
    }

    #[test]
    fn test_configure_applies_resolved_assignments_only() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("if0")).unwrap();

        let acl = permit_acl("acl1").with_ingress("if0").with_ingress("missing");
        // an unresolvable assignment never fails the batch
        fx.acls.configure(&acl).unwrap();

        assert_eq!(fx.device.call_count("acl.create"), 1);
        assert_eq!(fx.device.call_count("acl.set_interfaces"), 1);
        let reg = fx.acls.registry();
        let (_, meta) = reg.lock().unwrap().lookup_by_name("acl1").unwrap();
        assert_eq!(meta.bound_ingress, vec!["if0"]);
    }

    #[test]
    fn test_configure_rejects_empty_rules() {
        let mut fx = setup();
        let acl = AclConfig::new("acl1", vec![]);
        assert!(matches!(
            fx.acls.configure(&acl),
            Err(AclError::EmptyRules(_))
        ));
        assert_eq!(fx.device.call_count("acl.create"), 0);
    }

    #[test]
    fn test_resolve_interface_added_applies_pending_assignment() {
        let mut fx = setup();
        let acl = permit_acl("acl1").with_ingress("if0");
        fx.acls.configure(&acl).unwrap();
        assert_eq!(fx.device.call_count("acl.set_interfaces"), 0);

        fx.ifaces.configure(&eth("if0")).unwrap();
        fx.acls.resolve_interface_added("if0");
        assert_eq!(fx.device.call_count("acl.set_interfaces"), 1);

        // a repeated notification must not re-apply
        fx.acls.resolve_interface_added("if0");
        assert_eq!(fx.device.call_count("acl.set_interfaces"), 1);
    }

    #[test]
    fn test_modify_updates_rules_in_place() {
        let mut fx = setup();
        let old = permit_acl("acl1");
        fx.acls.configure(&old).unwrap();

        let new = AclConfig::new("acl1", vec![AclRule::new(AclAction::Deny)]);
        fx.acls.modify(&old, &new).unwrap();

        assert_eq!(fx.device.call_count("acl.update"), 1);
        assert_eq!(fx.device.call_count("acl.create"), 1);
        assert_eq!(fx.device.call_count("acl.delete"), 0);
    }

    #[test]
    fn test_delete_unregisters() {
        let mut fx = setup();
        let acl = permit_acl("acl1");
        fx.acls.configure(&acl).unwrap();

        fx.acls.delete(&acl).unwrap();
        assert!(!fx.acls.registry().lock().unwrap().contains("acl1"));
        assert_eq!(fx.device.call_count("acl.delete"), 1);
    }

    #[test]
    fn test_resync_converged_makes_no_device_mutations() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("if0")).unwrap();
        let acl = permit_acl("acl1").with_ingress("if0");
        fx.acls.configure(&acl).unwrap();
        fx.device.clear_calls();

        fx.acls.resync(std::slice::from_ref(&acl)).unwrap();
        assert!(fx.device.mutations().is_empty());
    }

    #[test]
    fn test_resync_updates_drifted_rules() {
        let mut fx = setup();
        let acl = permit_acl("acl1");
        fx.acls.configure(&acl).unwrap();
        fx.device.clear_calls();

        let desired = AclConfig::new("acl1", vec![AclRule::new(AclAction::Deny)]);
        fx.acls.resync(&[desired]).unwrap();

        assert_eq!(fx.device.call_count("acl.update"), 1);
        assert_eq!(fx.device.call_count("acl.create"), 0);
    }
}
