//! Route lifecycle against the device.
//!
//! A route depends on its outgoing interface when the config names one;
//! routes resolved by the device itself have no prerequisite. Blocked adds
//! and deletes are parked in the same add/delete cache pair the FIB uses.

use std::sync::MutexGuard;

use dpagent_common::{
    Dependency, ErrorLog, IndexedRegistry, OpKind, PendingCache, SharedRegistry,
};
use dpagent_device::api::{RouteApi, RouteConfig, RouteState};
use dpagent_device::{DeviceError, DeviceIndex};
use thiserror::Error;

use super::types::{RouteMeta, ROUTE_INTERFACE_KEY};
use crate::iface::InterfaceMeta;
use crate::status::{StatusEvent, StatusSender};
use crate::INTERFACE_REGISTRY;

/// Error type for route operations.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The route names no destination network.
    #[error("route names no destination network")]
    MissingDst,
    /// The route names no next hop.
    #[error("route {0} names no next hop")]
    MissingNextHop(String),
    /// The device rejected a call.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Route configurator with add/delete dependency caches.
pub struct RouteConfigurator {
    device: Box<dyn RouteApi>,
    registry: SharedRegistry<RouteMeta>,
    add_cache: PendingCache<RouteConfig>,
    del_cache: PendingCache<RouteConfig>,
    interfaces: SharedRegistry<InterfaceMeta>,
    index_seq: u32,
    errors: ErrorLog,
    status: StatusSender,
}

impl RouteConfigurator {
    /// Creates the configurator, verifying device compatibility first.
    pub fn new(
        mut device: Box<dyn RouteApi>,
        interfaces: SharedRegistry<InterfaceMeta>,
        status: StatusSender,
    ) -> Result<Self, RouteError> {
        device.check_compatibility()?;
        Ok(Self {
            device,
            registry: IndexedRegistry::new_shared("routes"),
            add_cache: PendingCache::new("route-add-cache"),
            del_cache: PendingCache::new("route-del-cache"),
            interfaces,
            index_seq: 0,
            errors: ErrorLog::new("routes"),
            status,
        })
    }

    /// Replaces the error log (capacity tuning at construction time).
    pub fn with_error_log(mut self, errors: ErrorLog) -> Self {
        self.errors = errors;
        self
    }

    /// Shared handle to the route registry.
    pub fn registry(&self) -> SharedRegistry<RouteMeta> {
        SharedRegistry::clone(&self.registry)
    }

    /// The route error log.
    pub fn error_log(&self) -> &ErrorLog {
        &self.errors
    }

    /// True if the route key is parked in the add-cache.
    pub fn is_pending_add(&self, key: &str) -> bool {
        self.add_cache.contains(key)
    }

    /// True if the route key is parked in the delete-cache.
    pub fn is_pending_delete(&self, key: &str) -> bool {
        self.del_cache.contains(key)
    }

    /// Installs the route, or parks it when its interface is missing.
    pub fn configure(&mut self, cfg: &RouteConfig) -> Result<(), RouteError> {
        let result = self.do_configure(cfg);
        if let Err(err) = &result {
            self.errors.record(cfg.key(), OpKind::Create, err.to_string());
        }
        result
    }

    /// Replaces `old` with `new` (remove then install, each side possibly
    /// parked).
    pub fn modify(&mut self, old: &RouteConfig, new: &RouteConfig) -> Result<(), RouteError> {
        let deleted = self.delete(old);
        let configured = self.configure(new);
        match (deleted, configured) {
            (Err(err), _) => Err(err),
            (Ok(()), result) => result,
        }
    }

    /// Removes the route: cancels a parked creation, deletes from the
    /// device, or parks the delete until the device drop is confirmed.
    pub fn delete(&mut self, cfg: &RouteConfig) -> Result<(), RouteError> {
        match self.do_delete(cfg) {
            Ok(confirmed) => {
                if confirmed {
                    self.errors.purge(&cfg.key());
                }
                Ok(())
            }
            Err(err) => {
                self.errors.record(cfg.key(), OpKind::Delete, err.to_string());
                Err(err)
            }
        }
    }

    /// Re-validates parked routes after an interface registered.
    pub fn resolve_interface_added(&mut self, ifname: &str) {
        let dep = Dependency::new(INTERFACE_REGISTRY, ifname);

        for key in self.del_cache.satisfy(&dep) {
            let Some(cfg) = self.del_cache.get(&key).map(|e| e.value.clone()) else {
                continue;
            };
            match self.resolve_dep(&cfg) {
                Ok(if_index) => match self.device.del(&cfg, if_index) {
                    Ok(()) => {
                        self.del_cache.remove(&key);
                        self.errors.purge(&key);
                        self.publish(&key, None);
                    }
                    Err(err) => {
                        log::error!("deferred delete of route {} failed: {}", key, err);
                        self.errors.record(&key, OpKind::Delete, err.to_string());
                    }
                },
                Err(missing) => self.del_cache.insert(key, cfg, missing),
            }
        }

        for key in self.add_cache.satisfy(&dep) {
            let Some(cfg) = self.add_cache.get(&key).map(|e| e.value.clone()) else {
                continue;
            };
            match self.resolve_dep(&cfg) {
                Ok(if_index) => match self.device.add(&cfg, if_index) {
                    Ok(()) => {
                        log::info!("configuring previously cached route {}", key);
                        self.add_cache.remove(&key);
                        let idx = self.next_index();
                        self.reg().register(&key, idx, RouteMeta::new(cfg.clone()));
                        self.publish(&key, Some(state_of(&cfg, if_index)));
                    }
                    Err(err) => {
                        log::error!("deferred add of route {} failed: {}", key, err);
                        self.errors.record(&key, OpKind::Create, err.to_string());
                    }
                },
                Err(missing) => self.add_cache.insert(key, cfg, missing),
            }
        }
    }

    /// Moves realized routes that used the vanished interface back into the
    /// add-cache and re-arms parked ones.
    pub fn resolve_interface_removed(&mut self, ifname: &str) {
        let affected = self.reg().lookup_by_secondary(ROUTE_INTERFACE_KEY, ifname);
        for key in affected {
            let Some((_, meta)) = self.reg().lookup_by_name(&key) else {
                continue;
            };
            log::debug!(
                "route {} lost interface {}, moving back to add-cache",
                key,
                ifname
            );
            self.reg().unregister(&key);
            let missing = self.missing_deps(&meta.config);
            self.add_cache.insert(key.clone(), meta.config, missing);
            self.publish(&key, None);
        }

        for key in self.add_cache.names() {
            let Some(cfg) = self.add_cache.get(&key).map(|e| e.value.clone()) else {
                continue;
            };
            if cfg.outgoing_interface.as_deref() != Some(ifname) {
                continue;
            }
            let missing = self.missing_deps(&cfg);
            self.add_cache.insert(key, cfg, missing);
        }
        for key in self.del_cache.names() {
            let Some(cfg) = self.del_cache.get(&key).map(|e| e.value.clone()) else {
                continue;
            };
            if cfg.outgoing_interface.as_deref() != Some(ifname) {
                continue;
            }
            let missing = self.missing_deps(&cfg);
            self.del_cache.insert(key, cfg, missing);
        }
    }

    /// Reconciles the full desired route set against a device dump.
    /// Interface resync must have run first.
    pub fn resync(&mut self, desired: &[RouteConfig]) -> Result<(), RouteError> {
        log::info!("resyncing {} desired routes", desired.len());
        self.add_cache.clear();
        self.del_cache.clear();

        let mut first_err: Option<RouteError> = None;
        let dumped = self.device.dump()?;

        for state in &dumped {
            let key = state.key();
            let wanted = desired.iter().find(|cfg| cfg.key() == key);
            match wanted {
                None => {
                    log::debug!("route {} is obsolete, deleting", key);
                    let stale = config_of(state, self.lookup_interface_name(state.if_index));
                    if let Err(err) = self.device.del(&stale, state.if_index) {
                        log::error!("resync: delete of route {} failed: {}", key, err);
                        self.errors.record(&key, OpKind::Delete, err.to_string());
                        first_err.get_or_insert(err.into());
                        continue;
                    }
                    self.reg().unregister(&key);
                    self.publish(&key, None);
                }
                Some(cfg) => {
                    let if_name = state.if_index.and_then(|i| self.lookup_interface_name_idx(i));
                    let converged = state.weight == cfg.weight
                        && state.preference == cfg.preference
                        && if_name.as_deref() == cfg.outgoing_interface.as_deref();
                    if converged {
                        if !self.reg().contains(&key) {
                            let idx = self.next_index();
                            self.reg().register(&key, idx, RouteMeta::new(cfg.clone()));
                        }
                        self.publish(&key, Some(state.clone()));
                    } else {
                        log::debug!("route {} drifted, replacing", key);
                        let stale = config_of(state, if_name);
                        if let Err(err) = self.device.del(&stale, state.if_index) {
                            self.errors.record(&key, OpKind::Modify, err.to_string());
                            first_err.get_or_insert(err.into());
                            continue;
                        }
                        self.reg().unregister(&key);
                        if let Err(err) = self.configure(cfg) {
                            first_err.get_or_insert(err);
                        }
                    }
                }
            }
        }

        for cfg in desired {
            if !dumped.iter().any(|s| s.key() == cfg.key()) {
                if let Err(err) = self.configure(cfg) {
                    first_err.get_or_insert(err);
                }
            }
        }

        let registered = self.reg().names();
        for key in registered {
            let dumped_has = dumped.iter().any(|s| s.key() == key);
            let desired_has = desired.iter().any(|c| c.key() == key);
            if !dumped_has && !desired_has {
                self.reg().unregister(&key);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn do_configure(&mut self, cfg: &RouteConfig) -> Result<(), RouteError> {
        self.validate(cfg)?;
        let key = cfg.key();

        self.del_cache.remove(&key);

        match self.resolve_dep(cfg) {
            Err(missing) => {
                log::debug!("route {} waiting on its interface, cached", key);
                self.reg().unregister(&key);
                self.add_cache.insert(key, cfg.clone(), missing);
                Ok(())
            }
            Ok(if_index) => {
                log::info!("configuring route {}", key);
                self.device.add(cfg, if_index)?;
                self.add_cache.remove(&key);
                let idx = self.next_index();
                self.reg().register(&key, idx, RouteMeta::new(cfg.clone()));
                self.publish(&key, Some(state_of(cfg, if_index)));
                Ok(())
            }
        }
    }

    fn do_delete(&mut self, cfg: &RouteConfig) -> Result<bool, RouteError> {
        let key = cfg.key();

        if self.add_cache.remove(&key).is_some() {
            log::debug!("route {} dropped from add-cache", key);
            return Ok(true);
        }

        let found = self.reg().lookup_by_name(&key);
        let Some((_, meta)) = found else {
            log::debug!("route {} not registered, nothing to delete", key);
            return Ok(true);
        };

        match self.resolve_dep(&meta.config) {
            Ok(if_index) => {
                log::info!("deleting route {}", key);
                self.device.del(&meta.config, if_index)?;
                self.reg().unregister(&key);
                self.publish(&key, None);
                Ok(true)
            }
            Err(missing) => {
                log::debug!("route {} delete waiting on its interface, cached", key);
                self.reg().unregister(&key);
                self.del_cache.insert(key, meta.config, missing);
                Ok(false)
            }
        }
    }

    fn validate(&self, cfg: &RouteConfig) -> Result<(), RouteError> {
        if cfg.dst_network.is_empty() {
            return Err(RouteError::MissingDst);
        }
        if cfg.next_hop_addr.is_empty() {
            return Err(RouteError::MissingNextHop(cfg.dst_network.clone()));
        }
        Ok(())
    }

    /// Resolves the optional interface prerequisite.
    fn resolve_dep(&self, cfg: &RouteConfig) -> Result<Option<DeviceIndex>, Vec<Dependency>> {
        let Some(ifname) = &cfg.outgoing_interface else {
            return Ok(None);
        };
        match self
            .interfaces
            .lock()
            .expect("interface registry poisoned")
            .lookup_by_name(ifname)
        {
            Some((idx, _)) => Ok(Some(idx)),
            None => Err(vec![Dependency::new(INTERFACE_REGISTRY, ifname.as_str())]),
        }
    }

    fn missing_deps(&self, cfg: &RouteConfig) -> Vec<Dependency> {
        match self.resolve_dep(cfg) {
            Ok(_) => Vec::new(),
            Err(missing) => missing,
        }
    }

    fn lookup_interface_name(&self, index: Option<DeviceIndex>) -> Option<String> {
        index.and_then(|i| self.lookup_interface_name_idx(i))
    }

    fn lookup_interface_name_idx(&self, index: DeviceIndex) -> Option<String> {
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

    fn publish(&self, key: &str, state: Option<RouteState>) {
        self.status.send(StatusEvent::Route {
            name: key.to_string(),
            state,
        });
    }

    fn reg(&self) -> MutexGuard<'_, IndexedRegistry<RouteMeta>> {
        self.registry.lock().expect("route registry poisoned")
    }
}

fn state_of(cfg: &RouteConfig, if_index: Option<DeviceIndex>) -> RouteState {
    RouteState {
        vrf: cfg.vrf,
        dst_network: cfg.dst_network.clone(),
        next_hop_addr: cfg.next_hop_addr.clone(),
        if_index,
        weight: cfg.weight,
        preference: cfg.preference,
    }
}

fn config_of(state: &RouteState, outgoing_interface: Option<String>) -> RouteConfig {
    RouteConfig {
        vrf: state.vrf,
        dst_network: state.dst_network.clone(),
        next_hop_addr: state.next_hop_addr.clone(),
        outgoing_interface,
        weight: state.weight,
        preference: state.preference,
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
        routes: RouteConfigurator,
        device: MockDevice,
    }

    fn setup() -> Fixture {
        let device = MockDevice::new();
        let (tx, _rx) = status::status_channel(256);
        let ifaces = InterfaceConfigurator::new(Box::new(device.session()), tx.clone()).unwrap();
        let routes =
            RouteConfigurator::new(Box::new(device.session()), ifaces.registry(), tx).unwrap();
        Fixture {
            ifaces,
            routes,
            device,
        }
    }

    fn eth(name: &str) -> InterfaceConfig {
        InterfaceConfig::new(name, InterfaceKind::Ethernet)
    }

    #[test]
    fn test_configure_without_interface_dependency() {
        let mut fx = setup();
        let route = RouteConfig::new("10.0.0.0/24", "192.168.1.1");
        fx.routes.configure(&route).unwrap();

        assert_eq!(fx.device.route_count(), 1);
        assert!(fx.routes.registry().lock().unwrap().contains(&route.key()));
    }

    #[test]
    fn test_configure_parks_until_interface_exists() {
        let mut fx = setup();
        let route = RouteConfig::new("10.0.0.0/24", "192.168.1.1").with_interface("if1");
        fx.routes.configure(&route).unwrap();
        assert!(fx.routes.is_pending_add(&route.key()));
        assert_eq!(fx.device.route_count(), 0);

        fx.ifaces.configure(&eth("if1")).unwrap();
        fx.routes.resolve_interface_added("if1");

        assert!(!fx.routes.is_pending_add(&route.key()));
        assert_eq!(fx.device.route_count(), 1);
    }

    #[test]
    fn test_modify_replaces_route() {
        let mut fx = setup();
        let old = RouteConfig::new("10.0.0.0/24", "192.168.1.1");
        fx.routes.configure(&old).unwrap();

        let mut new = old.clone();
        new.weight = 5;
        fx.routes.modify(&old, &new).unwrap();

        assert_eq!(fx.device.route_count(), 1);
        let reg = fx.routes.registry();
        let (_, meta) = reg.lock().unwrap().lookup_by_name(&new.key()).unwrap();
        assert_eq!(meta.config.weight, 5);
    }

    #[test]
    fn test_delete_parks_when_interface_vanished() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("if1")).unwrap();
        let route = RouteConfig::new("10.0.0.0/24", "192.168.1.1").with_interface("if1");
        fx.routes.configure(&route).unwrap();

        fx.ifaces.delete(&eth("if1")).unwrap();
        fx.routes.delete(&route).unwrap();
        assert!(fx.routes.is_pending_delete(&route.key()));

        fx.ifaces.configure(&eth("if1")).unwrap();
        fx.routes.resolve_interface_added("if1");
        assert!(!fx.routes.is_pending_delete(&route.key()));
        assert_eq!(fx.device.route_count(), 0);
    }

    #[test]
    fn test_interface_removal_moves_route_back_to_cache() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("if1")).unwrap();
        let route = RouteConfig::new("10.0.0.0/24", "192.168.1.1").with_interface("if1");
        fx.routes.configure(&route).unwrap();

        fx.ifaces.delete(&eth("if1")).unwrap();
        fx.routes.resolve_interface_removed("if1");

        assert!(!fx.routes.registry().lock().unwrap().contains(&route.key()));
        assert!(fx.routes.is_pending_add(&route.key()));
    }

    #[test]
    fn test_validation() {
        let mut fx = setup();
        assert!(matches!(
            fx.routes.configure(&RouteConfig::new("", "192.168.1.1")),
            Err(RouteError::MissingDst)
        ));
        assert!(matches!(
            fx.routes.configure(&RouteConfig::new("10.0.0.0/24", "")),
            Err(RouteError::MissingNextHop(_))
        ));
    }

    #[test]
    fn test_resync_converged_makes_no_device_mutations() {
        let mut fx = setup();
        fx.ifaces.configure(&eth("if1")).unwrap();
        let routes = vec![
            RouteConfig::new("10.0.0.0/24", "192.168.1.1").with_interface("if1"),
            RouteConfig::new("10.1.0.0/24", "192.168.1.2"),
        ];
        for route in &routes {
            fx.routes.configure(route).unwrap();
        }
        fx.device.clear_calls();

        fx.routes.resync(&routes).unwrap();
        assert!(fx.device.mutations().is_empty());
    }

    #[test]
    fn test_resync_replaces_drifted_route() {
        let mut fx = setup();
        let route = RouteConfig::new("10.0.0.0/24", "192.168.1.1");
        fx.routes.configure(&route).unwrap();
        fx.device.clear_calls();

        let mut desired = route.clone();
        desired.weight = 7;
        fx.routes.resync(std::slice::from_ref(&desired)).unwrap();

        assert_eq!(fx.device.call_count("route.del"), 1);
        assert_eq!(fx.device.call_count("route.add"), 1);
        let reg = fx.routes.registry();
        let (_, meta) = reg.lock().unwrap().lookup_by_name(&desired.key()).unwrap();
        assert_eq!(meta.config.weight, 7);
    }
}
