//! Single serialized event loop.
//!
//! The dispatcher is the only writer to every registry, pending cache and
//! error log in the agent. It owns bounded input queues for incremental
//! desired-state changes and resync requests; producers use non-blocking
//! sends and drop (with a log line) on overflow rather than stall.
//!
//! Exactly one event is processed at a time. After each external event the
//! dependency notifications it produced are drained to quiescence: an
//! interface registering ripples through bridge domains, FIB entries,
//! cross-connects, ACLs and routes before the next external event is
//! accepted, so one change's effects are observable as a unit.

use dpagent_common::{ErrorLog, NotifyReceiver, RegistryEvent, RegistryEventKind};
use dpagent_device::api::{AclApi, BridgeApi, FibApi, InterfaceApi, RouteApi, XConnectApi};
use dpagent_device::MockDevice;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::acl::{AclConfigurator, AclError};
use crate::bridge::{BridgeDomainConfigurator, BridgeDomainMeta, BridgeError};
use crate::context::AgentContext;
use crate::events::{Change, ChangeEvent, ResyncSnapshot};
use crate::fib::{FibConfigurator, FibError};
use crate::iface::{IfaceError, InterfaceConfigurator, InterfaceMeta};
use crate::route::{RouteConfigurator, RouteError};
use crate::xconnect::{XConnectConfigurator, XcError};

/// One exclusive device session per configurator; sessions are never
/// shared across entity types.
pub struct DeviceSessions {
    pub interfaces: Box<dyn InterfaceApi>,
    pub bridges: Box<dyn BridgeApi>,
    pub fibs: Box<dyn FibApi>,
    pub xconnects: Box<dyn XConnectApi>,
    pub acls: Box<dyn AclApi>,
    pub routes: Box<dyn RouteApi>,
}

impl DeviceSessions {
    /// Sessions backed by the in-process mock device.
    pub fn mock(device: &MockDevice) -> Self {
        Self {
            interfaces: Box::new(device.session()),
            bridges: Box::new(device.session()),
            fibs: Box::new(device.session()),
            xconnects: Box::new(device.session()),
            acls: Box::new(device.session()),
            routes: Box::new(device.session()),
        }
    }
}

/// Construction-time failure of the dispatcher (compatibility checks).
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("interface configurator: {0}")]
    Iface(#[from] IfaceError),
    #[error("bridge-domain configurator: {0}")]
    Bridge(#[from] BridgeError),
    #[error("FIB configurator: {0}")]
    Fib(#[from] FibError),
    #[error("cross-connect configurator: {0}")]
    XConnect(#[from] XcError),
    #[error("ACL configurator: {0}")]
    Acl(#[from] AclError),
    #[error("route configurator: {0}")]
    Route(#[from] RouteError),
}

/// Producer-side handles to the dispatcher's input queues.
///
/// Sends never block: a full queue drops the new event and logs the drop.
#[derive(Clone)]
pub struct AgentHandles {
    changes: mpsc::Sender<ChangeEvent>,
    resyncs: mpsc::Sender<ResyncSnapshot>,
}

impl AgentHandles {
    /// Enqueues an incremental change. Returns false if the queue was full
    /// or the dispatcher is gone.
    pub fn send_change(&self, event: ChangeEvent) -> bool {
        match self.changes.try_send(event) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("change queue overflow, dropping event: {}", err);
                false
            }
        }
    }

    /// Enqueues a full resync request. Returns false if the queue was full
    /// or the dispatcher is gone.
    pub fn send_resync(&self, snapshot: ResyncSnapshot) -> bool {
        match self.resyncs.try_send(snapshot) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("resync queue overflow, dropping request: {}", err);
                false
            }
        }
    }
}

enum Input {
    Change(ChangeEvent),
    Resync(ResyncSnapshot),
    Closed,
}

/// The serialized processing loop and owner of all configurators.
pub struct Dispatcher {
    interfaces: InterfaceConfigurator,
    bridges: BridgeDomainConfigurator,
    fibs: FibConfigurator,
    xconnects: XConnectConfigurator,
    acls: AclConfigurator,
    routes: RouteConfigurator,

    change_rx: mpsc::Receiver<ChangeEvent>,
    resync_rx: mpsc::Receiver<ResyncSnapshot>,
    change_closed: bool,
    resync_closed: bool,

    // one dependency-notification queue per consumer
    iface_events_bridges: NotifyReceiver<RegistryEvent<InterfaceMeta>>,
    iface_events_fibs: NotifyReceiver<RegistryEvent<InterfaceMeta>>,
    iface_events_xconnects: NotifyReceiver<RegistryEvent<InterfaceMeta>>,
    iface_events_acls: NotifyReceiver<RegistryEvent<InterfaceMeta>>,
    iface_events_routes: NotifyReceiver<RegistryEvent<InterfaceMeta>>,
    bridge_events_fibs: NotifyReceiver<RegistryEvent<BridgeDomainMeta>>,
}

impl Dispatcher {
    /// Wires up all configurators and subscriptions, verifying device
    /// compatibility for every session.
    pub fn new(
        ctx: &AgentContext,
        sessions: DeviceSessions,
    ) -> Result<(Self, AgentHandles), DaemonError> {
        let status = ctx.status_sender();
        let elog_cap = ctx.config().error_log_capacity;

        let interfaces = InterfaceConfigurator::new(sessions.interfaces, status.clone())?
            .with_error_log(ErrorLog::with_capacity("interfaces", elog_cap));
        let if_reg = interfaces.registry();

        let iface_events_bridges = if_reg
            .lock()
            .expect("interface registry poisoned")
            .subscribe("bridge-domains");
        let iface_events_fibs = if_reg
            .lock()
            .expect("interface registry poisoned")
            .subscribe("fib");
        let iface_events_xconnects = if_reg
            .lock()
            .expect("interface registry poisoned")
            .subscribe("xconnects");
        let iface_events_acls = if_reg
            .lock()
            .expect("interface registry poisoned")
            .subscribe("acls");
        let iface_events_routes = if_reg
            .lock()
            .expect("interface registry poisoned")
            .subscribe("routes");

        let bridges = BridgeDomainConfigurator::new(
            sessions.bridges,
            if_reg.clone(),
            status.clone(),
        )?
        .with_error_log(ErrorLog::with_capacity("bridge-domains", elog_cap));
        let bd_reg = bridges.registry();
        let bridge_events_fibs = bd_reg
            .lock()
            .expect("bridge registry poisoned")
            .subscribe("fib");

        let fibs = FibConfigurator::new(sessions.fibs, if_reg.clone(), bd_reg, status.clone())?
            .with_error_log(ErrorLog::with_capacity("fib", elog_cap));
        let xconnects =
            XConnectConfigurator::new(sessions.xconnects, if_reg.clone(), status.clone())?
                .with_error_log(ErrorLog::with_capacity("xconnects", elog_cap));
        let acls = AclConfigurator::new(sessions.acls, if_reg.clone(), status.clone())?
            .with_error_log(ErrorLog::with_capacity("acls", elog_cap));
        let routes = RouteConfigurator::new(sessions.routes, if_reg, status)?
            .with_error_log(ErrorLog::with_capacity("routes", elog_cap));

        let (change_tx, change_rx) = mpsc::channel(ctx.config().change_queue_capacity);
        let (resync_tx, resync_rx) = mpsc::channel(ctx.config().resync_queue_capacity);

        Ok((
            Self {
                interfaces,
                bridges,
                fibs,
                xconnects,
                acls,
                routes,
                change_rx,
                resync_rx,
                change_closed: false,
                resync_closed: false,
                iface_events_bridges,
                iface_events_fibs,
                iface_events_xconnects,
                iface_events_acls,
                iface_events_routes,
                bridge_events_fibs,
            },
            AgentHandles {
                changes: change_tx,
                resyncs: resync_tx,
            },
        ))
    }

    /// Runs the loop until every producer handle is dropped.
    pub async fn run(&mut self) {
        log::info!("dispatcher loop started");
        loop {
            match self.next_input().await {
                Input::Resync(snapshot) => self.handle_resync(&snapshot),
                Input::Change(event) => self.handle_change(event),
                Input::Closed => break,
            }
            self.drain_dependency_events();
        }
        log::info!("dispatcher loop stopped");
    }

    /// Applies one incremental change, dispatching to the matching
    /// configurator. Failures are logged and recorded; the loop never
    /// stops on them.
    pub fn handle_change(&mut self, event: ChangeEvent) {
        match event {
            ChangeEvent::Interface(Change { old, new }) => match (old, new) {
                (None, Some(new)) => {
                    if let Err(err) = self.interfaces.configure(&new) {
                        log::error!("interface {} configure failed: {}", new.name, err);
                    }
                }
                (Some(old), Some(new)) => {
                    if let Err(err) = self.interfaces.modify(&old, &new) {
                        log::error!("interface {} modify failed: {}", new.name, err);
                    }
                }
                (Some(old), None) => {
                    if let Err(err) = self.interfaces.delete(&old) {
                        log::error!("interface {} delete failed: {}", old.name, err);
                    }
                }
                (None, None) => log::warn!("interface change event carries no value"),
            },
            ChangeEvent::BridgeDomain(Change { old, new }) => match (old, new) {
                (None, Some(new)) => {
                    if let Err(err) = self.bridges.configure(&new) {
                        log::error!("bridge domain {} configure failed: {}", new.name, err);
                    }
                }
                (Some(old), Some(new)) => {
                    if let Err(err) = self.bridges.modify(&old, &new) {
                        log::error!("bridge domain {} modify failed: {}", new.name, err);
                    }
                }
                (Some(old), None) => {
                    if let Err(err) = self.bridges.delete(&old) {
                        log::error!("bridge domain {} delete failed: {}", old.name, err);
                    }
                }
                (None, None) => log::warn!("bridge-domain change event carries no value"),
            },
            ChangeEvent::Fib(Change { old, new }) => match (old, new) {
                (None, Some(new)) => {
                    if let Err(err) = self.fibs.configure(&new) {
                        log::error!("FIB entry {} configure failed: {}", new.phys_address, err);
                    }
                }
                (Some(old), Some(new)) => {
                    if let Err(err) = self.fibs.modify(&old, &new) {
                        log::error!("FIB entry {} modify failed: {}", new.phys_address, err);
                    }
                }
                (Some(old), None) => {
                    if let Err(err) = self.fibs.delete(&old) {
                        log::error!("FIB entry {} delete failed: {}", old.phys_address, err);
                    }
                }
                (None, None) => log::warn!("FIB change event carries no value"),
            },
            ChangeEvent::XConnect(Change { old, new }) => match (old, new) {
                (None, Some(new)) => {
                    if let Err(err) = self.xconnects.configure(&new) {
                        log::error!(
                            "cross-connect {} configure failed: {}",
                            new.receive_interface,
                            err
                        );
                    }
                }
                (Some(old), Some(new)) => {
                    if let Err(err) = self.xconnects.modify(&old, &new) {
                        log::error!(
                            "cross-connect {} modify failed: {}",
                            new.receive_interface,
                            err
                        );
                    }
                }
                (Some(old), None) => {
                    if let Err(err) = self.xconnects.delete(&old) {
                        log::error!(
                            "cross-connect {} delete failed: {}",
                            old.receive_interface,
                            err
                        );
                    }
                }
                (None, None) => log::warn!("cross-connect change event carries no value"),
            },
            ChangeEvent::Acl(Change { old, new }) => match (old, new) {
                (None, Some(new)) => {
                    if let Err(err) = self.acls.configure(&new) {
                        log::error!("ACL {} configure failed: {}", new.name, err);
                    }
                }
                (Some(old), Some(new)) => {
                    if let Err(err) = self.acls.modify(&old, &new) {
                        log::error!("ACL {} modify failed: {}", new.name, err);
                    }
                }
                (Some(old), None) => {
                    if let Err(err) = self.acls.delete(&old) {
                        log::error!("ACL {} delete failed: {}", old.name, err);
                    }
                }
                (None, None) => log::warn!("ACL change event carries no value"),
            },
            ChangeEvent::Route(Change { old, new }) => match (old, new) {
                (None, Some(new)) => {
                    if let Err(err) = self.routes.configure(&new) {
                        log::error!("route {} configure failed: {}", new.key(), err);
                    }
                }
                (Some(old), Some(new)) => {
                    if let Err(err) = self.routes.modify(&old, &new) {
                        log::error!("route {} modify failed: {}", new.key(), err);
                    }
                }
                (Some(old), None) => {
                    if let Err(err) = self.routes.delete(&old) {
                        log::error!("route {} delete failed: {}", old.key(), err);
                    }
                }
                (None, None) => log::warn!("route change event carries no value"),
            },
        }
    }

    /// Runs a full resync of every entity type against the snapshot.
    ///
    /// Interfaces go first and bridge domains second: dependents correlate
    /// their dumps through those registries. Per-type errors accumulate
    /// inside each configurator; the pass always runs to completion.
    pub fn handle_resync(&mut self, snapshot: &ResyncSnapshot) {
        log::info!("full resync started");
        if let Err(err) = self.interfaces.resync(&snapshot.interfaces) {
            log::error!("interface resync: {}", err);
        }
        if let Err(err) = self.bridges.resync(&snapshot.bridge_domains) {
            log::error!("bridge-domain resync: {}", err);
        }
        if let Err(err) = self.fibs.resync(&snapshot.fibs) {
            log::error!("FIB resync: {}", err);
        }
        if let Err(err) = self.xconnects.resync(&snapshot.xconnects) {
            log::error!("cross-connect resync: {}", err);
        }
        if let Err(err) = self.acls.resync(&snapshot.acls) {
            log::error!("ACL resync: {}", err);
        }
        if let Err(err) = self.routes.resync(&snapshot.routes) {
            log::error!("route resync: {}", err);
        }
        log::info!("full resync finished");
    }

    /// Drains all dependency notification queues to quiescence: retries
    /// triggered by one event may register further entities and produce
    /// more notifications, which are drained in the same pass.
    pub fn drain_dependency_events(&mut self) {
        loop {
            let mut progressed = false;

            for ev in self.iface_events_bridges.drain() {
                progressed = true;
                match ev.kind {
                    RegistryEventKind::Added => {
                        self.bridges.resolve_interface_added(&ev.name, ev.index)
                    }
                    RegistryEventKind::Removed => self.bridges.resolve_interface_removed(&ev.name),
                }
            }
            for ev in self.iface_events_fibs.drain() {
                progressed = true;
                match ev.kind {
                    RegistryEventKind::Added => self.fibs.resolve_interface_added(&ev.name),
                    RegistryEventKind::Removed => self.fibs.resolve_interface_removed(&ev.name),
                }
            }
            for ev in self.bridge_events_fibs.drain() {
                progressed = true;
                match ev.kind {
                    RegistryEventKind::Added => self.fibs.resolve_bridge_added(&ev.name),
                    RegistryEventKind::Removed => self.fibs.resolve_bridge_removed(&ev.name),
                }
            }
            for ev in self.iface_events_xconnects.drain() {
                progressed = true;
                match ev.kind {
                    RegistryEventKind::Added => self.xconnects.resolve_interface_added(&ev.name),
                    RegistryEventKind::Removed => {
                        self.xconnects.resolve_interface_removed(&ev.name)
                    }
                }
            }
            for ev in self.iface_events_acls.drain() {
                progressed = true;
                match ev.kind {
                    RegistryEventKind::Added => self.acls.resolve_interface_added(&ev.name),
                    RegistryEventKind::Removed => self.acls.resolve_interface_removed(&ev.name),
                }
            }
            for ev in self.iface_events_routes.drain() {
                progressed = true;
                match ev.kind {
                    RegistryEventKind::Added => self.routes.resolve_interface_added(&ev.name),
                    RegistryEventKind::Removed => self.routes.resolve_interface_removed(&ev.name),
                }
            }

            if !progressed {
                break;
            }
        }
    }

    /// The interface configurator (read side).
    pub fn interfaces(&self) -> &InterfaceConfigurator {
        &self.interfaces
    }

    /// The bridge-domain configurator (read side).
    pub fn bridges(&self) -> &BridgeDomainConfigurator {
        &self.bridges
    }

    /// The FIB configurator (read side).
    pub fn fibs(&self) -> &FibConfigurator {
        &self.fibs
    }

    /// The cross-connect configurator (read side).
    pub fn xconnects(&self) -> &XConnectConfigurator {
        &self.xconnects
    }

    /// The ACL configurator (read side).
    pub fn acls(&self) -> &AclConfigurator {
        &self.acls
    }

    /// The route configurator (read side).
    pub fn routes(&self) -> &RouteConfigurator {
        &self.routes
    }

    /// Waits for the next external event. Resync requests take priority;
    /// a closed queue is disabled without discarding what the other queue
    /// still holds.
    async fn next_input(&mut self) -> Input {
        loop {
            tokio::select! {
                biased;
                snapshot = self.resync_rx.recv(), if !self.resync_closed => match snapshot {
                    Some(snapshot) => return Input::Resync(snapshot),
                    None => self.resync_closed = true,
                },
                event = self.change_rx.recv(), if !self.change_closed => match event {
                    Some(event) => return Input::Change(event),
                    None => self.change_closed = true,
                },
                else => return Input::Closed,
            }
        }
    }
}
