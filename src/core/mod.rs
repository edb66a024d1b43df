mod daemon;
mod engine;
mod listener;
mod tables;
mod translate;

pub mod netwatch;

pub use self::daemon::MdnsSdEngine;
#[cfg(test)]
pub(crate) use self::engine::testing;
pub use self::engine::{EngineConfig, EngineError, EngineEvent, EngineRecord, EventKind, ProtocolEngine};
pub use self::listener::{
    DiscoveryListener, DiscoveryWatcher, ListenerKey, NoopWatcher, RegistrationListener,
    ResolveListener,
};

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::protocol::{instance_key, is_type_valid, split_instance_key, ServiceInfo};

use self::tables::{PendingResolution, Tables};
use self::translate::{info_to_record, record_to_info};

/// How long a resolve request may wait for the network before the caller
/// is notified with a timeout.
const RESOLVE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Status code meaning success, delivered with every callback.
pub const ERR_NONE: i32 = 0;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("a callback is required")]
    IllegalArgument,

    #[error("callback already in use")]
    CallbackDuplicated,

    #[error("callback not found")]
    CallbackNotFound,

    #[error("resolve timed out")]
    ResolveTimeout,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, ManagerError>;

impl ManagerError {
    /// Stable integer code for callback delivery and the wire protocol.
    pub fn code(&self) -> i32 {
        match self {
            Self::IllegalArgument => 1,
            Self::CallbackDuplicated => 2,
            Self::CallbackNotFound => 3,
            Self::ResolveTimeout => 4,
            Self::Engine(_) => 5,
        }
    }
}

fn status_code(status: &Result<()>) -> i32 {
    match status {
        Ok(()) => ERR_NONE,
        Err(e) => e.code(),
    }
}

/// The mDNS service manager: registration, discovery and resolution over
/// a protocol engine, with per-caller correlation tables and asynchronous
/// callback delivery.
///
/// Callbacks always run on detached tasks, never on the calling thread
/// and never under the table lock, so a callback implementation may call
/// back into the manager without deadlocking. Failures inside delivery
/// tasks are swallowed; the error code inside the payload is the only
/// failure signal callers get.
pub struct MdnsManager {
    engine: Arc<dyn ProtocolEngine>,
    tables: Arc<Tables>,
    watcher: Arc<dyn DiscoveryWatcher>,
    cancel: CancellationToken,
}

impl MdnsManager {
    /// Create a manager with no host-layer watcher. Must be called inside
    /// a Tokio runtime; construction spawns the event dispatcher.
    pub fn new(engine: Arc<dyn ProtocolEngine>) -> Self {
        Self::with_hooks(engine, Arc::new(NoopWatcher), CancellationToken::new())
    }

    /// Create a manager with an unload-policy watcher and a shared
    /// cancellation token for ordered shutdown.
    pub fn with_hooks(
        engine: Arc<dyn ProtocolEngine>,
        watcher: Arc<dyn DiscoveryWatcher>,
        cancel: CancellationToken,
    ) -> Self {
        let tables = Arc::new(Tables::new());
        spawn_dispatcher(engine.clone(), tables.clone(), cancel.clone());
        Self {
            engine,
            tables,
            watcher,
            cancel,
        }
    }

    /// Register a service. The entry is keyed by the callback handle; a
    /// second registration from the same handle is rejected. The engine's
    /// immediate status is returned and also delivered asynchronously via
    /// `handle_register` followed by `handle_register_result`, exactly
    /// once each, success or not.
    pub fn register_service(
        &self,
        info: &ServiceInfo,
        cb: Arc<dyn RegistrationListener>,
    ) -> Result<()> {
        let key = ListenerKey::of(&cb);
        self.tables
            .insert_registration(key, cb.clone(), info.instance_key())?;

        let status = self
            .engine
            .register(info_to_record(info))
            .map_err(ManagerError::from);
        let err = status_code(&status);

        tracing::info!(name = %info.name, service_type = %info.service_type, err, "Service registered");

        let info = info.clone();
        tokio::spawn(async move {
            cb.handle_register(info.clone(), err);
            cb.handle_register_result(info, err);
        });
        status
    }

    /// Unregister by callback handle. The `handle_unregister` delivery
    /// always fires, carrying the identity that was found, or an empty
    /// info when the handle was unknown.
    pub fn unregister_service(&self, cb: Arc<dyn RegistrationListener>) -> Result<()> {
        let key = ListenerKey::of(&cb);
        let (info, status) = match self.tables.take_registration(key) {
            Some(entry) => {
                let status = self
                    .engine
                    .unregister(&entry.instance)
                    .map_err(ManagerError::from);
                let (name, service_type) = split_instance_key(&entry.instance);
                tracing::info!(instance = %entry.instance, "Service unregistered");
                (
                    ServiceInfo {
                        name,
                        service_type,
                        ..Default::default()
                    },
                    status,
                )
            }
            None => (ServiceInfo::default(), Err(ManagerError::CallbackNotFound)),
        };

        let err = status_code(&status);
        tokio::spawn(async move { cb.handle_unregister(info, err) });
        status
    }

    /// Start browsing a service type for this caller. Every matching
    /// found/lost event fans out to all active discoverers of the type.
    pub fn start_discover_service(
        &self,
        service_type: &str,
        cb: Arc<dyn DiscoveryListener>,
    ) -> Result<()> {
        if !is_type_valid(service_type) {
            return Err(ManagerError::IllegalArgument);
        }

        let key = ListenerKey::of(&cb);
        let active = self
            .tables
            .insert_discovery(key, cb.clone(), service_type.to_string())?;

        let status = self
            .engine
            .discover(service_type)
            .map_err(ManagerError::from);
        if status.is_ok() {
            self.watcher.discoverer_added(active);
        }

        tracing::info!(service_type, active, "Discovery started");

        let info = ServiceInfo {
            service_type: service_type.to_string(),
            ..Default::default()
        };
        let err = status_code(&status);
        tokio::spawn(async move { cb.handle_start_discover(info, err) });
        status
    }

    pub fn stop_discover_service(&self, cb: Arc<dyn DiscoveryListener>) -> Result<()> {
        let key = ListenerKey::of(&cb);
        let (info, status) = match self.tables.take_discovery(key) {
            Some((entry, remaining)) => {
                let status = self
                    .engine
                    .stop_discover(&entry.service_type)
                    .map_err(ManagerError::from);
                self.watcher.discoverer_removed(remaining);
                tracing::info!(service_type = %entry.service_type, remaining, "Discovery stopped");
                (
                    ServiceInfo {
                        service_type: entry.service_type,
                        ..Default::default()
                    },
                    status,
                )
            }
            None => (ServiceInfo::default(), Err(ManagerError::CallbackNotFound)),
        };

        let err = status_code(&status);
        tokio::spawn(async move { cb.handle_stop_discover(info, err) });
        status
    }

    /// Resolve a service instance to its host and address. The caller is
    /// notified exactly once: with the merged result when the protocol
    /// answers, or with a timeout code after five seconds. Both paths
    /// claim the same table entry under the lock, so whichever fires
    /// first wins and the loser finds nothing to do.
    pub fn resolve_service(&self, info: &ServiceInfo, cb: Arc<dyn ResolveListener>) -> Result<()> {
        let instance = info.instance_key();
        let key = ListenerKey::of(&cb);
        self.tables.insert_resolve(key, cb, instance.clone())?;
        self.spawn_resolve_timeout(key);

        tracing::debug!(instance, "Resolve requested");
        self.engine
            .resolve_instance(&instance)
            .map_err(ManagerError::from)
    }

    fn spawn_resolve_timeout(&self, key: ListenerKey) {
        let tables = self.tables.clone();
        let engine = self.engine.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(RESOLVE_TIMEOUT) => {
                    if let Some(entry) = tables.take_resolve(key) {
                        tracing::debug!(instance = %entry.instance, "Resolve timed out");
                        engine.stop_resolve_instance(&entry.instance);
                        entry.listener.handle_resolve_result(
                            ServiceInfo::default(),
                            ManagerError::ResolveTimeout.code(),
                        );
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    /// Coarse recovery from interface churn: restart the engine, then
    /// re-issue every live discovery so browsing continues on the new
    /// transport.
    pub fn restart(&self) -> Result<()> {
        tracing::info!("Restarting mDNS engine");
        self.engine.restart()?;
        for service_type in self.tables.active_discoveries() {
            let _ = self.engine.stop_discover(&service_type);
            if let Err(e) = self.engine.discover(&service_type) {
                tracing::warn!(service_type, error = %e, "Failed to re-issue discovery");
            }
        }
        Ok(())
    }

    /// Human-readable diagnostic snapshot.
    pub fn dump_message(&self) -> String {
        let config = self.engine.config();
        let mut message = String::from("mDNS Info:\n");
        message.push_str(&format!("\tIPv6 Support: {}\n", config.ipv6_support));
        message.push_str(&format!("\tAll Iface: {}\n", config.all_iface));
        message.push_str(&format!("\tTop Domain: {}\n", config.top_domain));
        message.push_str(&format!("\tHostname: {}\n", config.hostname));
        message.push_str(&format!(
            "\tService Count: {}\n",
            self.tables.registration_count()
        ));
        message.push_str(&format!(
            "\tDiscovery Count: {}\n",
            self.tables.discovery_count()
        ));
        message
    }

    /// Flush tables, stop the dispatcher and outstanding timeout tasks,
    /// and shut the engine down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.tables.clear();
        if let Err(e) = self.engine.shutdown() {
            tracing::warn!(error = %e, "Engine shutdown failed");
        }
        tracing::info!("mDNS manager shut down");
    }
}

fn spawn_dispatcher(
    engine: Arc<dyn ProtocolEngine>,
    tables: Arc<Tables>,
    cancel: CancellationToken,
) {
    let events = engine.events();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv_async() => match event {
                    Ok(event) => dispatch(&engine, &tables, event),
                    Err(_) => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
        tracing::debug!("Event dispatcher stopped");
    });
}

fn dispatch(engine: &Arc<dyn ProtocolEngine>, tables: &Tables, event: EngineEvent) {
    match event.kind {
        EventKind::ServiceStarted | EventKind::ServiceStopped => receive_register(tables, event),
        EventKind::ServiceFound | EventKind::ServiceLost => receive_discover(tables, event),
        EventKind::InstanceResolved => receive_instance_resolve(engine, tables, event),
        EventKind::DomainResolved => receive_resolve(engine, tables, event),
        EventKind::Unknown => {}
    }
}

/// Announcement lifecycle events route back to the registering caller.
/// The entry persists until explicit unregistration.
fn receive_register(tables: &Tables, event: EngineEvent) {
    let instance = instance_key(&event.record.name, &event.record.service_type);
    let Some(listener) = tables.registration_listener(&instance) else {
        tracing::debug!(instance, "Registration event without a registered caller");
        return;
    };
    let info = record_to_info(&event.record);
    let err = event.err;
    tokio::spawn(async move { listener.handle_register_result(info, err) });
}

/// Found/lost events fan out to every discoverer of the service type.
fn receive_discover(tables: &Tables, event: EngineEvent) {
    let listeners = tables.discoverers_of(&event.record.service_type);
    if listeners.is_empty() {
        return;
    }
    let info = record_to_info(&event.record);
    let found = event.kind == EventKind::ServiceFound;
    let err = event.err;
    tokio::spawn(async move {
        for listener in listeners {
            if found {
                listener.handle_service_found(info.clone(), err);
            } else {
                listener.handle_service_lost(info.clone(), err);
            }
        }
    });
}

/// First resolution phase. A record that names a host domain but carries
/// no address yet is parked and the domain handed back to the engine; the
/// answer joins up in `receive_resolve`. A record that already has its
/// address completes the resolve directly.
fn receive_instance_resolve(engine: &Arc<dyn ProtocolEngine>, tables: &Tables, event: EngineEvent) {
    let instance = instance_key(&event.record.name, &event.record.service_type);

    if event.record.addr.is_none() {
        if let Some(domain) = event.record.domain.clone() {
            tables.push_pending(PendingResolution {
                instance,
                record: event.record,
            });
            engine.resolve(&domain);
            return;
        }
    }

    let Some(entry) = tables.take_resolve_by_instance(&instance) else {
        return;
    };
    engine.stop_resolve_instance(&instance);
    if let Some(domain) = event.record.domain.as_deref() {
        engine.stop_resolve(domain);
    }
    let info = record_to_info(&event.record);
    let err = event.err;
    tokio::spawn(async move { entry.listener.handle_resolve_result(info, err) });
}

/// Second resolution phase. The domain string is the join key back to the
/// parked instance record; the resolve entry is then claimed through the
/// pending record's identity, not the event's.
fn receive_resolve(engine: &Arc<dyn ProtocolEngine>, tables: &Tables, event: EngineEvent) {
    let Some(domain) = event.record.domain.clone() else {
        return;
    };
    let Some((mut pending, entry)) = tables.claim_domain(&domain) else {
        tracing::debug!(domain, "Domain resolution without a pending instance");
        return;
    };
    pending.record.addr = event.record.addr.clone();
    pending.record.ipv6 = event.record.ipv6;

    engine.stop_resolve(&domain);
    let Some(entry) = entry else {
        // The timeout claimed the resolve entry first; nothing to notify.
        return;
    };
    engine.stop_resolve_instance(&pending.instance);
    let info = record_to_info(&pending.record);
    let err = event.err;
    tokio::spawn(async move { entry.listener.handle_resolve_result(info, err) });
}

#[cfg(test)]
mod tests {
    use super::engine::testing::MockEngine;
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Records every callback delivery with its payload and code.
    #[derive(Default)]
    struct Recorder {
        deliveries: Mutex<Vec<(&'static str, ServiceInfo, i32)>>,
    }

    impl Recorder {
        fn push(&self, kind: &'static str, info: ServiceInfo, err: i32) {
            self.deliveries.lock().unwrap().push((kind, info, err));
        }

        fn deliveries(&self) -> Vec<(&'static str, ServiceInfo, i32)> {
            self.deliveries.lock().unwrap().clone()
        }

        fn kinds(&self) -> Vec<&'static str> {
            self.deliveries().into_iter().map(|(k, _, _)| k).collect()
        }
    }

    impl RegistrationListener for Recorder {
        fn handle_register(&self, info: ServiceInfo, err: i32) {
            self.push("register", info, err);
        }
        fn handle_register_result(&self, info: ServiceInfo, err: i32) {
            self.push("register_result", info, err);
        }
        fn handle_unregister(&self, info: ServiceInfo, err: i32) {
            self.push("unregister", info, err);
        }
    }

    impl DiscoveryListener for Recorder {
        fn handle_start_discover(&self, info: ServiceInfo, err: i32) {
            self.push("start_discover", info, err);
        }
        fn handle_stop_discover(&self, info: ServiceInfo, err: i32) {
            self.push("stop_discover", info, err);
        }
        fn handle_service_found(&self, info: ServiceInfo, err: i32) {
            self.push("service_found", info, err);
        }
        fn handle_service_lost(&self, info: ServiceInfo, err: i32) {
            self.push("service_lost", info, err);
        }
    }

    impl ResolveListener for Recorder {
        fn handle_resolve_result(&self, info: ServiceInfo, err: i32) {
            self.push("resolve_result", info, err);
        }
    }

    #[derive(Default)]
    struct CountingWatcher {
        changes: Mutex<Vec<(&'static str, usize)>>,
    }

    impl DiscoveryWatcher for CountingWatcher {
        fn discoverer_added(&self, active: usize) {
            self.changes.lock().unwrap().push(("added", active));
        }
        fn discoverer_removed(&self, active: usize) {
            self.changes.lock().unwrap().push(("removed", active));
        }
    }

    fn printer() -> ServiceInfo {
        ServiceInfo {
            name: "printer".into(),
            service_type: "_ipp._tcp".into(),
            port: 631,
            ..Default::default()
        }
    }

    fn manager_over(engine: &Arc<MockEngine>) -> MdnsManager {
        MdnsManager::new(engine.clone())
    }

    /// Let detached delivery and dispatcher tasks run.
    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn register_delivers_accept_then_result() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());

        manager
            .register_service(&printer(), cb.clone())
            .expect("register");
        settle().await;

        let deliveries = cb.deliveries();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].0, "register");
        assert_eq!(deliveries[1].0, "register_result");
        assert_eq!(deliveries[0].1, printer());
        assert_eq!(deliveries[0].2, ERR_NONE);
        assert_eq!(manager.tables.registration_count(), 1);
        assert_eq!(engine.calls(), vec!["register printer._ipp._tcp"]);
    }

    #[tokio::test]
    async fn duplicate_register_is_rejected_and_table_keeps_one_entry() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());

        manager
            .register_service(&printer(), cb.clone())
            .expect("first register");
        let second = manager.register_service(&printer(), cb.clone());
        assert!(matches!(second, Err(ManagerError::CallbackDuplicated)));
        assert_eq!(manager.tables.registration_count(), 1);

        settle().await;
        // Only the first call notifies; the rejected one stays silent.
        assert_eq!(cb.deliveries().len(), 2);
    }

    #[tokio::test]
    async fn register_engine_failure_still_notifies_with_code() {
        let engine = Arc::new(MockEngine::failing());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());

        let status = manager.register_service(&printer(), cb.clone());
        assert!(matches!(status, Err(ManagerError::Engine(_))));
        settle().await;

        let deliveries = cb.deliveries();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].2, ManagerError::Engine(EngineError::Daemon(String::new())).code());
        assert_eq!(deliveries[1].2, deliveries[0].2);
    }

    #[tokio::test]
    async fn unregister_unknown_callback_reports_not_found_with_empty_info() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());

        let status = manager.unregister_service(cb.clone());
        assert!(matches!(status, Err(ManagerError::CallbackNotFound)));
        settle().await;

        let deliveries = cb.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, "unregister");
        assert_eq!(deliveries[0].1, ServiceInfo::default());
        assert_eq!(deliveries[0].2, ManagerError::CallbackNotFound.code());
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn unregister_removes_entry_and_reports_identity() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());

        manager
            .register_service(&printer(), cb.clone())
            .expect("register");
        manager.unregister_service(cb.clone()).expect("unregister");
        settle().await;

        assert_eq!(manager.tables.registration_count(), 0);
        let deliveries = cb.deliveries();
        let unregister = deliveries.last().unwrap();
        assert_eq!(unregister.0, "unregister");
        assert_eq!(unregister.1.name, "printer");
        assert_eq!(unregister.1.service_type, "_ipp._tcp");
        assert!(engine
            .calls()
            .contains(&"unregister printer._ipp._tcp".to_string()));
    }

    #[tokio::test]
    async fn discover_rejects_invalid_type() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());

        let status = manager.start_discover_service("ipp", cb);
        assert!(matches!(status, Err(ManagerError::IllegalArgument)));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn found_event_fans_out_to_every_discoverer_of_the_type() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let listeners: Vec<Arc<Recorder>> = (0..3).map(|_| Arc::new(Recorder::default())).collect();
        for cb in &listeners {
            manager
                .start_discover_service("_ipp._tcp", cb.clone())
                .expect("discover");
        }
        let other = Arc::new(Recorder::default());
        manager
            .start_discover_service("_http._tcp", other.clone())
            .expect("discover");
        settle().await;

        engine
            .event_tx
            .send(EngineEvent {
                kind: EventKind::ServiceFound,
                record: EngineRecord {
                    name: "printer".into(),
                    service_type: "_ipp._tcp".into(),
                    ..Default::default()
                },
                err: ERR_NONE,
            })
            .unwrap();
        settle().await;

        for cb in &listeners {
            assert!(cb.kinds().contains(&"service_found"), "missed a discoverer");
        }
        assert!(!other.kinds().contains(&"service_found"));
    }

    #[tokio::test]
    async fn lost_event_routes_as_service_lost() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());
        manager
            .start_discover_service("_ipp._tcp", cb.clone())
            .expect("discover");

        engine
            .event_tx
            .send(EngineEvent {
                kind: EventKind::ServiceLost,
                record: EngineRecord {
                    name: "printer".into(),
                    service_type: "_ipp._tcp".into(),
                    ..Default::default()
                },
                err: ERR_NONE,
            })
            .unwrap();
        settle().await;

        assert!(cb.kinds().contains(&"service_lost"));
    }

    #[tokio::test]
    async fn stop_discover_notifies_watcher_and_engine() {
        let engine = Arc::new(MockEngine::new());
        let watcher = Arc::new(CountingWatcher::default());
        let manager = MdnsManager::with_hooks(
            engine.clone(),
            watcher.clone(),
            CancellationToken::new(),
        );
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());

        manager
            .start_discover_service("_ipp._tcp", a.clone())
            .expect("discover");
        manager
            .start_discover_service("_ipp._tcp", b.clone())
            .expect("discover");
        manager.stop_discover_service(a.clone()).expect("stop");
        settle().await;

        assert_eq!(
            watcher.changes.lock().unwrap().clone(),
            vec![("added", 1), ("added", 2), ("removed", 1)]
        );
        assert!(engine.calls().contains(&"stop_discover _ipp._tcp".to_string()));
        assert!(a.kinds().contains(&"stop_discover"));
    }

    #[tokio::test]
    async fn stop_discover_unknown_callback_reports_not_found() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());

        let status = manager.stop_discover_service(cb.clone());
        assert!(matches!(status, Err(ManagerError::CallbackNotFound)));
        settle().await;
        assert_eq!(cb.deliveries()[0].2, ManagerError::CallbackNotFound.code());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_resolve_times_out_exactly_once() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());

        manager
            .resolve_service(&printer(), cb.clone())
            .expect("resolve");
        tokio::time::sleep(Duration::from_millis(5100)).await;
        settle().await;

        let deliveries = cb.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, "resolve_result");
        assert_eq!(deliveries[0].1, ServiceInfo::default());
        assert_eq!(deliveries[0].2, ManagerError::ResolveTimeout.code());
        assert!(engine
            .calls()
            .contains(&"stop_resolve_instance printer._ipp._tcp".to_string()));

        // The entry is gone; a late event is a no-op.
        engine
            .event_tx
            .send(EngineEvent {
                kind: EventKind::InstanceResolved,
                record: EngineRecord {
                    name: "printer".into(),
                    service_type: "_ipp._tcp".into(),
                    addr: Some("10.0.0.5".into()),
                    ..Default::default()
                },
                err: ERR_NONE,
            })
            .unwrap();
        settle().await;
        assert_eq!(cb.deliveries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn answered_resolve_beats_the_timeout() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());

        manager
            .resolve_service(&printer(), cb.clone())
            .expect("resolve");
        settle().await;

        engine
            .event_tx
            .send(EngineEvent {
                kind: EventKind::InstanceResolved,
                record: EngineRecord {
                    name: "printer".into(),
                    service_type: "_ipp._tcp".into(),
                    port: 631,
                    addr: Some("10.0.0.5".into()),
                    ..Default::default()
                },
                err: ERR_NONE,
            })
            .unwrap();
        settle().await;

        let deliveries = cb.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].1.addr.as_deref(), Some("10.0.0.5"));
        assert_eq!(deliveries[0].1.family, Some(crate::protocol::IpFamily::Ipv4));

        // Timeout fires later, finds nothing, stays silent.
        tokio::time::sleep(Duration::from_millis(6000)).await;
        settle().await;
        assert_eq!(cb.deliveries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn two_phase_resolve_joins_on_the_domain() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());
        let mut txt = BTreeMap::new();
        txt.insert("path".to_string(), "/print".to_string());

        manager
            .resolve_service(&printer(), cb.clone())
            .expect("resolve");
        settle().await;

        // Phase one: the service record points at a host, no address yet.
        engine
            .event_tx
            .send(EngineEvent {
                kind: EventKind::InstanceResolved,
                record: EngineRecord {
                    name: "printer".into(),
                    service_type: "_ipp._tcp".into(),
                    port: 631,
                    domain: Some("host.local.".into()),
                    txt: txt.clone(),
                    ..Default::default()
                },
                err: ERR_NONE,
            })
            .unwrap();
        settle().await;

        assert!(cb.deliveries().is_empty());
        assert!(engine.calls().contains(&"resolve host.local.".to_string()));
        assert_eq!(manager.tables.pending_count(), 1);

        // Phase two: the host record brings the address.
        engine
            .event_tx
            .send(EngineEvent {
                kind: EventKind::DomainResolved,
                record: EngineRecord {
                    domain: Some("host.local.".into()),
                    addr: Some("10.0.0.5".into()),
                    ipv6: false,
                    ..Default::default()
                },
                err: ERR_NONE,
            })
            .unwrap();
        settle().await;

        let deliveries = cb.deliveries();
        assert_eq!(deliveries.len(), 1);
        let info = &deliveries[0].1;
        assert_eq!(info.name, "printer");
        assert_eq!(info.port, 631);
        assert_eq!(info.addr.as_deref(), Some("10.0.0.5"));
        assert_eq!(info.family, Some(crate::protocol::IpFamily::Ipv4));
        assert_eq!(info.txt, txt);
        assert_eq!(manager.tables.pending_count(), 0);

        let calls = engine.calls();
        assert!(calls.contains(&"stop_resolve host.local.".to_string()));
        assert!(calls.contains(&"stop_resolve_instance printer._ipp._tcp".to_string()));
    }

    #[tokio::test]
    async fn duplicate_resolve_from_same_handle_is_rejected() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());

        manager
            .resolve_service(&printer(), cb.clone())
            .expect("resolve");
        let second = manager.resolve_service(&printer(), cb.clone());
        assert!(matches!(second, Err(ManagerError::CallbackDuplicated)));
    }

    #[tokio::test]
    async fn announcement_event_routes_to_registering_caller() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());

        manager
            .register_service(&printer(), cb.clone())
            .expect("register");
        settle().await;

        engine
            .event_tx
            .send(EngineEvent {
                kind: EventKind::ServiceStarted,
                record: EngineRecord {
                    name: "printer".into(),
                    service_type: "_ipp._tcp".into(),
                    port: 631,
                    ..Default::default()
                },
                err: ERR_NONE,
            })
            .unwrap();
        settle().await;

        let kinds = cb.kinds();
        assert_eq!(
            kinds,
            vec!["register", "register_result", "register_result"]
        );
        // The entry persists until explicit unregistration.
        assert_eq!(manager.tables.registration_count(), 1);
    }

    #[tokio::test]
    async fn unknown_event_kind_is_ignored() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());
        manager
            .register_service(&printer(), cb.clone())
            .expect("register");
        settle().await;

        engine
            .event_tx
            .send(EngineEvent {
                kind: EventKind::Unknown,
                record: EngineRecord::default(),
                err: ERR_NONE,
            })
            .unwrap();
        settle().await;

        assert_eq!(cb.deliveries().len(), 2);
        assert_eq!(manager.tables.registration_count(), 1);
    }

    #[tokio::test]
    async fn restart_reissues_every_live_discovery() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        manager
            .start_discover_service("_ipp._tcp", a.clone())
            .expect("discover");
        manager
            .start_discover_service("_http._tcp", b.clone())
            .expect("discover");

        manager.restart().expect("restart");

        let calls = engine.calls();
        assert!(calls.contains(&"restart".to_string()));
        let reissued = calls
            .iter()
            .filter(|c| c.starts_with("discover "))
            .count();
        assert_eq!(reissued, 4, "two initial plus two re-issued discoveries");
    }

    #[tokio::test]
    async fn dump_reports_config_and_counts() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());
        manager
            .register_service(&printer(), cb.clone())
            .expect("register");

        let dump = manager.dump_message();
        assert!(dump.starts_with("mDNS Info:\n"));
        assert!(dump.contains("\tIPv6 Support: true\n"));
        assert!(dump.contains("\tTop Domain: local.\n"));
        assert!(dump.contains("\tHostname: testhost.local.\n"));
        assert!(dump.contains("\tService Count: 1\n"));
        assert!(dump.contains("\tDiscovery Count: 0\n"));
    }

    #[tokio::test]
    async fn shutdown_flushes_tables() {
        let engine = Arc::new(MockEngine::new());
        let manager = manager_over(&engine);
        let cb = Arc::new(Recorder::default());
        manager
            .register_service(&printer(), cb.clone())
            .expect("register");

        manager.shutdown();
        assert_eq!(manager.tables.registration_count(), 0);
        assert!(engine.calls().contains(&"shutdown".to_string()));
    }
}
