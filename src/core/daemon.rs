use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use mdns_sd::{ServiceDaemon, ServiceEvent as MdnsEvent};

use crate::protocol::{instance_key, split_instance_key};

use super::engine::{EngineConfig, EngineError, EngineEvent, EngineRecord, EventKind, ProtocolEngine};

/// Top-level domain appended to every name on the wire.
const TOP_DOMAIN: &str = "local.";

/// Production protocol engine backed by mdns-sd.
/// This is the ONLY file that imports mdns_sd types.
///
/// mdns-sd resolves host records together with service records, so
/// instance-resolved events from this engine always carry their address
/// and the separate domain-resolution phase never triggers; `resolve` and
/// `stop_resolve` exist to satisfy the contract and log.
pub struct MdnsSdEngine {
    daemon: Mutex<ServiceDaemon>,
    event_tx: flume::Sender<EngineEvent>,
    event_rx: flume::Receiver<EngineEvent>,
    /// Registered services, kept for re-announcement after a restart.
    registered: Mutex<HashMap<String, EngineRecord>>,
    /// Types with an active caller discovery.
    browsing: Arc<Mutex<HashSet<String>>>,
    /// Instances with a resolve in flight.
    resolving: Arc<Mutex<HashSet<String>>>,
    /// Per-type count of resolve-owned browses, so overlapping resolves
    /// and discoveries do not tear down each other's browse.
    resolve_browses: Mutex<HashMap<String, usize>>,
    hostname: String,
}

impl MdnsSdEngine {
    pub fn new() -> Result<Self, EngineError> {
        let daemon = ServiceDaemon::new().map_err(|e| EngineError::Daemon(e.to_string()))?;
        let (event_tx, event_rx) = flume::unbounded();
        let hostname = hostname::get()
            .unwrap_or_else(|_| "localhost".into())
            .to_string_lossy()
            .to_string();
        Ok(Self {
            daemon: Mutex::new(daemon),
            event_tx,
            event_rx,
            registered: Mutex::new(HashMap::new()),
            browsing: Arc::new(Mutex::new(HashSet::new())),
            resolving: Arc::new(Mutex::new(HashSet::new())),
            resolve_browses: Mutex::new(HashMap::new()),
            hostname,
        })
    }

    fn daemon(&self) -> ServiceDaemon {
        self.daemon.lock().unwrap().clone()
    }

    fn host_domain(&self) -> String {
        format!("{}.{TOP_DOMAIN}", self.hostname)
    }

    fn register_with_daemon(&self, record: &EngineRecord) -> Result<(), EngineError> {
        let properties: Vec<(&str, &str)> = record
            .txt
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let info = mdns_sd::ServiceInfo::new(
            &decorated(&record.service_type),
            &record.name,
            &self.host_domain(),
            "",
            record.port,
            &properties[..],
        )
        .map_err(|e| EngineError::Daemon(e.to_string()))?
        .enable_addr_auto();

        self.daemon()
            .register(info)
            .map_err(|e| EngineError::Daemon(e.to_string()))
    }

    /// Pump one browse receiver into the engine event channel. The task
    /// ends when the underlying search stops.
    fn spawn_bridge(&self, receiver: mdns_sd::Receiver<MdnsEvent>) {
        let event_tx = self.event_tx.clone();
        let browsing = self.browsing.clone();
        let resolving = self.resolving.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv_async().await {
                    Ok(MdnsEvent::ServiceResolved(info)) => {
                        let record = resolved_record(&info);
                        let instance = instance_key(&record.name, &record.service_type);
                        if resolving.lock().unwrap().contains(&instance) {
                            let _ = event_tx.send(EngineEvent {
                                kind: EventKind::InstanceResolved,
                                record: record.clone(),
                                err: 0,
                            });
                        }
                        if browsing.lock().unwrap().contains(&record.service_type) {
                            let _ = event_tx.send(EngineEvent {
                                kind: EventKind::ServiceFound,
                                record,
                                err: 0,
                            });
                        }
                    }
                    Ok(MdnsEvent::ServiceRemoved(ty, fullname)) => {
                        let (name, _) = split_instance_key(&undotted(&fullname));
                        let record = EngineRecord {
                            name,
                            service_type: undotted(&ty),
                            ..Default::default()
                        };
                        let _ = event_tx.send(EngineEvent {
                            kind: EventKind::ServiceLost,
                            record,
                            err: 0,
                        });
                    }
                    // Bare found events carry no details yet; the
                    // resolved event follows and is the one surfaced.
                    Ok(MdnsEvent::ServiceFound(_, fullname)) => {
                        tracing::trace!(fullname, "Service found, awaiting resolution");
                    }
                    Ok(MdnsEvent::SearchStarted(_)) => {}
                    Ok(MdnsEvent::SearchStopped(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
    }

    fn browse_type(&self, service_type: &str) -> Result<(), EngineError> {
        let receiver = self
            .daemon()
            .browse(&decorated(service_type))
            .map_err(|e| EngineError::Daemon(e.to_string()))?;
        self.spawn_bridge(receiver);
        Ok(())
    }

    fn stop_browse_type(&self, service_type: &str) {
        if let Err(e) = self.daemon().stop_browse(&decorated(service_type)) {
            tracing::debug!(service_type, error = %e, "Failed to stop browse");
        }
    }
}

impl ProtocolEngine for MdnsSdEngine {
    fn register(&self, record: EngineRecord) -> Result<(), EngineError> {
        self.register_with_daemon(&record)?;
        let instance = instance_key(&record.name, &record.service_type);
        self.registered
            .lock()
            .unwrap()
            .insert(instance, record.clone());
        // Announcement has begun; report the lifecycle event upward.
        let _ = self.event_tx.send(EngineEvent {
            kind: EventKind::ServiceStarted,
            record,
            err: 0,
        });
        Ok(())
    }

    fn unregister(&self, instance: &str) -> Result<(), EngineError> {
        let record = self.registered.lock().unwrap().remove(instance);
        let _ = self
            .daemon()
            .unregister(&decorated(instance))
            .map_err(|e| EngineError::Daemon(e.to_string()))?;
        let (name, service_type) = split_instance_key(instance);
        let _ = self.event_tx.send(EngineEvent {
            kind: EventKind::ServiceStopped,
            record: record.unwrap_or_else(|| EngineRecord {
                name,
                service_type,
                ..Default::default()
            }),
            err: 0,
        });
        Ok(())
    }

    fn discover(&self, service_type: &str) -> Result<(), EngineError> {
        let newly_browsed = self
            .browsing
            .lock()
            .unwrap()
            .insert(service_type.to_string());
        if newly_browsed {
            self.browse_type(service_type)?;
        }
        Ok(())
    }

    fn stop_discover(&self, service_type: &str) -> Result<(), EngineError> {
        self.browsing.lock().unwrap().remove(service_type);
        let resolve_owned = self
            .resolve_browses
            .lock()
            .unwrap()
            .get(service_type)
            .copied()
            .unwrap_or(0);
        if resolve_owned == 0 {
            self.stop_browse_type(service_type);
        }
        Ok(())
    }

    fn resolve_instance(&self, instance: &str) -> Result<(), EngineError> {
        let (_, service_type) = split_instance_key(instance);
        self.resolving.lock().unwrap().insert(instance.to_string());

        let mut owned = self.resolve_browses.lock().unwrap();
        let count = owned.entry(service_type.clone()).or_insert(0);
        *count += 1;
        let first = *count == 1;
        drop(owned);

        if first && !self.browsing.lock().unwrap().contains(&service_type) {
            self.browse_type(&service_type)?;
        }
        Ok(())
    }

    fn stop_resolve_instance(&self, instance: &str) {
        let (_, service_type) = split_instance_key(instance);
        self.resolving.lock().unwrap().remove(instance);

        let mut owned = self.resolve_browses.lock().unwrap();
        let remaining = match owned.get_mut(&service_type) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };
        if remaining == 0 {
            owned.remove(&service_type);
        }
        drop(owned);

        if remaining == 0 && !self.browsing.lock().unwrap().contains(&service_type) {
            self.stop_browse_type(&service_type);
        }
    }

    fn resolve(&self, domain: &str) {
        tracing::debug!(domain, "Host resolution handled inline by mdns-sd");
    }

    fn stop_resolve(&self, domain: &str) {
        tracing::trace!(domain, "No separate host resolution to stop");
    }

    fn events(&self) -> flume::Receiver<EngineEvent> {
        self.event_rx.clone()
    }

    fn config(&self) -> EngineConfig {
        EngineConfig {
            ipv6_support: true,
            all_iface: true,
            top_domain: TOP_DOMAIN.to_string(),
            hostname: self.host_domain(),
        }
    }

    fn restart(&self) -> Result<(), EngineError> {
        let fresh = ServiceDaemon::new().map_err(|e| EngineError::Daemon(e.to_string()))?;
        let old = std::mem::replace(&mut *self.daemon.lock().unwrap(), fresh);
        if let Err(e) = old.shutdown() {
            tracing::debug!(error = %e, "Old daemon shutdown failed");
        }

        // Re-announce everything we were advertising; browses are
        // re-issued by the manager.
        let records: Vec<EngineRecord> =
            self.registered.lock().unwrap().values().cloned().collect();
        for record in &records {
            if let Err(e) = self.register_with_daemon(record) {
                tracing::warn!(name = %record.name, error = %e, "Re-announcement failed");
            }
        }
        tracing::info!(services = records.len(), "mDNS engine restarted");
        Ok(())
    }

    fn shutdown(&self) -> Result<(), EngineError> {
        let _ = self
            .daemon()
            .shutdown()
            .map_err(|e| EngineError::Daemon(e.to_string()))?;
        Ok(())
    }
}

/// Append the top-level domain, e.g. "printer._ipp._tcp" ->
/// "printer._ipp._tcp.local.".
fn decorated(name: &str) -> String {
    format!("{name}.{TOP_DOMAIN}")
}

/// Strip the top-level domain off a wire name.
fn undotted(name: &str) -> String {
    name.trim_end_matches('.')
        .trim_end_matches(".local")
        .to_string()
}

/// Convert an mdns-sd resolution into an engine record. This is the ONE
/// place this conversion happens. Prefers the first IPv4 address, falls
/// back to the first IPv6.
fn resolved_record(info: &mdns_sd::ServiceInfo) -> EngineRecord {
    let fullname = info.get_fullname();
    let name = fullname
        .find("._")
        .map(|i| &fullname[..i])
        .unwrap_or(fullname)
        .to_string();

    let addresses = info.get_addresses();
    let picked = addresses
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addresses.iter().next())
        .copied();
    let (addr, ipv6) = match picked {
        Some(ip) => (Some(ip.to_string()), ip.is_ipv6()),
        None => (None, false),
    };

    let txt = info
        .get_properties()
        .iter()
        .map(|p| (p.key().to_string(), p.val_str().to_string()))
        .collect();

    EngineRecord {
        name,
        service_type: undotted(info.get_type()),
        domain: Some(info.get_hostname().to_string()),
        port: info.get_port(),
        ipv6,
        addr,
        txt,
    }
}
