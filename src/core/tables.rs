use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::engine::EngineRecord;
use super::listener::{DiscoveryListener, ListenerKey, RegistrationListener, ResolveListener};
use super::{ManagerError, Result};

pub(crate) struct RegistrationEntry {
    pub listener: Arc<dyn RegistrationListener>,
    pub instance: String,
}

pub(crate) struct DiscoveryEntry {
    pub listener: Arc<dyn DiscoveryListener>,
    pub service_type: String,
}

pub(crate) struct ResolveEntry {
    pub listener: Arc<dyn ResolveListener>,
    pub instance: String,
}

/// An instance resolution that produced a host domain but no address yet.
/// Completed by the matching domain resolution, joined on the domain
/// string. Never expires on its own; only the resolve entry is guarded by
/// the timeout. A domain that never resolves strands its record here.
/// TODO: decide whether stranded records should be purged on engine restart.
pub(crate) struct PendingResolution {
    pub instance: String,
    pub record: EngineRecord,
}

/// All correlation state of the manager: registrations, discoveries,
/// outstanding resolves and partial resolutions, behind one mutex. Every
/// lookup or mutation sequence holds the lock for its whole duration;
/// listener invocation always happens outside it.
#[derive(Default)]
pub(crate) struct Tables {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    registrations: HashMap<ListenerKey, RegistrationEntry>,
    discoveries: HashMap<ListenerKey, DiscoveryEntry>,
    resolves: HashMap<ListenerKey, ResolveEntry>,
    pending: Vec<PendingResolution>,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_registration(
        &self,
        key: ListenerKey,
        listener: Arc<dyn RegistrationListener>,
        instance: String,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.registrations.contains_key(&key) {
            return Err(ManagerError::CallbackDuplicated);
        }
        inner
            .registrations
            .insert(key, RegistrationEntry { listener, instance });
        Ok(())
    }

    /// Remove and return a registration. Whichever caller takes the entry
    /// owns the follow-up engine call and notification.
    pub fn take_registration(&self, key: ListenerKey) -> Option<RegistrationEntry> {
        self.inner.lock().unwrap().registrations.remove(&key)
    }

    /// Find the registration listener for an instance key. Registrations
    /// persist across protocol events, so this is a lookup, not a take.
    pub fn registration_listener(&self, instance: &str) -> Option<Arc<dyn RegistrationListener>> {
        let inner = self.inner.lock().unwrap();
        inner
            .registrations
            .values()
            .find(|entry| entry.instance == instance)
            .map(|entry| entry.listener.clone())
    }

    pub fn registration_count(&self) -> usize {
        self.inner.lock().unwrap().registrations.len()
    }

    /// Insert a discovery entry; returns the active discoverer count after
    /// the insert, for the host-layer watcher.
    pub fn insert_discovery(
        &self,
        key: ListenerKey,
        listener: Arc<dyn DiscoveryListener>,
        service_type: String,
    ) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        if inner.discoveries.contains_key(&key) {
            return Err(ManagerError::CallbackDuplicated);
        }
        inner.discoveries.insert(
            key,
            DiscoveryEntry {
                listener,
                service_type,
            },
        );
        Ok(inner.discoveries.len())
    }

    /// Remove a discovery entry; returns it with the remaining count.
    pub fn take_discovery(&self, key: ListenerKey) -> Option<(DiscoveryEntry, usize)> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.discoveries.remove(&key)?;
        let remaining = inner.discoveries.len();
        Some((entry, remaining))
    }

    /// Every discovery listener browsing the given type. One found or lost
    /// event fans out to all of them.
    pub fn discoverers_of(&self, service_type: &str) -> Vec<Arc<dyn DiscoveryListener>> {
        let inner = self.inner.lock().unwrap();
        inner
            .discoveries
            .values()
            .filter(|entry| entry.service_type == service_type)
            .map(|entry| entry.listener.clone())
            .collect()
    }

    pub fn discovery_count(&self) -> usize {
        self.inner.lock().unwrap().discoveries.len()
    }

    /// Snapshot of the browsed types of all active discoveries, one per
    /// entry, for re-issuing after an engine restart.
    pub fn active_discoveries(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .discoveries
            .values()
            .map(|entry| entry.service_type.clone())
            .collect()
    }

    pub fn insert_resolve(
        &self,
        key: ListenerKey,
        listener: Arc<dyn ResolveListener>,
        instance: String,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.resolves.contains_key(&key) {
            return Err(ManagerError::CallbackDuplicated);
        }
        inner
            .resolves
            .insert(key, ResolveEntry { listener, instance });
        Ok(())
    }

    /// Atomically claim a resolve entry by handle. The timeout task and
    /// the event path race on this; only the winner notifies the caller.
    pub fn take_resolve(&self, key: ListenerKey) -> Option<ResolveEntry> {
        self.inner.lock().unwrap().resolves.remove(&key)
    }

    /// Atomically claim a resolve entry by instance key, for the event
    /// dispatch path.
    pub fn take_resolve_by_instance(&self, instance: &str) -> Option<ResolveEntry> {
        let mut inner = self.inner.lock().unwrap();
        let key = inner
            .resolves
            .iter()
            .find(|(_, entry)| entry.instance == instance)
            .map(|(key, _)| *key)?;
        inner.resolves.remove(&key)
    }

    pub fn push_pending(&self, pending: PendingResolution) {
        self.inner.lock().unwrap().pending.push(pending);
    }

    /// Claim the partial resolution joined on the given domain together
    /// with its resolve entry, in one locked step. The entry may already
    /// be gone if the timeout won the race.
    pub fn claim_domain(&self, domain: &str) -> Option<(PendingResolution, Option<ResolveEntry>)> {
        let mut inner = self.inner.lock().unwrap();
        let pos = inner
            .pending
            .iter()
            .position(|p| p.record.domain.as_deref() == Some(domain))?;
        let pending = inner.pending.remove(pos);
        let key = inner
            .resolves
            .iter()
            .find(|(_, entry)| entry.instance == pending.instance)
            .map(|(key, _)| *key);
        let entry = key.and_then(|key| inner.resolves.remove(&key));
        Some((pending, entry))
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    /// Drop all correlation state. Part of manager teardown.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.registrations.clear();
        inner.discoveries.clear();
        inner.resolves.clear();
        inner.pending.clear();
    }
}
