use std::sync::Arc;

use crate::protocol::ServiceInfo;

/// Identity of a caller-held callback object. The manager tracks handles
/// for equality and lookup only and never controls their lifetime, so the
/// key is the pointer identity of the shared handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(usize);

impl ListenerKey {
    pub fn of<T: ?Sized>(listener: &Arc<T>) -> Self {
        ListenerKey(Arc::as_ptr(listener) as *const () as usize)
    }
}

/// Callbacks for a registration caller. Every delivery carries the error
/// code, so an invocation does not imply success.
pub trait RegistrationListener: Send + Sync {
    fn handle_register(&self, info: ServiceInfo, err: i32);
    fn handle_register_result(&self, info: ServiceInfo, err: i32);
    fn handle_unregister(&self, info: ServiceInfo, err: i32);
}

/// Callbacks for a discovery caller.
pub trait DiscoveryListener: Send + Sync {
    fn handle_start_discover(&self, info: ServiceInfo, err: i32);
    fn handle_stop_discover(&self, info: ServiceInfo, err: i32);
    fn handle_service_found(&self, info: ServiceInfo, err: i32);
    fn handle_service_lost(&self, info: ServiceInfo, err: i32);
}

/// Callback for a resolve caller. Fires exactly once per request, with
/// either the merged result or a timeout code.
pub trait ResolveListener: Send + Sync {
    fn handle_resolve_result(&self, info: ServiceInfo, err: i32);
}

/// Host-layer hook observing the discovery caller population. The hosting
/// service uses the remaining count to decide when it may unload itself;
/// the manager only reports.
pub trait DiscoveryWatcher: Send + Sync {
    fn discoverer_added(&self, active: usize);
    fn discoverer_removed(&self, active: usize);
}

/// Default watcher for hosts without an unload policy.
pub struct NoopWatcher;

impl DiscoveryWatcher for NoopWatcher {
    fn discoverer_added(&self, _active: usize) {}
    fn discoverer_removed(&self, _active: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quiet;

    impl ResolveListener for Quiet {
        fn handle_resolve_result(&self, _info: ServiceInfo, _err: i32) {}
    }

    #[test]
    fn listener_key_tracks_handle_identity() {
        let a: Arc<dyn ResolveListener> = Arc::new(Quiet);
        let b: Arc<dyn ResolveListener> = Arc::new(Quiet);
        assert_eq!(ListenerKey::of(&a), ListenerKey::of(&a.clone()));
        assert_ne!(ListenerKey::of(&a), ListenerKey::of(&b));
    }
}
