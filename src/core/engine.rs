use std::collections::BTreeMap;

use thiserror::Error;

/// Errors surfaced by a protocol engine call.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("mDNS engine error: {0}")]
    Daemon(String),
}

/// Engine-side view of the multicast stack, reported for diagnostics.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ipv6_support: bool,
    pub all_iface: bool,
    pub top_domain: String,
    pub hostname: String,
}

/// What kind of protocol event a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ServiceStarted,
    ServiceStopped,
    ServiceFound,
    ServiceLost,
    InstanceResolved,
    DomainResolved,
    Unknown,
}

/// One record emitted by the engine. Fields are filled as far as the
/// underlying protocol phase has produced them: a found service has no
/// address yet, an instance resolution may carry only the host domain.
#[derive(Debug, Clone, Default)]
pub struct EngineRecord {
    pub name: String,
    pub service_type: String,
    pub domain: Option<String>,
    pub port: u16,
    pub ipv6: bool,
    pub addr: Option<String>,
    pub txt: BTreeMap<String, String>,
}

/// A single engine event: the record, the event kind tagging it, and the
/// engine status code riding along (0 means success, passed through to
/// callers verbatim).
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub kind: EventKind,
    pub record: EngineRecord,
    pub err: i32,
}

/// Contract of the multicast protocol engine the manager drives.
///
/// Command methods return the engine's immediate status only; the actual
/// protocol work (probing, announcement, queries) completes asynchronously
/// and surfaces through the event channel. The channel is drained by a
/// single dispatcher task, so event delivery is serialized by contract.
pub trait ProtocolEngine: Send + Sync {
    fn register(&self, record: EngineRecord) -> Result<(), EngineError>;
    fn unregister(&self, instance: &str) -> Result<(), EngineError>;
    fn discover(&self, service_type: &str) -> Result<(), EngineError>;
    fn stop_discover(&self, service_type: &str) -> Result<(), EngineError>;
    fn resolve_instance(&self, instance: &str) -> Result<(), EngineError>;
    fn stop_resolve_instance(&self, instance: &str);
    fn resolve(&self, domain: &str);
    fn stop_resolve(&self, domain: &str);
    /// The event stream. Cloning the receiver is allowed but the manager
    /// installs exactly one dispatcher over it.
    fn events(&self) -> flume::Receiver<EngineEvent>;
    fn config(&self) -> EngineConfig;
    /// Tear down and re-create the underlying transport after interface
    /// churn. Registered services are re-announced by the engine; active
    /// discoveries are re-issued by the manager.
    fn restart(&self) -> Result<(), EngineError>;
    fn shutdown(&self) -> Result<(), EngineError>;
}
