use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::error::ErrorCode;
use super::ServiceInfo;

/// Which callback a pushed event line corresponds to.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Register,
    RegisterResult,
    Unregister,
    StartDiscover,
    StopDiscover,
    ServiceFound,
    ServiceLost,
    ResolveResult,
}

/// All possible outbound messages.
/// Custom Serialize ensures the correct JSON shape for each variant:
/// - Status: `{"status": 0}` (the synchronous result of a request)
/// - Event: `{"event": "kind", "service": {...}, "err": 0}` (a callback)
/// - Dump: `{"dump": "..."}`
/// - Error: `{"error": "code", "message": "..."}` (request never reached
///   the manager)
#[derive(Debug, Clone)]
pub enum Response {
    Status(i32),
    Event {
        event: EventKind,
        service: ServiceInfo,
        err: i32,
    },
    Dump(String),
    Error {
        error: ErrorCode,
        message: String,
    },
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Response::Status(status) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("status", status)?;
                map.end()
            }
            Response::Event {
                event,
                service,
                err,
            } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("event", event)?;
                map.serialize_entry("service", service)?;
                map.serialize_entry("err", err)?;
                map.end()
            }
            Response::Dump(text) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("dump", text)?;
                map.end()
            }
            Response::Error { error, message } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("error", error)?;
                map.serialize_entry("message", message)?;
                map.end()
            }
        }
    }
}
