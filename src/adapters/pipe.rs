use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::{
    DiscoveryListener, ManagerError, MdnsManager, RegistrationListener, ResolveListener, ERR_NONE,
};
use crate::protocol::error::ErrorCode;
use crate::protocol::request::Request;
use crate::protocol::response::{EventKind, Response};
use crate::protocol::{is_type_valid, ServiceInfo};

/// Length of generated session IDs.
const SESSION_ID_LEN: usize = 8;

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()[..SESSION_ID_LEN].to_string()
}

/// Start the IPC adapter: line-delimited JSON over a Unix domain socket.
/// Each connection is one session; when it drops, everything the client
/// registered or browsed is cleaned up, the same contract a dead caller
/// gets from a binder-style death notification.
#[cfg(unix)]
pub async fn start(
    manager: Arc<MdnsManager>,
    path: std::path::PathBuf,
    cancel: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    // Remove stale socket file
    let _ = std::fs::remove_file(&path);

    let listener = tokio::net::UnixListener::bind(&path)?;
    tracing::info!(path = %path.display(), "IPC adapter listening");

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, _addr) = result?;
                let manager = manager.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(manager, stream).await {
                        tracing::warn!(error = %e, "IPC connection error");
                    }
                });
            }
            _ = cancel.cancelled() => break,
        }
    }
    tracing::debug!("IPC adapter stopped");
    Ok(())
}

#[cfg(unix)]
async fn handle_connection(
    manager: Arc<MdnsManager>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let (reader, mut writer) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Response>();

    // All outbound lines funnel through one writer task, so callback
    // deliveries and request statuses never interleave mid-line.
    tokio::spawn(async move {
        while let Some(resp) = out_rx.recv().await {
            let Ok(line) = serde_json::to_string(&resp) else {
                continue;
            };
            if writer.write_all(line.as_bytes()).await.is_err()
                || writer.write_all(b"\n").await.is_err()
                || writer.flush().await.is_err()
            {
                break;
            }
        }
    });

    let mut session = Session::new(new_session_id(), out_tx);
    tracing::debug!(session = %session.id, "Client connected");

    let reader = BufReader::new(reader);
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        handle_line(&manager, &mut session, line);
    }

    tracing::debug!(session = %session.id, "Client disconnected");
    session.close(&manager);
    Ok(())
}

/// Pushes callback deliveries to the client as event lines. One instance
/// per logical callback, so the manager's per-handle bookkeeping sees
/// each registration, discovery and resolve as its own caller.
struct PushListener {
    out: mpsc::UnboundedSender<Response>,
}

impl PushListener {
    fn push(&self, event: EventKind, service: ServiceInfo, err: i32) {
        let _ = self.out.send(Response::Event {
            event,
            service,
            err,
        });
    }
}

impl RegistrationListener for PushListener {
    fn handle_register(&self, info: ServiceInfo, err: i32) {
        self.push(EventKind::Register, info, err);
    }
    fn handle_register_result(&self, info: ServiceInfo, err: i32) {
        self.push(EventKind::RegisterResult, info, err);
    }
    fn handle_unregister(&self, info: ServiceInfo, err: i32) {
        self.push(EventKind::Unregister, info, err);
    }
}

impl DiscoveryListener for PushListener {
    fn handle_start_discover(&self, info: ServiceInfo, err: i32) {
        self.push(EventKind::StartDiscover, info, err);
    }
    fn handle_stop_discover(&self, info: ServiceInfo, err: i32) {
        self.push(EventKind::StopDiscover, info, err);
    }
    fn handle_service_found(&self, info: ServiceInfo, err: i32) {
        self.push(EventKind::ServiceFound, info, err);
    }
    fn handle_service_lost(&self, info: ServiceInfo, err: i32) {
        self.push(EventKind::ServiceLost, info, err);
    }
}

impl ResolveListener for PushListener {
    fn handle_resolve_result(&self, info: ServiceInfo, err: i32) {
        self.push(EventKind::ResolveResult, info, err);
    }
}

/// Per-connection state: the listener handles this client holds with the
/// manager, keyed so follow-up unregister/stop requests find the same
/// handle they started with.
struct Session {
    id: String,
    out: mpsc::UnboundedSender<Response>,
    registered: HashMap<String, Arc<PushListener>>,
    discovering: HashMap<String, Arc<PushListener>>,
}

impl Session {
    fn new(id: String, out: mpsc::UnboundedSender<Response>) -> Self {
        Self {
            id,
            out,
            registered: HashMap::new(),
            discovering: HashMap::new(),
        }
    }

    fn send(&self, resp: Response) {
        let _ = self.out.send(resp);
    }

    fn fresh_listener(&self) -> Arc<PushListener> {
        Arc::new(PushListener {
            out: self.out.clone(),
        })
    }

    fn register(&mut self, manager: &MdnsManager, info: ServiceInfo) -> i32 {
        if info.name.is_empty() || !is_type_valid(&info.service_type) {
            return ManagerError::IllegalArgument.code();
        }
        let out = self.out.clone();
        let cb = self
            .registered
            .entry(info.instance_key())
            .or_insert_with(|| Arc::new(PushListener { out }))
            .clone();
        code(manager.register_service(&info, cb))
    }

    fn unregister(&mut self, manager: &MdnsManager, target: &ServiceInfo) -> i32 {
        let cb = self
            .registered
            .remove(&target.instance_key())
            // Unknown handle; the manager reports CallbackNotFound.
            .unwrap_or_else(|| self.fresh_listener());
        code(manager.unregister_service(cb))
    }

    fn discover(&mut self, manager: &MdnsManager, service_type: &str) -> i32 {
        if !is_type_valid(service_type) {
            return ManagerError::IllegalArgument.code();
        }
        let out = self.out.clone();
        let cb = self
            .discovering
            .entry(service_type.to_string())
            .or_insert_with(|| Arc::new(PushListener { out }))
            .clone();
        code(manager.start_discover_service(service_type, cb))
    }

    fn stop_discover(&mut self, manager: &MdnsManager, service_type: &str) -> i32 {
        let cb = self
            .discovering
            .remove(service_type)
            .unwrap_or_else(|| self.fresh_listener());
        code(manager.stop_discover_service(cb))
    }

    fn resolve(&mut self, manager: &MdnsManager, info: &ServiceInfo) -> i32 {
        if info.name.is_empty() || !is_type_valid(&info.service_type) {
            return ManagerError::IllegalArgument.code();
        }
        code(manager.resolve_service(info, self.fresh_listener()))
    }

    /// Death-recipient path: drop everything this client held.
    fn close(&mut self, manager: &MdnsManager) {
        for (service_type, cb) in self.discovering.drain() {
            tracing::debug!(session = %self.id, service_type, "Stopping discovery for dead client");
            let _ = manager.stop_discover_service(cb);
        }
        for (instance, cb) in self.registered.drain() {
            tracing::debug!(session = %self.id, instance, "Unregistering for dead client");
            let _ = manager.unregister_service(cb);
        }
    }
}

fn code(status: crate::core::Result<()>) -> i32 {
    match status {
        Ok(()) => ERR_NONE,
        Err(e) => e.code(),
    }
}

fn handle_line(manager: &MdnsManager, session: &mut Session, line: &str) {
    let request = match serde_json::from_str::<Request>(line) {
        Ok(r) => r,
        Err(e) => {
            session.send(Response::Error {
                error: ErrorCode::ParseError,
                message: format!("invalid JSON: {e}"),
            });
            return;
        }
    };

    let status = match request {
        Request::Register(info) => session.register(manager, info),
        Request::Unregister(target) => session.unregister(manager, &target),
        Request::Discover(service_type) => session.discover(manager, &service_type),
        Request::StopDiscover(service_type) => session.stop_discover(manager, &service_type),
        Request::Resolve(info) => session.resolve(manager, &info),
        Request::Dump {} => {
            session.send(Response::Dump(manager.dump_message()));
            return;
        }
    };
    session.send(Response::Status(status));
}
