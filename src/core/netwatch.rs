use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::MdnsManager;

/// Address lifecycle of a local network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceEvent {
    AddressAdded { iface: String, addr: String },
    AddressRemoved { iface: String, addr: String },
}

/// Grace period after an address appears before the engine is restarted,
/// letting the interface finish coming up.
const RESTART_SETTLE: Duration = Duration::from_millis(1000);

/// How often the address poller samples the host.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// React to interface churn: a new address on a non-P2P interface means
/// the multicast transport may be stale, so after a settle delay the
/// whole engine is restarted. Address removals are observed but need no
/// action. P2P interfaces churn on their own and are ignored.
pub fn watch(
    manager: Arc<MdnsManager>,
    events: flume::Receiver<InterfaceEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv_async() => match event {
                    Ok(InterfaceEvent::AddressAdded { iface, addr }) => {
                        if iface.starts_with("p2p") {
                            tracing::debug!(iface, "Ignoring P2P interface address");
                            continue;
                        }
                        tracing::info!(iface, addr, "Interface address added");
                        tokio::time::sleep(RESTART_SETTLE).await;
                        if let Err(e) = manager.restart() {
                            tracing::warn!(error = %e, "Engine restart failed");
                        }
                    }
                    Ok(InterfaceEvent::AddressRemoved { iface, addr }) => {
                        tracing::debug!(iface, addr, "Interface address removed");
                    }
                    Err(_) => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
        tracing::debug!("Interface watcher stopped");
    })
}

/// Sample the host's interface addresses with `ip -o addr show` and emit
/// the differences between consecutive samples. The boot-time snapshot is
/// swallowed so startup state does not read as churn. Hosts without an
/// `ip` binary simply produce no events.
pub async fn poll_interfaces(tx: flume::Sender<InterfaceEvent>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    let mut seen: Option<HashSet<(String, String)>> = None;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let output = tokio::process::Command::new("ip")
                    .args(["-o", "addr", "show"])
                    .output()
                    .await;
                let stdout = match output {
                    Ok(out) if out.status.success() => {
                        String::from_utf8_lossy(&out.stdout).to_string()
                    }
                    _ => continue,
                };
                let current = parse_addr_lines(&stdout);
                if let Some(prev) = &seen {
                    for (iface, addr) in current.difference(prev) {
                        let _ = tx.send(InterfaceEvent::AddressAdded {
                            iface: iface.clone(),
                            addr: addr.clone(),
                        });
                    }
                    for (iface, addr) in prev.difference(&current) {
                        let _ = tx.send(InterfaceEvent::AddressRemoved {
                            iface: iface.clone(),
                            addr: addr.clone(),
                        });
                    }
                }
                seen = Some(current);
            }
            _ = cancel.cancelled() => break,
        }
    }
}

/// Parse `ip -o addr show` one-line-per-address output into
/// (interface, address) pairs.
fn parse_addr_lines(output: &str) -> HashSet<(String, String)> {
    let mut addrs = HashSet::new();
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let _index = fields.next();
        let (Some(iface), Some(family), Some(cidr)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if family != "inet" && family != "inet6" {
            continue;
        }
        let addr = cidr.split('/').next().unwrap_or(cidr);
        addrs.insert((iface.to_string(), addr.to_string()));
    }
    addrs
}
