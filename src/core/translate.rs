use crate::protocol::{IpFamily, ServiceInfo};

use super::engine::EngineRecord;

/// Convert an engine record into the caller-facing service info.
/// Name, type, port and TXT attributes are copied verbatim; the address
/// family is set only when an address is actually present. Total, no
/// failure mode.
pub(crate) fn record_to_info(record: &EngineRecord) -> ServiceInfo {
    let family = match record.addr.as_deref() {
        Some(addr) if !addr.is_empty() => Some(if record.ipv6 {
            IpFamily::Ipv6
        } else {
            IpFamily::Ipv4
        }),
        _ => None,
    };
    ServiceInfo {
        name: record.name.clone(),
        service_type: record.service_type.clone(),
        port: record.port,
        txt: record.txt.clone(),
        addr: record.addr.clone(),
        family,
        domain: record.domain.clone(),
    }
}

/// Build the engine-side record for a registration request.
pub(crate) fn info_to_record(info: &ServiceInfo) -> EngineRecord {
    EngineRecord {
        name: info.name.clone(),
        service_type: info.service_type.clone(),
        port: info.port,
        txt: info.txt.clone(),
        ..Default::default()
    }
}
