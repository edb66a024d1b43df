pub mod error;
pub mod request;
pub mod response;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Address family of a resolved service address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    Ipv4,
    Ipv6,
}

/// A service instance as callers see it.
/// Used in register and resolve requests, and in every callback payload.
/// This is THE service representation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub service_type: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub txt: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub family: Option<IpFamily>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub domain: Option<String>,
}

impl ServiceInfo {
    /// The instance key uniquely naming this service across all tables.
    pub fn instance_key(&self) -> String {
        instance_key(&self.name, &self.service_type)
    }
}

/// Compose the instance key, e.g. ("printer", "_ipp._tcp") -> "printer._ipp._tcp".
pub fn instance_key(name: &str, service_type: &str) -> String {
    format!("{name}.{service_type}")
}

/// Split an instance key back into (name, type).
/// The type always starts with an underscore label, so the split point is
/// the first "._" boundary. Returns the whole key as the name if no type
/// part is present.
pub fn split_instance_key(key: &str) -> (String, String) {
    match key.find("._") {
        Some(i) => (key[..i].to_string(), key[i + 1..].to_string()),
        None => (key.to_string(), String::new()),
    }
}

/// Check a DNS-SD service type, e.g. "_ipp._tcp" or "_dns._udp".
/// Exactly two labels, both underscore-prefixed, protocol tcp or udp.
pub fn is_type_valid(service_type: &str) -> bool {
    let mut parts = service_type.split('.');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(name), Some(proto), None)
            if name.len() > 1
                && name.starts_with('_')
                && (proto == "_tcp" || proto == "_udp")
    )
}
