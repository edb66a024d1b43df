use serde::Deserialize;

use super::ServiceInfo;

/// All possible inbound operations.
/// The top-level JSON key determines the variant.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    /// Advertise a service. Keyed per connection by its instance.
    Register(ServiceInfo),
    /// Withdraw a previously registered service by name and type.
    Unregister(ServiceInfo),
    /// Start browsing a service type.
    Discover(String),
    /// Stop browsing a service type.
    StopDiscover(String),
    /// Resolve a service instance to host and address.
    Resolve(ServiceInfo),
    /// Diagnostic snapshot of the manager.
    Dump {},
}
