//! xDS discovery types and resource payloads

pub mod types;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Label used for metrics covering a whole ADS exchange rather than one type
pub const ADS_LABEL: &str = "ADS";

/// Discovery type (the category of resource carried by a discovery response)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiscoveryType {
    /// Cluster Discovery Service
    Cluster,
    /// Endpoint Discovery Service
    Endpoint,
    /// Listener Discovery Service
    Listener,
    /// Route Discovery Service
    Route,
    /// Secret Discovery Service
    Secret,
}

/// Order in which a full update must be sent.
///
/// Clusters and listeners are advertised before the endpoints and routes
/// that reference them.
pub const RESPONSE_ORDER: [DiscoveryType; 5] = [
    DiscoveryType::Cluster,
    DiscoveryType::Endpoint,
    DiscoveryType::Listener,
    DiscoveryType::Route,
    DiscoveryType::Secret,
];

impl DiscoveryType {
    /// All discovery types in response order
    pub fn all() -> &'static [DiscoveryType] {
        &RESPONSE_ORDER
    }

    /// v3 type URL
    pub fn type_url(&self) -> &'static str {
        match self {
            DiscoveryType::Cluster => "type.googleapis.com/envoy.config.cluster.v3.Cluster",
            DiscoveryType::Endpoint => {
                "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment"
            }
            DiscoveryType::Listener => "type.googleapis.com/envoy.config.listener.v3.Listener",
            DiscoveryType::Route => "type.googleapis.com/envoy.config.route.v3.RouteConfiguration",
            DiscoveryType::Secret => {
                "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret"
            }
        }
    }

    /// Parse a type URL
    pub fn from_type_url(type_url: &str) -> Option<Self> {
        RESPONSE_ORDER
            .iter()
            .copied()
            .find(|t| t.type_url() == type_url)
    }

    /// Short service name (CDS, EDS, ...)
    pub fn short(&self) -> &'static str {
        match self {
            DiscoveryType::Cluster => "CDS",
            DiscoveryType::Endpoint => "EDS",
            DiscoveryType::Listener => "LDS",
            DiscoveryType::Route => "RDS",
            DiscoveryType::Secret => "SDS",
        }
    }

    /// Whether proxies subscribe to every resource of this type implicitly.
    ///
    /// Subscription and sent-resource tracking is not kept for wildcard types.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, DiscoveryType::Cluster | DiscoveryType::Listener)
    }
}

impl fmt::Display for DiscoveryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// Whether a batch covers every discovery type
pub fn is_full_update(batch: &[DiscoveryType]) -> bool {
    batch.len() == RESPONSE_ORDER.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_url_roundtrip() {
        for t in DiscoveryType::all() {
            assert_eq!(DiscoveryType::from_type_url(t.type_url()), Some(*t));
        }
        assert_eq!(DiscoveryType::from_type_url("type.googleapis.com/unknown"), None);
    }

    #[test]
    fn test_wildcard_types() {
        assert!(DiscoveryType::Cluster.is_wildcard());
        assert!(DiscoveryType::Listener.is_wildcard());
        assert!(!DiscoveryType::Endpoint.is_wildcard());
        assert!(!DiscoveryType::Route.is_wildcard());
        assert!(!DiscoveryType::Secret.is_wildcard());
    }

    #[test]
    fn test_response_order() {
        let shorts: Vec<&str> = RESPONSE_ORDER.iter().map(|t| t.short()).collect();
        assert_eq!(shorts, vec!["CDS", "EDS", "LDS", "RDS", "SDS"]);
        assert!(is_full_update(&RESPONSE_ORDER));
        assert!(!is_full_update(&[DiscoveryType::Endpoint]));
    }
}
