//! xDS resource payloads
//!
//! Native Rust types for the resources a control plane hands to proxies.
//! Payloads travel in the wire envelope as JSON.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::AdsError;
use crate::proto::Any;
use crate::xds::DiscoveryType;

/// Locality - identifies where a service is running
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locality {
    pub region: String,
    pub zone: String,
    pub sub_zone: String,
}

impl Locality {
    pub fn new(region: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            zone: zone.into(),
            sub_zone: String::new(),
        }
    }
}

/// Health status for endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Draining,
}

/// A single upstream endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: SocketAddr,
    pub health_status: HealthStatus,
    /// Load balancing weight (1-128)
    pub weight: u32,
}

impl Endpoint {
    /// Create a new healthy endpoint
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            health_status: HealthStatus::Healthy,
            weight: 100,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.clamp(1, 128);
        self
    }
}

/// Endpoints for a specific locality
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalityEndpoints {
    pub locality: Locality,
    pub endpoints: Vec<Endpoint>,
    pub weight: u32,
}

/// Cluster load assignment - the endpoints of one cluster (EDS)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterLoadAssignment {
    pub cluster_name: String,
    pub endpoints: Vec<LocalityEndpoints>,
}

impl ClusterLoadAssignment {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            endpoints: Vec::new(),
        }
    }

    /// Add endpoints for a locality
    pub fn add_locality(&mut self, locality: Locality, endpoints: Vec<Endpoint>, weight: u32) {
        self.endpoints.push(LocalityEndpoints {
            locality,
            endpoints,
            weight,
        });
    }
}

/// How a cluster finds its endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClusterDiscovery {
    Static,
    StrictDns,
    #[default]
    Eds,
    OriginalDst,
}

/// Load balancing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LbPolicy {
    #[default]
    RoundRobin,
    LeastRequest,
    RingHash,
    Random,
}

/// Upstream cluster (CDS)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub discovery: ClusterDiscovery,
    pub lb_policy: LbPolicy,
    pub connect_timeout_ms: u64,
    /// Name of the SDS secret used for upstream TLS
    pub tls_secret: Option<String>,
}

impl Default for Cluster {
    fn default() -> Self {
        Self {
            name: String::new(),
            discovery: ClusterDiscovery::Eds,
            lb_policy: LbPolicy::RoundRobin,
            connect_timeout_ms: 5000,
            tls_secret: None,
        }
    }
}

impl Cluster {
    /// Create a cluster whose endpoints come from EDS
    pub fn new_eds(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Listener address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerAddress {
    pub address: String,
    pub port: u16,
}

impl Default for ListenerAddress {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 0,
        }
    }
}

/// Network filter of a filter chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkFilter {
    /// HTTP connection manager, fed by RDS
    HttpConnectionManager {
        route_config_name: String,
        stat_prefix: String,
    },
    /// Plain TCP proxy to a cluster
    TcpProxy { cluster: String, stat_prefix: String },
}

impl NetworkFilter {
    pub fn http_connection_manager(route_config_name: impl Into<String>) -> Self {
        NetworkFilter::HttpConnectionManager {
            route_config_name: route_config_name.into(),
            stat_prefix: "ingress_http".to_string(),
        }
    }

    pub fn tcp_proxy(cluster: impl Into<String>) -> Self {
        NetworkFilter::TcpProxy {
            cluster: cluster.into(),
            stat_prefix: "tcp_proxy".to_string(),
        }
    }
}

/// Filter chain of a listener
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterChain {
    pub name: String,
    pub filters: Vec<NetworkFilter>,
    /// Name of the SDS secret used for downstream TLS
    pub tls_secret: Option<String>,
}

/// Listener (LDS)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub name: String,
    pub address: ListenerAddress,
    pub filter_chains: Vec<FilterChain>,
}

impl Listener {
    pub fn new(name: impl Into<String>, address: ListenerAddress) -> Self {
        Self {
            name: name.into(),
            address,
            filter_chains: Vec::new(),
        }
    }

    pub fn with_filter_chain(mut self, chain: FilterChain) -> Self {
        self.filter_chains.push(chain);
        self
    }

    /// Route configurations referenced through HTTP connection managers
    pub fn route_config_names(&self) -> impl Iterator<Item = &str> {
        self.filter_chains
            .iter()
            .flat_map(|chain| chain.filters.iter())
            .filter_map(|filter| match filter {
                NetworkFilter::HttpConnectionManager {
                    route_config_name, ..
                } => Some(route_config_name.as_str()),
                NetworkFilter::TcpProxy { .. } => None,
            })
    }
}

/// Single route of a virtual host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    pub prefix: String,
    pub cluster: String,
    pub timeout_ms: Option<u64>,
}

impl Route {
    pub fn prefix(
        name: impl Into<String>,
        prefix: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            cluster: cluster.into(),
            timeout_ms: None,
        }
    }
}

/// Virtual host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<Route>,
}

/// Route configuration (RDS)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfiguration {
    pub name: String,
    pub virtual_hosts: Vec<VirtualHost>,
}

impl RouteConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            virtual_hosts: Vec::new(),
        }
    }
}

/// Secret material (SDS)
///
/// Never log the contents of a secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretKind {
    TlsCertificate {
        certificate_chain: String,
        private_key: String,
    },
    ValidationContext {
        trusted_ca: String,
        /// Subject alternative names to match
        match_subject_alt_names: Vec<String>,
    },
}

impl std::fmt::Debug for SecretKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretKind::TlsCertificate { .. } => f.write_str("TlsCertificate(..)"),
            SecretKind::ValidationContext { .. } => f.write_str("ValidationContext(..)"),
        }
    }
}

/// Secret (SDS)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    pub kind: SecretKind,
}

/// A generated resource of any discovery type
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Cluster(Cluster),
    Endpoint(ClusterLoadAssignment),
    Listener(Listener),
    Route(RouteConfiguration),
    Secret(Secret),
}

impl Resource {
    /// Resource name, as proxies subscribe to it
    pub fn name(&self) -> &str {
        match self {
            Resource::Cluster(c) => &c.name,
            Resource::Endpoint(cla) => &cla.cluster_name,
            Resource::Listener(l) => &l.name,
            Resource::Route(r) => &r.name,
            Resource::Secret(s) => &s.name,
        }
    }

    pub fn discovery_type(&self) -> DiscoveryType {
        match self {
            Resource::Cluster(_) => DiscoveryType::Cluster,
            Resource::Endpoint(_) => DiscoveryType::Endpoint,
            Resource::Listener(_) => DiscoveryType::Listener,
            Resource::Route(_) => DiscoveryType::Route,
            Resource::Secret(_) => DiscoveryType::Secret,
        }
    }

    /// Pack the resource into the wire envelope
    pub fn to_any(&self) -> Result<Any, AdsError> {
        if self.name().is_empty() {
            return Err(AdsError::Serialization {
                name: String::new(),
                reason: "resource has no name".to_string(),
            });
        }

        let value = match self {
            Resource::Cluster(c) => serde_json::to_vec(c),
            Resource::Endpoint(cla) => serde_json::to_vec(cla),
            Resource::Listener(l) => serde_json::to_vec(l),
            Resource::Route(r) => serde_json::to_vec(r),
            Resource::Secret(s) => serde_json::to_vec(s),
        }
        .map_err(|e| AdsError::Serialization {
            name: self.name().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Any {
            type_url: self.discovery_type().type_url().to_string(),
            value,
        })
    }
}

impl From<Cluster> for Resource {
    fn from(value: Cluster) -> Self {
        Resource::Cluster(value)
    }
}

impl From<ClusterLoadAssignment> for Resource {
    fn from(value: ClusterLoadAssignment) -> Self {
        Resource::Endpoint(value)
    }
}

impl From<Listener> for Resource {
    fn from(value: Listener) -> Self {
        Resource::Listener(value)
    }
}

impl From<RouteConfiguration> for Resource {
    fn from(value: RouteConfiguration) -> Self {
        Resource::Route(value)
    }
}

impl From<Secret> for Resource {
    fn from(value: Secret) -> Self {
        Resource::Secret(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_names_and_types() {
        let cluster: Resource = Cluster::new_eds("backend").into();
        assert_eq!(cluster.name(), "backend");
        assert_eq!(cluster.discovery_type(), DiscoveryType::Cluster);

        let cla: Resource = ClusterLoadAssignment::new("backend").into();
        assert_eq!(cla.name(), "backend");
        assert_eq!(cla.discovery_type(), DiscoveryType::Endpoint);
    }

    #[test]
    fn test_to_any() {
        let resource: Resource = RouteConfiguration::new("rds-inbound").into();
        let any = resource.to_any().unwrap();
        assert_eq!(any.type_url, DiscoveryType::Route.type_url());

        let decoded: RouteConfiguration = serde_json::from_slice(&any.value).unwrap();
        assert_eq!(decoded.name, "rds-inbound");
    }

    #[test]
    fn test_to_any_rejects_unnamed_resource() {
        let resource: Resource = Cluster::new_eds("").into();
        assert!(matches!(
            resource.to_any(),
            Err(AdsError::Serialization { .. })
        ));
    }

    #[test]
    fn test_listener_route_config_names() {
        let listener = Listener::new("inbound", ListenerAddress::default())
            .with_filter_chain(FilterChain {
                name: "http".to_string(),
                filters: vec![NetworkFilter::http_connection_manager("rds-inbound")],
                tls_secret: None,
            })
            .with_filter_chain(FilterChain {
                name: "tcp".to_string(),
                filters: vec![NetworkFilter::tcp_proxy("db")],
                tls_secret: None,
            });

        let names: Vec<&str> = listener.route_config_names().collect();
        assert_eq!(names, vec!["rds-inbound"]);
    }

    #[test]
    fn test_secret_debug_hides_material() {
        let secret = Secret {
            name: "service-cert".to_string(),
            kind: SecretKind::TlsCertificate {
                certificate_chain: "CHAIN".to_string(),
                private_key: "KEY".to_string(),
            },
        };
        let rendered = format!("{:?}", secret);
        assert!(!rendered.contains("KEY"));
    }
}
