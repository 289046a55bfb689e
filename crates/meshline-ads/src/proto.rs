//! Discovery protocol messages
//!
//! The fields of `envoy.service.discovery.v3` requests and responses that the
//! engine reads or fills in. Encoding them onto the stream is left to the
//! gRPC layer that owns the connection.

use crate::xds::DiscoveryType;

/// Any type wrapper (the envelope of every resource)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Any {
    pub type_url: String,
    pub value: Vec<u8>,
}

/// Status carried by a NACK
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub code: i32,
    pub message: String,
}

/// Control plane identifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlPlane {
    pub identifier: String,
}

/// Node identifier sent by the proxy on its first request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub cluster: String,
    pub user_agent_name: String,
}

/// Discovery request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryRequest {
    /// Version the proxy last applied (empty on first request)
    pub version_info: String,
    /// Only present on the first request of a stream
    pub node: Option<Node>,
    /// Requested resource names (empty = wildcard)
    pub resource_names: Vec<String>,
    pub type_url: String,
    /// Nonce of the response this request answers
    pub response_nonce: String,
    /// Set when the proxy rejects the response (NACK)
    pub error_detail: Option<Status>,
}

impl DiscoveryRequest {
    /// Request for a type, as the control plane would synthesize it
    pub fn for_type(discovery_type: DiscoveryType, resource_names: Vec<String>) -> Self {
        Self {
            type_url: discovery_type.type_url().to_string(),
            resource_names,
            ..Default::default()
        }
    }

    pub fn discovery_type(&self) -> Option<DiscoveryType> {
        DiscoveryType::from_type_url(&self.type_url)
    }
}

/// Discovery response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryResponse {
    pub version_info: String,
    pub resources: Vec<Any>,
    pub canary: bool,
    pub type_url: String,
    pub nonce: String,
    pub control_plane: Option<ControlPlane>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesized_request() {
        let req = DiscoveryRequest::for_type(DiscoveryType::Secret, vec!["root-cert".to_string()]);
        assert_eq!(req.discovery_type(), Some(DiscoveryType::Secret));
        assert!(req.response_nonce.is_empty());
        assert!(req.node.is_none());
    }

    #[test]
    fn test_unknown_type_url() {
        let req = DiscoveryRequest {
            type_url: "type.googleapis.com/envoy.config.core.v3.TypedExtensionConfig".to_string(),
            ..Default::default()
        };
        assert_eq!(req.discovery_type(), None);
    }
}
