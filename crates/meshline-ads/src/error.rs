//! Error types for the ADS response engine

use meshline_common::ErrorCode;
use meshline_common::error::{
    GENERATING_REQUESTED_RESOURCE, MARSHALLING_XDS_RESOURCE, PROXY_NOT_CONNECTED,
    RECORDING_SNAPSHOT, SENDING_DISCOVERY_RESPONSE, UNKNOWN_TYPE_URL,
};
use uuid::Uuid;

use crate::xds::DiscoveryType;

/// Errors raised while building and delivering discovery responses
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AdsError {
    /// No generator is registered for the type, or the type URL is unknown
    #[error("unknown discovery type: {0}")]
    UnknownType(String),

    /// The generator for the type failed; the cause is only logged
    #[error("failed to generate {0} resources")]
    ResourceGeneration(DiscoveryType),

    /// A single resource could not be packed into the wire envelope
    #[error("failed to serialize resource '{name}': {reason}")]
    Serialization { name: String, reason: String },

    /// The response could not be handed to the proxy stream
    #[error("failed to send {discovery_type} response: {reason}")]
    Transport {
        discovery_type: DiscoveryType,
        reason: String,
    },

    /// The snapshot store refused the aggregated resources
    #[error("failed to record snapshot: {0}")]
    SnapshotCommit(String),

    #[error("proxy {0} is not connected")]
    ProxyNotConnected(Uuid),
}

impl AdsError {
    /// Error code logged alongside this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AdsError::UnknownType(_) => UNKNOWN_TYPE_URL,
            AdsError::ResourceGeneration(_) => GENERATING_REQUESTED_RESOURCE,
            AdsError::Serialization { .. } => MARSHALLING_XDS_RESOURCE,
            AdsError::Transport { .. } => SENDING_DISCOVERY_RESPONSE,
            AdsError::SnapshotCommit(_) => RECORDING_SNAPSHOT,
            AdsError::ProxyNotConnected(_) => PROXY_NOT_CONNECTED,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, AdsError::Transport { .. })
    }
}
