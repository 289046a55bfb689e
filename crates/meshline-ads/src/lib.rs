//! Meshline ADS Response Engine
//!
//! This crate implements the response side of the aggregated discovery
//! service (ADS) used to push xDS configuration to proxy sidecars:
//! - per-proxy protocol state (versions, nonces, subscriptions)
//! - ordered generation and delivery of multi-type updates
//! - an optional snapshot cache committing a whole update at once
//! - control-plane-driven pushes through a bounded worker pool
//!
//! # Architecture
//!
//! - `xds` - discovery types and resource payloads
//! - `proto` - discovery request/response wire messages
//! - `proxy` - proxy session state
//! - `registry` - resource generators per discovery type
//! - `response` - builds and sends one discovery response
//! - `dispatcher` - orchestrates a batch of discovery types for a proxy
//! - `snapshot` - snapshot cache
//! - `server` - ADS request handling and broadcast updates
//! - `transport`, `config`, `debugger`, `metrics` - collaborators

pub mod config;
pub mod debugger;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod proto;
pub mod proxy;
pub mod registry;
pub mod response;
pub mod server;
pub mod snapshot;
pub mod transport;
pub mod xds;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{AdsConfig, LiveMeshConfig, MeshConfigView};
pub use dispatcher::{DeliveryMode, DispatchReport, ResponseDispatcher, TypeOutcome};
pub use error::AdsError;
pub use proto::{DiscoveryRequest, DiscoveryResponse};
pub use proxy::ProxySession;
pub use registry::{GeneratorRegistry, ResourceGenerator};
pub use server::{AdsServer, ProxyUpdateJob};
pub use snapshot::{SnapshotCache, SnapshotStore};
pub use transport::{DiscoveryTransport, StreamTransport, TransportError};
pub use xds::DiscoveryType;
