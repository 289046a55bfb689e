//! Proxy session state
//!
//! One [`ProxySession`] exists per connected proxy. It tracks, per discovery
//! type, the version and nonce of the last response, the resources the proxy
//! subscribed to, and the subscribed resources last delivered.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::xds::DiscoveryType;

/// Per-type protocol state of a proxy
#[derive(Debug, Clone, Default)]
struct TypeState {
    last_sent_version: u64,
    last_nonce: String,
    last_applied_version: Option<u64>,
    subscribed: HashSet<String>,
    last_sent: HashSet<String>,
}

/// A connected proxy sidecar
pub struct ProxySession {
    uuid: Uuid,
    identity: String,
    connected_at: i64,
    state: DashMap<DiscoveryType, TypeState>,
    /// Serializes response builds per discovery type
    build_locks: HashMap<DiscoveryType, Arc<Mutex<()>>>,
}

impl ProxySession {
    /// Create the session for a freshly connected proxy
    pub fn new(uuid: Uuid, identity: impl Into<String>) -> Self {
        Self {
            uuid,
            identity: identity.into(),
            connected_at: chrono::Utc::now().timestamp_millis(),
            state: DiscoveryType::all()
                .iter()
                .map(|t| (*t, TypeState::default()))
                .collect(),
            build_locks: DiscoveryType::all()
                .iter()
                .map(|t| (*t, Arc::new(Mutex::new(()))))
                .collect(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Logical service identity of the workload behind the proxy
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Connect timestamp in epoch milliseconds
    pub fn connected_at(&self) -> i64 {
        self.connected_at
    }

    /// Name used in logs, metrics and the debug log
    pub fn name(&self) -> String {
        format!("{}:{}", self.identity, self.uuid)
    }

    pub(crate) fn build_lock(&self, discovery_type: DiscoveryType) -> Arc<Mutex<()>> {
        self.build_locks
            .get(&discovery_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(())))
    }

    /// Increment the version counter of a type and return the new value
    pub fn increment_last_sent_version(&self, discovery_type: DiscoveryType) -> u64 {
        let mut state = self.state.entry(discovery_type).or_default();
        state.last_sent_version += 1;
        state.last_sent_version
    }

    pub fn last_sent_version(&self, discovery_type: DiscoveryType) -> u64 {
        self.state
            .get(&discovery_type)
            .map(|s| s.last_sent_version)
            .unwrap_or_default()
    }

    /// Generate a fresh nonce for a type, replacing the previous one
    pub fn set_new_nonce(&self, discovery_type: DiscoveryType) -> String {
        let nonce = Uuid::new_v4().to_string();
        self.state.entry(discovery_type).or_default().last_nonce = nonce.clone();
        nonce
    }

    pub fn last_nonce(&self, discovery_type: DiscoveryType) -> String {
        self.state
            .get(&discovery_type)
            .map(|s| s.last_nonce.clone())
            .unwrap_or_default()
    }

    /// Record the version a proxy acknowledged
    pub fn set_last_applied_version(&self, discovery_type: DiscoveryType, version: u64) {
        self.state
            .entry(discovery_type)
            .or_default()
            .last_applied_version = Some(version);
    }

    pub fn last_applied_version(&self, discovery_type: DiscoveryType) -> Option<u64> {
        self.state
            .get(&discovery_type)
            .and_then(|s| s.last_applied_version)
    }

    pub fn subscribed_resources(&self, discovery_type: DiscoveryType) -> HashSet<String> {
        self.state
            .get(&discovery_type)
            .map(|s| s.subscribed.clone())
            .unwrap_or_default()
    }

    pub fn set_subscribed_resources(
        &self,
        discovery_type: DiscoveryType,
        resources: HashSet<String>,
    ) {
        self.state.entry(discovery_type).or_default().subscribed = resources;
    }

    /// Subscribed resources delivered by the last successful response
    pub fn last_resources_sent(&self, discovery_type: DiscoveryType) -> HashSet<String> {
        self.state
            .get(&discovery_type)
            .map(|s| s.last_sent.clone())
            .unwrap_or_default()
    }

    pub fn set_last_resources_sent(&self, discovery_type: DiscoveryType, sent: HashSet<String>) {
        self.state.entry(discovery_type).or_default().last_sent = sent;
    }
}

impl fmt::Display for ProxySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proxy on service {} (UUID={})", self.identity, self.uuid)
    }
}

impl fmt::Debug for ProxySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySession")
            .field("uuid", &self.uuid)
            .field("identity", &self.identity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_version_increments_per_type() {
        let proxy = ProxySession::new(Uuid::new_v4(), "bookstore.default");

        assert_eq!(proxy.last_sent_version(DiscoveryType::Cluster), 0);
        assert_eq!(proxy.increment_last_sent_version(DiscoveryType::Cluster), 1);
        assert_eq!(proxy.increment_last_sent_version(DiscoveryType::Cluster), 2);
        assert_eq!(proxy.increment_last_sent_version(DiscoveryType::Route), 1);
        assert_eq!(proxy.last_sent_version(DiscoveryType::Cluster), 2);
    }

    #[test]
    fn test_nonce_changes() {
        let proxy = ProxySession::new(Uuid::new_v4(), "bookstore.default");
        assert!(proxy.last_nonce(DiscoveryType::Endpoint).is_empty());

        let first = proxy.set_new_nonce(DiscoveryType::Endpoint);
        let second = proxy.set_new_nonce(DiscoveryType::Endpoint);
        assert_ne!(first, second);
        assert_eq!(proxy.last_nonce(DiscoveryType::Endpoint), second);
    }

    #[test]
    fn test_resource_sets() {
        let proxy = ProxySession::new(Uuid::new_v4(), "bookstore.default");
        proxy.set_subscribed_resources(DiscoveryType::Route, set(&["rds-inbound"]));
        proxy.set_last_resources_sent(DiscoveryType::Route, set(&["rds-inbound"]));

        assert_eq!(
            proxy.subscribed_resources(DiscoveryType::Route),
            set(&["rds-inbound"])
        );
        assert_eq!(
            proxy.last_resources_sent(DiscoveryType::Route),
            set(&["rds-inbound"])
        );
        assert!(proxy.subscribed_resources(DiscoveryType::Secret).is_empty());
    }

    #[test]
    fn test_applied_version() {
        let proxy = ProxySession::new(Uuid::new_v4(), "bookstore.default");
        assert_eq!(proxy.last_applied_version(DiscoveryType::Listener), None);
        proxy.set_last_applied_version(DiscoveryType::Listener, 4);
        assert_eq!(proxy.last_applied_version(DiscoveryType::Listener), Some(4));
    }

    #[test]
    fn test_display() {
        let uuid = Uuid::new_v4();
        let proxy = ProxySession::new(uuid, "bookstore.default");
        assert_eq!(
            proxy.to_string(),
            format!("Proxy on service bookstore.default (UUID={})", uuid)
        );
        assert_eq!(proxy.name(), format!("bookstore.default:{}", uuid));
    }
}
