//! xDS Resource Snapshot Management
//!
//! In snapshot mode the dispatcher does not send responses itself. It
//! aggregates every generated type of a dispatch call and commits them here
//! in one write; the serving side later answers proxy requests from the
//! committed snapshot.
//!
//! A commit builds the new snapshot off to the side (previous snapshot
//! overlaid with the committed types) and publishes it with a single `Arc`
//! swap, so readers never observe a partially applied commit. Types missing
//! from a commit keep their previous resources. Dangling references between
//! types are logged but never block a commit: a type that failed to generate
//! must not take the rest of the batch down with it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use meshline_common::error::RECORDING_SNAPSHOT;
use tracing::{debug, info, warn};

use crate::error::AdsError;
use crate::proxy::ProxySession;
use crate::xds::DiscoveryType;
use crate::xds::types::Resource;

/// Resources of every discovery type for one proxy at a point in time
#[derive(Debug, Clone, Default)]
pub struct ProxySnapshot {
    /// Per-proxy snapshot version, incremented on every commit
    pub version: u64,
    pub resources: HashMap<DiscoveryType, Vec<Resource>>,
    /// Creation timestamp
    pub created_at: i64,
}

impl ProxySnapshot {
    /// Resources of a type (empty if the type was never committed)
    pub fn resources(&self, discovery_type: DiscoveryType) -> &[Resource] {
        self.resources
            .get(&discovery_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn resource_names(&self, discovery_type: DiscoveryType) -> Vec<String> {
        self.resources(discovery_type)
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    pub fn contains(&self, discovery_type: DiscoveryType, name: &str) -> bool {
        self.resources(discovery_type)
            .iter()
            .any(|r| r.name() == name)
    }

    pub fn resource_count(&self, discovery_type: DiscoveryType) -> usize {
        self.resources(discovery_type).len()
    }

    /// Endpoint assignments and route configurations not referenced by a
    /// cluster or listener of the same snapshot
    pub fn consistency_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();

        let clusters: HashSet<&str> = self
            .resources(DiscoveryType::Cluster)
            .iter()
            .map(Resource::name)
            .collect();
        for name in self
            .resources(DiscoveryType::Endpoint)
            .iter()
            .map(Resource::name)
        {
            if !clusters.contains(name) {
                issues.push(format!("endpoints for unknown cluster '{}'", name));
            }
        }

        let referenced_routes: HashSet<&str> = self
            .resources(DiscoveryType::Listener)
            .iter()
            .filter_map(|r| match r {
                Resource::Listener(listener) => Some(listener.route_config_names()),
                _ => None,
            })
            .flatten()
            .collect();
        for name in self.resources(DiscoveryType::Route).iter().map(Resource::name) {
            if !referenced_routes.contains(name) {
                issues.push(format!(
                    "route configuration '{}' is not referenced by any listener",
                    name
                ));
            }
        }

        issues
    }
}

/// Destination of the aggregated resources of a dispatch call
pub trait SnapshotStore: Send + Sync {
    /// Commit the resources of several types for a proxy in one write.
    ///
    /// Returns the version of the published snapshot.
    fn record_full_snapshot(
        &self,
        proxy: &ProxySession,
        resources: HashMap<DiscoveryType, Vec<Resource>>,
    ) -> Result<u64, AdsError>;
}

/// Snapshot cache keyed by proxy UUID
#[derive(Default)]
pub struct SnapshotCache {
    snapshots: DashMap<String, Arc<ProxySnapshot>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot of a proxy
    pub fn get_snapshot(&self, proxy_uuid: &str) -> Option<Arc<ProxySnapshot>> {
        self.snapshots.get(proxy_uuid).map(|s| s.clone())
    }

    /// Remove the snapshot of a disconnected proxy
    pub fn remove_snapshot(&self, proxy_uuid: &str) {
        self.snapshots.remove(proxy_uuid);
    }

    /// Get all proxy UUIDs with snapshots
    pub fn node_ids(&self) -> Vec<String> {
        self.snapshots.iter().map(|e| e.key().clone()).collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            node_count: self.snapshots.len(),
            resource_count: self
                .snapshots
                .iter()
                .map(|e| e.value().resources.values().map(Vec::len).sum::<usize>())
                .sum(),
        }
    }
}

impl SnapshotStore for SnapshotCache {
    fn record_full_snapshot(
        &self,
        proxy: &ProxySession,
        resources: HashMap<DiscoveryType, Vec<Resource>>,
    ) -> Result<u64, AdsError> {
        let committed_types = resources.len();

        // the entry guard keeps concurrent commits for the same proxy apart
        match self.snapshots.entry(proxy.uuid().to_string()) {
            Entry::Occupied(mut entry) => {
                let mut next = ProxySnapshot::clone(entry.get());
                next.version += 1;
                next.created_at = chrono::Utc::now().timestamp_millis();
                next.resources.extend(resources);
                warn_inconsistent(proxy, &next);

                let version = next.version;
                entry.insert(Arc::new(next));
                debug!(
                    proxy = %proxy,
                    version,
                    types = committed_types,
                    "Updated xDS snapshot"
                );
                Ok(version)
            }
            Entry::Vacant(entry) => {
                let first = ProxySnapshot {
                    version: 1,
                    resources,
                    created_at: chrono::Utc::now().timestamp_millis(),
                };
                warn_inconsistent(proxy, &first);

                entry.insert(Arc::new(first));
                info!(proxy = %proxy, types = committed_types, "Recorded first xDS snapshot");
                Ok(1)
            }
        }
    }
}

fn warn_inconsistent(proxy: &ProxySession, snapshot: &ProxySnapshot) {
    for issue in snapshot.consistency_issues() {
        warn!(
            err_code = %RECORDING_SNAPSHOT,
            proxy = %proxy,
            version = snapshot.version,
            issue = %issue,
            "Committed snapshot has a dangling reference"
        );
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of proxies with snapshots
    pub node_count: usize,
    /// Resources held across all snapshots
    pub resource_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::types::{
        Cluster, ClusterLoadAssignment, FilterChain, Listener, ListenerAddress, NetworkFilter,
        RouteConfiguration,
    };
    use uuid::Uuid;

    fn proxy() -> ProxySession {
        ProxySession::new(Uuid::new_v4(), "bookstore.default")
    }

    fn clusters(names: &[&str]) -> Vec<Resource> {
        names
            .iter()
            .map(|n| Resource::from(Cluster::new_eds(*n)))
            .collect()
    }

    fn endpoints(names: &[&str]) -> Vec<Resource> {
        names
            .iter()
            .map(|n| Resource::from(ClusterLoadAssignment::new(*n)))
            .collect()
    }

    #[test]
    fn test_first_commit() {
        let cache = SnapshotCache::new();
        let proxy = proxy();

        let version = cache
            .record_full_snapshot(
                &proxy,
                HashMap::from([
                    (DiscoveryType::Cluster, clusters(&["a", "b"])),
                    (DiscoveryType::Endpoint, endpoints(&["a"])),
                ]),
            )
            .unwrap();
        assert_eq!(version, 1);

        let snapshot = cache.get_snapshot(&proxy.uuid().to_string()).unwrap();
        assert_eq!(snapshot.resource_count(DiscoveryType::Cluster), 2);
        assert!(snapshot.contains(DiscoveryType::Endpoint, "a"));
        assert_eq!(cache.stats().node_count, 1);
        assert_eq!(cache.stats().resource_count, 3);
    }

    #[test]
    fn test_missing_type_keeps_previous_resources() {
        let cache = SnapshotCache::new();
        let proxy = proxy();
        cache
            .record_full_snapshot(
                &proxy,
                HashMap::from([
                    (DiscoveryType::Cluster, clusters(&["a"])),
                    (DiscoveryType::Endpoint, endpoints(&["a"])),
                ]),
            )
            .unwrap();

        // clusters failed to generate this round
        let version = cache
            .record_full_snapshot(
                &proxy,
                HashMap::from([(DiscoveryType::Endpoint, endpoints(&[]))]),
            )
            .unwrap();
        assert_eq!(version, 2);

        let snapshot = cache.get_snapshot(&proxy.uuid().to_string()).unwrap();
        assert_eq!(snapshot.resource_names(DiscoveryType::Cluster), vec!["a"]);
        assert_eq!(snapshot.resource_count(DiscoveryType::Endpoint), 0);
    }

    #[test]
    fn test_dangling_endpoints_are_still_committed() {
        let cache = SnapshotCache::new();
        let proxy = proxy();
        cache
            .record_full_snapshot(
                &proxy,
                HashMap::from([(DiscoveryType::Cluster, clusters(&["a"]))]),
            )
            .unwrap();

        let version = cache
            .record_full_snapshot(
                &proxy,
                HashMap::from([
                    (DiscoveryType::Cluster, clusters(&["b"])),
                    (DiscoveryType::Endpoint, endpoints(&["a"])),
                ]),
            )
            .unwrap();
        assert_eq!(version, 2);

        let snapshot = cache.get_snapshot(&proxy.uuid().to_string()).unwrap();
        assert_eq!(snapshot.resource_names(DiscoveryType::Cluster), vec!["b"]);
        assert!(snapshot.contains(DiscoveryType::Endpoint, "a"));
        assert_eq!(
            snapshot.consistency_issues(),
            vec!["endpoints for unknown cluster 'a'".to_string()]
        );
    }

    #[test]
    fn test_first_commit_without_clusters() {
        let cache = SnapshotCache::new();
        let proxy = proxy();

        let version = cache
            .record_full_snapshot(
                &proxy,
                HashMap::from([
                    (DiscoveryType::Endpoint, endpoints(&["a"])),
                    (
                        DiscoveryType::Route,
                        vec![Resource::from(RouteConfiguration::new("rds-inbound"))],
                    ),
                ]),
            )
            .unwrap();
        assert_eq!(version, 1);

        let snapshot = cache.get_snapshot(&proxy.uuid().to_string()).unwrap();
        assert_eq!(snapshot.resources.len(), 2);
        assert_eq!(snapshot.consistency_issues().len(), 2);
    }

    #[test]
    fn test_unreferenced_route_is_reported() {
        let listener = Listener::new("inbound", ListenerAddress::default()).with_filter_chain(
            FilterChain {
                name: "http".to_string(),
                filters: vec![NetworkFilter::http_connection_manager("rds-inbound")],
                tls_secret: None,
            },
        );
        let snapshot = ProxySnapshot {
            version: 1,
            resources: HashMap::from([
                (DiscoveryType::Listener, vec![Resource::from(listener)]),
                (
                    DiscoveryType::Route,
                    vec![Resource::from(RouteConfiguration::new("rds-inbound"))],
                ),
            ]),
            created_at: 0,
        };
        assert!(snapshot.consistency_issues().is_empty());

        let mut orphaned = snapshot.clone();
        orphaned.resources.insert(
            DiscoveryType::Route,
            vec![Resource::from(RouteConfiguration::new("rds-outbound"))],
        );
        assert_eq!(orphaned.consistency_issues().len(), 1);
    }

    #[test]
    fn test_remove_snapshot() {
        let cache = SnapshotCache::new();
        let proxy = proxy();
        cache
            .record_full_snapshot(&proxy, HashMap::new())
            .unwrap();
        assert_eq!(cache.node_ids(), vec![proxy.uuid().to_string()]);

        cache.remove_snapshot(&proxy.uuid().to_string());
        assert!(cache.get_snapshot(&proxy.uuid().to_string()).is_none());
    }
}
