//! ADS Server
//!
//! Ties proxy sessions, their stream transports, the response dispatcher and
//! the worker pool together. Proxy requests are answered on the calling
//! task; control-plane-driven pushes run as jobs on the worker pool, one job
//! per connected proxy.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use meshline_common::error::DISCOVERY_REQUEST_NACKED;
use meshline_workerpool::{Job, JobDone, WorkerPool, WorkerPoolError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::{AdsConfig, LiveMeshConfig};
use crate::debugger::XdsDebugLog;
use crate::dispatcher::{DeliveryMode, ResponseDispatcher, TypeOutcome, resolve_request};
use crate::error::AdsError;
use crate::proto::DiscoveryRequest;
use crate::proxy::ProxySession;
use crate::registry::GeneratorRegistry;
use crate::response::send_discovery_response;
use crate::snapshot::{ProxySnapshot, SnapshotCache};
use crate::transport::{DiscoveryTransport, StreamItem, StreamTransport};
use crate::xds::DiscoveryType;
use crate::xds::types::Resource;

/// A registered proxy and the stream its responses go to
#[derive(Clone)]
struct ConnectedProxy {
    session: Arc<ProxySession>,
    transport: Arc<dyn DiscoveryTransport>,
}

/// Generation and delivery shared by request handling and update jobs
pub struct ProxyUpdater {
    dispatcher: ResponseDispatcher,
    snapshot_cache: Option<Arc<SnapshotCache>>,
    control_plane_id: String,
}

impl ProxyUpdater {
    pub fn new(
        dispatcher: ResponseDispatcher,
        snapshot_cache: Option<Arc<SnapshotCache>>,
        control_plane_id: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            snapshot_cache,
            control_plane_id: control_plane_id.into(),
        }
    }

    pub fn dispatcher(&self) -> &ResponseDispatcher {
        &self.dispatcher
    }

    /// Regenerate `batch` for a proxy and deliver it.
    ///
    /// With the snapshot cache enabled the regenerated types are committed
    /// first, then the types this commit published are served from the
    /// snapshot. Types that failed to generate are not served again, and
    /// nothing is served when the commit is refused.
    pub async fn update(
        &self,
        proxy: &ProxySession,
        transport: &dyn DiscoveryTransport,
        request: Option<&DiscoveryRequest>,
        batch: &[DiscoveryType],
    ) -> Result<(), AdsError> {
        let report = self
            .dispatcher
            .dispatch_with_report(proxy, transport, request, batch)
            .await;

        let Some(cache) = &self.snapshot_cache else {
            return report.into_result();
        };
        let Some(version) = report.snapshot_version else {
            let refused = report.outcomes.into_iter().find_map(|(_, outcome)| match outcome {
                TypeOutcome::Failed(e @ AdsError::SnapshotCommit(_)) => Some(e),
                _ => None,
            });
            return match refused {
                Some(e) => {
                    warn!(
                        err_code = %e.code(),
                        proxy = %proxy,
                        error = %e,
                        "Snapshot not committed, serving nothing"
                    );
                    Err(e)
                }
                None => Ok(()),
            };
        };

        let committed: Vec<DiscoveryType> = report
            .outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == TypeOutcome::Cached)
            .map(|(t, _)| *t)
            .collect();
        let Some(snapshot) = cache.get_snapshot(&proxy.uuid().to_string()) else {
            debug!(proxy = %proxy, version, "No snapshot to serve");
            return Ok(());
        };
        self.serve_snapshot(proxy, transport, request, &committed, &snapshot)
            .await
    }

    /// Send `batch` from a committed snapshot, returning the last transport
    /// failure
    async fn serve_snapshot(
        &self,
        proxy: &ProxySession,
        transport: &dyn DiscoveryTransport,
        request: Option<&DiscoveryRequest>,
        batch: &[DiscoveryType],
        snapshot: &ProxySnapshot,
    ) -> Result<(), AdsError> {
        let mut result = Ok(());
        for discovery_type in batch.iter().copied() {
            let request = resolve_request(proxy, request, discovery_type);
            let resources = snapshot_resources(snapshot, &request, discovery_type);
            if let Err(e) = send_discovery_response(
                proxy,
                &request,
                transport,
                &resources,
                &self.control_plane_id,
            )
            .await
            {
                result = Err(e);
            }
        }
        result
    }
}

/// Resources of a snapshot matching the names of a request
fn snapshot_resources(
    snapshot: &ProxySnapshot,
    request: &DiscoveryRequest,
    discovery_type: DiscoveryType,
) -> Vec<Resource> {
    let resources = snapshot.resources(discovery_type);
    if request.resource_names.is_empty() {
        return resources.to_vec();
    }
    resources
        .iter()
        .filter(|r| request.resource_names.iter().any(|n| n == r.name()))
        .cloned()
        .collect()
}

/// Whether a snapshot holds everything a request asks for
fn snapshot_covers(
    snapshot: &ProxySnapshot,
    request: &DiscoveryRequest,
    discovery_type: DiscoveryType,
) -> bool {
    if !snapshot.resources.contains_key(&discovery_type) {
        return false;
    }
    request
        .resource_names
        .iter()
        .all(|name| snapshot.contains(discovery_type, name))
}

/// Control-plane-driven update of one proxy, run on the worker pool
pub struct ProxyUpdateJob {
    name: String,
    updater: Arc<ProxyUpdater>,
    proxy: Arc<ProxySession>,
    transport: Arc<dyn DiscoveryTransport>,
    batch: Vec<DiscoveryType>,
    done_tx: Option<oneshot::Sender<()>>,
    done_rx: Option<JobDone>,
}

impl ProxyUpdateJob {
    pub fn new(
        updater: Arc<ProxyUpdater>,
        proxy: Arc<ProxySession>,
        transport: Arc<dyn DiscoveryTransport>,
        batch: Vec<DiscoveryType>,
    ) -> Self {
        let (done_tx, done_rx) = oneshot::channel();
        Self {
            name: format!("proxy-update:{}", proxy.name()),
            updater,
            proxy,
            transport,
            batch,
            done_tx: Some(done_tx),
            done_rx: Some(done_rx),
        }
    }
}

#[async_trait]
impl Job for ProxyUpdateJob {
    fn job_name(&self) -> &str {
        &self.name
    }

    async fn run(mut self: Box<Self>) {
        if let Err(e) = self
            .updater
            .update(&self.proxy, self.transport.as_ref(), None, &self.batch)
            .await
        {
            warn!(
                err_code = %e.code(),
                proxy = %self.proxy,
                error = %e,
                "Failed to push update to proxy"
            );
        }

        if let Some(done) = self.done_tx.take() {
            let _ = done.send(());
        }
    }

    fn done_receiver(&mut self) -> JobDone {
        self.done_rx.take().unwrap_or_else(|| {
            // already handed out; the sender of this one is dropped at once
            oneshot::channel().1
        })
    }
}

/// ADS server
pub struct AdsServer {
    config: AdsConfig,
    updater: Arc<ProxyUpdater>,
    mesh_config: Arc<LiveMeshConfig>,
    debug_log: Arc<XdsDebugLog>,
    snapshot_cache: Option<Arc<SnapshotCache>>,
    workers: WorkerPool,
    proxies: DashMap<Uuid, ConnectedProxy>,
}

impl AdsServer {
    /// Create a server and start its worker pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: AdsConfig, registry: GeneratorRegistry) -> Self {
        let mesh_config = Arc::new(LiveMeshConfig::from(&config));
        let debug_log = Arc::new(XdsDebugLog::new());
        let snapshot_cache = config
            .cache_enabled
            .then(|| Arc::new(SnapshotCache::new()));

        let mode = match &snapshot_cache {
            Some(cache) => DeliveryMode::Snapshot(cache.clone()),
            None => DeliveryMode::Immediate,
        };
        let dispatcher = ResponseDispatcher::new(
            Arc::new(registry),
            mesh_config.clone(),
            debug_log.clone(),
            mode,
            config.control_plane_id.clone(),
        );

        info!(
            control_plane_id = %config.control_plane_id,
            cache_enabled = config.cache_enabled,
            "Creating ADS server"
        );

        Self {
            updater: Arc::new(ProxyUpdater::new(
                dispatcher,
                snapshot_cache.clone(),
                config.control_plane_id.clone(),
            )),
            workers: WorkerPool::new(config.worker_count),
            config,
            mesh_config,
            debug_log,
            snapshot_cache,
            proxies: DashMap::new(),
        }
    }

    pub fn config(&self) -> &AdsConfig {
        &self.config
    }

    /// Live mesh configuration (debug server switch)
    pub fn mesh_config(&self) -> Arc<LiveMeshConfig> {
        self.mesh_config.clone()
    }

    pub fn debug_log(&self) -> Arc<XdsDebugLog> {
        self.debug_log.clone()
    }

    /// Snapshot cache, when enabled
    pub fn snapshot_cache(&self) -> Option<Arc<SnapshotCache>> {
        self.snapshot_cache.clone()
    }

    pub fn updater(&self) -> Arc<ProxyUpdater> {
        self.updater.clone()
    }

    /// Register a proxy with the transport its responses go to
    pub fn register_proxy(
        &self,
        session: Arc<ProxySession>,
        transport: Arc<dyn DiscoveryTransport>,
    ) {
        info!(proxy = %session, "Registered proxy");
        self.proxies.insert(
            session.uuid(),
            ConnectedProxy { session, transport },
        );
    }

    /// Register a proxy streaming over a new channel.
    ///
    /// Returns the session and the receiver the gRPC layer streams from.
    pub fn connect(
        &self,
        uuid: Uuid,
        identity: impl Into<String>,
        buffer: usize,
    ) -> (Arc<ProxySession>, mpsc::Receiver<StreamItem>) {
        let session = Arc::new(ProxySession::new(uuid, identity));
        let (transport, rx) = StreamTransport::channel(buffer);
        self.register_proxy(session.clone(), Arc::new(transport));
        (session, rx)
    }

    /// Forget a proxy along with its snapshot and debug log entries
    pub fn unregister_proxy(&self, uuid: Uuid) -> Option<Arc<ProxySession>> {
        let (_, proxy) = self.proxies.remove(&uuid)?;
        self.debug_log.remove_proxy(&proxy.session.name());
        if let Some(cache) = &self.snapshot_cache {
            cache.remove_snapshot(&uuid.to_string());
        }
        info!(proxy = %proxy.session, "Unregistered proxy");
        Some(proxy.session)
    }

    pub fn proxy(&self, uuid: Uuid) -> Option<Arc<ProxySession>> {
        self.proxies.get(&uuid).map(|p| p.session.clone())
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// Handle a discovery request received on a proxy's stream
    pub async fn handle_request(
        &self,
        proxy_uuid: Uuid,
        request: DiscoveryRequest,
    ) -> Result<(), AdsError> {
        let Some(proxy) = self.proxies.get(&proxy_uuid).map(|p| p.value().clone()) else {
            let err = AdsError::ProxyNotConnected(proxy_uuid);
            warn!(err_code = %err.code(), error = %err, "Dropping discovery request");
            return Err(err);
        };
        let session = proxy.session.as_ref();

        let Some(discovery_type) = request.discovery_type() else {
            let err = AdsError::UnknownType(request.type_url.clone());
            warn!(
                err_code = %err.code(),
                proxy = %session,
                type_url = %request.type_url,
                "Unknown type URL in discovery request"
            );
            return Err(err);
        };

        debug!(
            proxy = %session,
            discovery_type = %discovery_type,
            version = %request.version_info,
            nonce = %request.response_nonce,
            "Handling discovery request"
        );

        if let Some(status) = &request.error_detail {
            warn!(
                err_code = %DISCOVERY_REQUEST_NACKED,
                proxy = %session,
                discovery_type = %discovery_type,
                version = %request.version_info,
                code = status.code,
                error = %status.message,
                "Proxy rejected discovery response"
            );
            return Ok(());
        }

        if !request.response_nonce.is_empty() {
            if request.response_nonce != session.last_nonce(discovery_type) {
                debug!(
                    proxy = %session,
                    discovery_type = %discovery_type,
                    nonce = %request.response_nonce,
                    "Ignoring request with stale nonce"
                );
                return Ok(());
            }

            if let Ok(version) = request.version_info.parse::<u64>()
                && version == session.last_sent_version(discovery_type)
            {
                session.set_last_applied_version(discovery_type, version);
                // compared with what was asked for, not with what the generator produced
                let requested: HashSet<String> = request.resource_names.iter().cloned().collect();
                if discovery_type.is_wildcard()
                    || requested == session.subscribed_resources(discovery_type)
                {
                    trace!(
                        proxy = %session,
                        discovery_type = %discovery_type,
                        version,
                        "Proxy acknowledged response"
                    );
                    return Ok(());
                }
            }
        }

        if !discovery_type.is_wildcard() {
            session.set_subscribed_resources(
                discovery_type,
                request.resource_names.iter().cloned().collect(),
            );
        }

        // answer from the snapshot when it already holds what was asked for
        if let Some(cache) = &self.snapshot_cache
            && let Some(snapshot) = cache.get_snapshot(&proxy_uuid.to_string())
            && snapshot_covers(&snapshot, &request, discovery_type)
        {
            return self
                .updater
                .serve_snapshot(
                    session,
                    proxy.transport.as_ref(),
                    Some(&request),
                    &[discovery_type],
                    &snapshot,
                )
                .await;
        }

        self.updater
            .update(
                session,
                proxy.transport.as_ref(),
                Some(&request),
                &[discovery_type],
            )
            .await
    }

    /// Push `batch` to every registered proxy through the worker pool.
    ///
    /// Waits while the pool queue is full. Returns the completion signal of
    /// every submitted update.
    pub async fn broadcast_update(
        &self,
        batch: &[DiscoveryType],
    ) -> Result<Vec<JobDone>, WorkerPoolError> {
        let proxies: Vec<ConnectedProxy> = self.proxies.iter().map(|e| e.value().clone()).collect();
        info!(
            proxies = proxies.len(),
            types = ?batch,
            "Broadcasting update to proxies"
        );

        let mut done = Vec::with_capacity(proxies.len());
        for proxy in proxies {
            let job = ProxyUpdateJob::new(
                self.updater.clone(),
                proxy.session,
                proxy.transport,
                batch.to_vec(),
            );
            done.push(self.workers.submit(job).await?);
        }
        Ok(done)
    }

    /// Broadcast `batch` and wait for every proxy update to finish.
    ///
    /// Returns how many updates completed; updates discarded by a shutdown
    /// are not counted.
    pub async fn push_update(&self, batch: &[DiscoveryType]) -> Result<usize, WorkerPoolError> {
        let done = self.broadcast_update(batch).await?;
        let completed = futures::future::join_all(done)
            .await
            .into_iter()
            .filter(Result::is_ok)
            .count();
        debug!(completed, "Proxy update finished");
        Ok(completed)
    }

    /// Stop the worker pool; pending broadcast jobs are discarded
    pub async fn shutdown(&self) {
        self.workers.stop().await;
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            connected_proxies: self.proxies.len(),
            cache_node_count: self
                .snapshot_cache
                .as_ref()
                .map(|c| c.stats().node_count)
                .unwrap_or_default(),
            workers: self.workers.worker_count(),
        }
    }
}

/// Server statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStats {
    /// Number of registered proxies
    pub connected_proxies: usize,
    /// Number of proxies with snapshots
    pub cache_node_count: usize,
    /// Workers pushing control-plane-driven updates
    pub workers: usize,
}
