//! Response dispatcher
//!
//! Generates and delivers the responses of an ordered batch of discovery
//! types for one proxy. Types are processed one after the other in the order
//! supplied; a failing type is logged and skipped, never aborting the batch.
//!
//! In [`DeliveryMode::Immediate`] every type is sent as soon as it is
//! generated. In [`DeliveryMode::Snapshot`] the generated types are collected
//! and committed to the snapshot store in one write after the batch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, trace, warn};

use crate::config::MeshConfigView;
use crate::debugger::XdsDebugRecorder;
use crate::error::AdsError;
use crate::metrics;
use crate::proto::DiscoveryRequest;
use crate::proxy::ProxySession;
use crate::registry::GeneratorRegistry;
use crate::response::send_discovery_response;
use crate::snapshot::SnapshotStore;
use crate::transport::DiscoveryTransport;
use crate::xds::types::Resource;
use crate::xds::{ADS_LABEL, DiscoveryType, is_full_update};

/// How generated resources reach the proxy
#[derive(Clone)]
pub enum DeliveryMode {
    /// Send a response per type right away
    Immediate,
    /// Commit all generated types to the snapshot store after the batch
    Snapshot(Arc<dyn SnapshotStore>),
}

impl fmt::Debug for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Immediate => f.write_str("Immediate"),
            DeliveryMode::Snapshot(_) => f.write_str("Snapshot"),
        }
    }
}

/// Outcome of one type of a dispatched batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeOutcome {
    /// A response was sent to the proxy
    Sent,
    /// The resources were part of a committed snapshot
    Cached,
    Failed(AdsError),
}

/// Per-type outcomes of a dispatch call, in batch order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcomes: Vec<(DiscoveryType, TypeOutcome)>,
    /// Version of the committed snapshot (snapshot mode only)
    pub snapshot_version: Option<u64>,
}

impl DispatchReport {
    pub fn outcome(&self, discovery_type: DiscoveryType) -> Option<&TypeOutcome> {
        self.outcomes
            .iter()
            .find(|(t, _)| *t == discovery_type)
            .map(|(_, outcome)| outcome)
    }

    pub fn failed_types(&self) -> Vec<DiscoveryType> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, TypeOutcome::Failed(_)))
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_types().is_empty()
    }

    /// Collapse into the transport result of the call: the last transport
    /// failure, if any. Other failures only show in the report.
    pub fn into_result(self) -> Result<(), AdsError> {
        match self
            .outcomes
            .into_iter()
            .rev()
            .find_map(|(_, outcome)| match outcome {
                TypeOutcome::Failed(e) if e.is_transport() => Some(e),
                _ => None,
            }) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Orchestrates resource generation and delivery for proxies
pub struct ResponseDispatcher {
    registry: Arc<GeneratorRegistry>,
    mesh_config: Arc<dyn MeshConfigView>,
    debug_log: Arc<dyn XdsDebugRecorder>,
    mode: DeliveryMode,
    control_plane_id: String,
}

impl ResponseDispatcher {
    pub fn new(
        registry: Arc<GeneratorRegistry>,
        mesh_config: Arc<dyn MeshConfigView>,
        debug_log: Arc<dyn XdsDebugRecorder>,
        mode: DeliveryMode,
        control_plane_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            mesh_config,
            debug_log,
            mode,
            control_plane_id: control_plane_id.into(),
        }
    }

    pub fn mode(&self) -> &DeliveryMode {
        &self.mode
    }

    pub fn registry(&self) -> &GeneratorRegistry {
        &self.registry
    }

    /// Invoke the generator registered for the request's type
    pub async fn get_type_resources(
        &self,
        proxy: &ProxySession,
        request: &DiscoveryRequest,
    ) -> Result<Vec<Resource>, AdsError> {
        let started_at = Instant::now();
        let discovery_type = request
            .discovery_type()
            .ok_or_else(|| AdsError::UnknownType(request.type_url.clone()))?;
        trace!(proxy = %proxy, discovery_type = %discovery_type, "Getting resources");

        let generator = self
            .registry
            .get(discovery_type)
            .ok_or_else(|| AdsError::UnknownType(request.type_url.clone()))?;

        if self.mesh_config.is_debug_server_enabled() {
            self.debug_log
                .record(&proxy.name(), discovery_type, Utc::now());
        }

        match generator.generate(proxy, request).await {
            Ok(resources) => {
                metrics::record_xds_path(started_at, discovery_type.short(), proxy, true);
                Ok(resources)
            }
            Err(e) => {
                warn!(
                    proxy = %proxy,
                    discovery_type = %discovery_type,
                    error = %format!("{:#}", e),
                    "Resource generator failed"
                );
                metrics::record_xds_path(started_at, discovery_type.short(), proxy, false);
                Err(AdsError::ResourceGeneration(discovery_type))
            }
        }
    }

    /// Generate and deliver every type of `batch`, in order.
    ///
    /// Without a request (control-plane-driven push) a request is synthesized
    /// per type from the proxy's subscriptions. A request is only used for the
    /// type it names.
    pub async fn dispatch_with_report(
        &self,
        proxy: &ProxySession,
        transport: &dyn DiscoveryTransport,
        request: Option<&DiscoveryRequest>,
        batch: &[DiscoveryType],
    ) -> DispatchReport {
        let started_at = Instant::now();
        let mut report = DispatchReport::default();
        let mut cached: HashMap<DiscoveryType, Vec<Resource>> = HashMap::new();

        for discovery_type in batch.iter().copied() {
            let request = resolve_request(proxy, request, discovery_type);

            let resources = match self.get_type_resources(proxy, &request).await {
                Ok(resources) => resources,
                Err(e) => {
                    error!(
                        err_code = %e.code(),
                        proxy = %proxy,
                        discovery_type = %discovery_type,
                        error = %e,
                        "Error generating response"
                    );
                    report.outcomes.push((discovery_type, TypeOutcome::Failed(e)));
                    continue;
                }
            };

            match &self.mode {
                DeliveryMode::Snapshot(_) => {
                    cached.insert(discovery_type, resources);
                    report.outcomes.push((discovery_type, TypeOutcome::Cached));
                }
                DeliveryMode::Immediate => {
                    let outcome = match send_discovery_response(
                        proxy,
                        &request,
                        transport,
                        &resources,
                        &self.control_plane_id,
                    )
                    .await
                    {
                        Ok(()) => TypeOutcome::Sent,
                        Err(e) => TypeOutcome::Failed(e),
                    };
                    report.outcomes.push((discovery_type, outcome));
                }
            }
        }

        if let DeliveryMode::Snapshot(store) = &self.mode {
            self.commit_snapshot(store.as_ref(), proxy, cached, &mut report);
        }

        if is_full_update(batch) {
            metrics::record_xds_path(started_at, ADS_LABEL, proxy, !report.has_failures());
        }

        report
    }

    /// Same as [`Self::dispatch_with_report`], reporting only the last
    /// transport failure of the batch
    pub async fn dispatch(
        &self,
        proxy: &ProxySession,
        transport: &dyn DiscoveryTransport,
        request: Option<&DiscoveryRequest>,
        batch: &[DiscoveryType],
    ) -> Result<(), AdsError> {
        self.dispatch_with_report(proxy, transport, request, batch)
            .await
            .into_result()
    }

    fn commit_snapshot(
        &self,
        store: &dyn SnapshotStore,
        proxy: &ProxySession,
        resources: HashMap<DiscoveryType, Vec<Resource>>,
        report: &mut DispatchReport,
    ) {
        match store.record_full_snapshot(proxy, resources) {
            Ok(version) => {
                debug!(proxy = %proxy, version, "Recorded snapshot");
                report.snapshot_version = Some(version);
            }
            Err(e) => {
                error!(
                    err_code = %e.code(),
                    proxy = %proxy,
                    error = %e,
                    "Error recording snapshot"
                );
                metrics::record_snapshot_commit_error(proxy);
                for (_, outcome) in report.outcomes.iter_mut() {
                    if *outcome == TypeOutcome::Cached {
                        *outcome = TypeOutcome::Failed(e.clone());
                    }
                }
            }
        }
    }
}

/// The request to generate `discovery_type` from
pub(crate) fn resolve_request(
    proxy: &ProxySession,
    request: Option<&DiscoveryRequest>,
    discovery_type: DiscoveryType,
) -> DiscoveryRequest {
    if let Some(request) = request
        && request.discovery_type() == Some(discovery_type)
    {
        return request.clone();
    }

    let resource_names = if discovery_type.is_wildcard() {
        Vec::new()
    } else {
        let mut names: Vec<String> = proxy
            .subscribed_resources(discovery_type)
            .into_iter()
            .collect();
        names.sort();
        names
    };
    DiscoveryRequest::for_type(discovery_type, resource_names)
}
