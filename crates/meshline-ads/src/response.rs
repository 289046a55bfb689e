//! Discovery response builder
//!
//! Builds and transmits one [`DiscoveryResponse`] for one discovery type of
//! one proxy.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, error, trace, warn};

use crate::error::AdsError;
use crate::metrics;
use crate::proto::{ControlPlane, DiscoveryRequest, DiscoveryResponse};
use crate::proxy::ProxySession;
use crate::transport::DiscoveryTransport;
use crate::xds::DiscoveryType;
use crate::xds::types::Resource;

/// Difference between the names a request asked for and the names produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDiff {
    /// Requested but not produced
    pub missing: BTreeSet<String>,
    /// Produced but not requested
    pub unrequested: BTreeSet<String>,
}

impl RequestDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unrequested.is_empty()
    }
}

/// Cross-check requested and produced resource names.
///
/// Wildcard requests (no names) are not checked. The result is diagnostic
/// only and never prevents a response from being sent.
pub fn validate_request_response(
    proxy: &ProxySession,
    request: &DiscoveryRequest,
    resources: &[Resource],
) -> RequestDiff {
    if request.resource_names.is_empty() {
        return RequestDiff::default();
    }

    let requested: BTreeSet<&str> = request.resource_names.iter().map(String::as_str).collect();
    let produced: BTreeSet<&str> = resources.iter().map(Resource::name).collect();
    let diff = RequestDiff {
        missing: requested
            .difference(&produced)
            .map(|s| s.to_string())
            .collect(),
        unrequested: produced
            .difference(&requested)
            .map(|s| s.to_string())
            .collect(),
    };

    if !diff.missing.is_empty() {
        warn!(
            proxy = %proxy,
            type_url = %request.type_url,
            missing = ?diff.missing,
            "Requested resources were not generated"
        );
    }
    if !diff.unrequested.is_empty() {
        debug!(
            proxy = %proxy,
            type_url = %request.type_url,
            unrequested = ?diff.unrequested,
            "Generated resources were not requested"
        );
    }
    diff
}

/// Build a response for `request`'s type and send it to the proxy.
///
/// Resources that fail to serialize are dropped and logged; the response is
/// still sent with the rest. On success the subscribed resources that were
/// delivered become the proxy's last sent set for the type.
pub async fn send_discovery_response(
    proxy: &ProxySession,
    request: &DiscoveryRequest,
    transport: &dyn DiscoveryTransport,
    resources: &[Resource],
    control_plane_id: &str,
) -> Result<(), AdsError> {
    let discovery_type = request
        .discovery_type()
        .ok_or_else(|| AdsError::UnknownType(request.type_url.clone()))?;

    // version and nonce must pair with the sent set of the same build
    let build_lock = proxy.build_lock(discovery_type);
    let _guard = build_lock.lock().await;

    let mut response = DiscoveryResponse {
        version_info: proxy
            .increment_last_sent_version(discovery_type)
            .to_string(),
        nonce: proxy.set_new_nonce(discovery_type),
        type_url: request.type_url.clone(),
        control_plane: Some(ControlPlane {
            identifier: control_plane_id.to_string(),
        }),
        ..Default::default()
    };

    let subscribed = proxy.subscribed_resources(discovery_type);
    let mut resources_sent = HashSet::new();
    for resource in resources {
        let any = match resource.to_any() {
            Ok(any) => any,
            Err(e) => {
                error!(
                    err_code = %e.code(),
                    proxy = %proxy,
                    type_url = %request.type_url,
                    error = %e,
                    "Error marshalling resource"
                );
                continue;
            }
        };
        response.resources.push(any);

        // unsolicited resources are sent but never count as delivered
        if !discovery_type.is_wildcard() {
            if subscribed.contains(resource.name()) {
                resources_sent.insert(resource.name().to_string());
            } else {
                debug!(
                    proxy = %proxy,
                    discovery_type = %discovery_type,
                    resource = resource.name(),
                    "Sending unsubscribed resource"
                );
            }
        }
    }

    // never log the response itself, it may carry key material
    trace!(
        type_url = %response.type_url,
        version = %response.version_info,
        resources = response.resources.len(),
        "Constructed discovery response"
    );

    validate_request_response(proxy, request, resources);

    if let Err(e) = transport.send(response).await {
        metrics::record_response_send(proxy, discovery_type, false);
        let err = AdsError::Transport {
            discovery_type,
            reason: e.to_string(),
        };
        error!(
            err_code = %err.code(),
            proxy = %proxy,
            discovery_type = %discovery_type,
            error = %e,
            "Error sending discovery response"
        );
        return Err(err);
    }

    proxy.set_last_resources_sent(discovery_type, resources_sent);
    metrics::record_response_send(proxy, discovery_type, true);
    Ok(())
}
