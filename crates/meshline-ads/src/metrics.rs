// Metrics for the ADS response engine
// Recorded through the `metrics` facade; the exporter is installed by the host binary

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::proxy::ProxySession;
use crate::xds::DiscoveryType;

pub const XDS_PATH_DURATION: &str = "xds_path_duration_seconds";
pub const XDS_PATH_TOTAL: &str = "xds_path_total";
pub const PROXY_RESPONSE_SEND_SUCCESS: &str = "proxy_response_send_success_total";
pub const PROXY_RESPONSE_SEND_ERROR: &str = "proxy_response_send_error_total";
pub const SNAPSHOT_COMMIT_ERROR: &str = "snapshot_commit_error_total";

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn init_metrics() {
    describe_histogram!(
        XDS_PATH_DURATION,
        "Time spent generating and delivering xDS resources, per type"
    );
    describe_counter!(XDS_PATH_TOTAL, "Total number of xDS generation paths");
    describe_counter!(
        PROXY_RESPONSE_SEND_SUCCESS,
        "Total number of discovery responses sent to proxies"
    );
    describe_counter!(
        PROXY_RESPONSE_SEND_ERROR,
        "Total number of discovery responses that failed to send"
    );
    describe_counter!(
        SNAPSHOT_COMMIT_ERROR,
        "Total number of rejected snapshot commits"
    );

    tracing::info!("ADS metrics initialized");
}

/// Record the duration of one xDS path (a type, or `ADS` for a full update)
pub fn record_xds_path(
    started_at: Instant,
    type_label: &str,
    proxy: &ProxySession,
    success: bool,
) {
    let elapsed = started_at.elapsed().as_secs_f64();
    let identity = proxy.identity().to_string();
    histogram!(XDS_PATH_DURATION, "type" => type_label.to_string(), "identity" => identity.clone(), "success" => success.to_string()).record(elapsed);
    counter!(XDS_PATH_TOTAL, "type" => type_label.to_string(), "identity" => identity, "success" => success.to_string()).increment(1);
}

/// Record the outcome of sending a discovery response
pub fn record_response_send(proxy: &ProxySession, discovery_type: DiscoveryType, success: bool) {
    let name = if success {
        PROXY_RESPONSE_SEND_SUCCESS
    } else {
        PROXY_RESPONSE_SEND_ERROR
    };
    counter!(name, "proxy_uuid" => proxy.uuid().to_string(), "identity" => proxy.identity().to_string(), "type" => discovery_type.type_url()).increment(1);
}

/// Record a snapshot commit the cache refused
pub fn record_snapshot_commit_error(proxy: &ProxySession) {
    counter!(SNAPSHOT_COMMIT_ERROR, "identity" => proxy.identity().to_string()).increment(1);
}
