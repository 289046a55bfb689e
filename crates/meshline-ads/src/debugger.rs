//! xDS debug log
//!
//! When the debug server is enabled, every resource generation is recorded
//! as a (proxy, type, timestamp) tuple so operators can inspect how often
//! each proxy is being updated.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::xds::DiscoveryType;

/// Write side of the debug log
pub trait XdsDebugRecorder: Send + Sync {
    fn record(&self, proxy_name: &str, discovery_type: DiscoveryType, at: DateTime<Utc>);
}

/// In-memory debug log served by the debug server
#[derive(Debug, Default)]
pub struct XdsDebugLog {
    entries: DashMap<String, HashMap<DiscoveryType, Vec<DateTime<Utc>>>>,
}

impl XdsDebugLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded timestamp, keyed by proxy then type
    pub fn get_xds_log(&self) -> HashMap<String, HashMap<DiscoveryType, Vec<DateTime<Utc>>>> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Forget a disconnected proxy
    pub fn remove_proxy(&self, proxy_name: &str) {
        self.entries.remove(proxy_name);
    }
}

impl XdsDebugRecorder for XdsDebugLog {
    fn record(&self, proxy_name: &str, discovery_type: DiscoveryType, at: DateTime<Utc>) {
        self.entries
            .entry(proxy_name.to_string())
            .or_default()
            .entry(discovery_type)
            .or_default()
            .push(at);
    }
}
