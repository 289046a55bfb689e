//! Test doubles shared by the unit tests

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::AdsError;
use crate::proto::DiscoveryResponse;
use crate::proxy::ProxySession;
use crate::snapshot::SnapshotStore;
use crate::transport::{DiscoveryTransport, TransportError};
use crate::xds::DiscoveryType;
use crate::xds::types::Resource;

/// Transport keeping every response it is handed
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<DiscoveryResponse>>,
    fail_types: HashSet<DiscoveryType>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport refusing responses of the given types
    pub fn failing_on(types: &[DiscoveryType]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_types: types.iter().copied().collect(),
        }
    }

    pub fn responses(&self) -> Vec<DiscoveryResponse> {
        self.sent.lock().clone()
    }

    /// Types of the delivered responses, in send order
    pub fn sent_types(&self) -> Vec<DiscoveryType> {
        self.sent
            .lock()
            .iter()
            .filter_map(|r| DiscoveryType::from_type_url(&r.type_url))
            .collect()
    }
}

#[async_trait]
impl DiscoveryTransport for RecordingTransport {
    async fn send(&self, response: DiscoveryResponse) -> Result<(), TransportError> {
        let failing = DiscoveryType::from_type_url(&response.type_url)
            .is_some_and(|t| self.fail_types.contains(&t));
        if failing {
            return Err(TransportError("stream reset".to_string()));
        }
        self.sent.lock().push(response);
        Ok(())
    }
}

/// Snapshot store refusing every commit
pub struct RejectingStore;

impl SnapshotStore for RejectingStore {
    fn record_full_snapshot(
        &self,
        _proxy: &ProxySession,
        _resources: HashMap<DiscoveryType, Vec<Resource>>,
    ) -> Result<u64, AdsError> {
        Err(AdsError::SnapshotCommit("store unavailable".to_string()))
    }
}

pub fn proxy() -> ProxySession {
    ProxySession::new(Uuid::new_v4(), "bookstore.default")
}

pub fn names(values: &[&str]) -> HashSet<String> {
    values.iter().map(|s| s.to_string()).collect()
}
