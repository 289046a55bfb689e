//! Transport handle of a proxy's ADS stream

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::proto::DiscoveryResponse;

/// Error returned when a response cannot be handed to the stream
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Outgoing half of a proxy's discovery stream
#[async_trait]
pub trait DiscoveryTransport: Send + Sync {
    async fn send(&self, response: DiscoveryResponse) -> Result<(), TransportError>;
}

/// Items yielded by the gRPC response stream of a proxy
pub type StreamItem = Result<DiscoveryResponse, tonic::Status>;

/// Transport feeding the response stream of a gRPC ADS call
#[derive(Debug, Clone)]
pub struct StreamTransport {
    sender: mpsc::Sender<StreamItem>,
}

impl StreamTransport {
    pub fn new(sender: mpsc::Sender<StreamItem>) -> Self {
        Self { sender }
    }

    /// Create a transport and the receiver the gRPC layer streams from
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<StreamItem>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait]
impl DiscoveryTransport for StreamTransport {
    async fn send(&self, response: DiscoveryResponse) -> Result<(), TransportError> {
        self.sender
            .send(Ok(response))
            .await
            .map_err(|_| TransportError("proxy stream closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_transport_delivers() {
        let (transport, mut rx) = StreamTransport::channel(4);
        transport
            .send(DiscoveryResponse {
                version_info: "1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let received = rx.recv().await.unwrap().unwrap();
        assert_eq!(received.version_info, "1");
    }

    #[tokio::test]
    async fn test_stream_transport_closed() {
        let (transport, rx) = StreamTransport::channel(4);
        drop(rx);
        assert!(transport.is_closed());
        assert!(transport.send(DiscoveryResponse::default()).await.is_err());
    }
}
