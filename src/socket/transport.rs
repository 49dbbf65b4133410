use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::socket::error::{DialError, TransportError};

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A text frame has been received from the server.
    TextReceived(String),
    /// A binary frame has been received; the protocol never uses these.
    BinaryReceived(Vec<u8>),
    /// The connection was lost or closed by the peer.
    Disconnected,
}

/// Represents an active socket session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one text frame to the server.
    async fn send_text(&self, frame: &str) -> Result<(), TransportError>;

    /// Sends a close frame with the given code and reason, then drops the
    /// write half. Subsequent sends fail with `SocketClosed`.
    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// A factory responsible for dialing new socket sessions.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Dials the endpoint, authenticating with a bearer token, and returns
    /// the transport along with its event stream.
    async fn dial(
        &self,
        endpoint: &str,
        token: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), DialError>;
}
