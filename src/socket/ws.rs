use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::socket::error::{DialError, TransportError};
use crate::socket::transport::{Transport, TransportEvent, TransportFactory};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// WebSocket transport speaking the tagged-JSON text protocol.
pub struct WsTransport {
    sink: Mutex<Option<WsSink>>,
}

impl WsTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&self, frame: &str) -> Result<(), TransportError> {
        let mut sink_guard = self.sink.lock().await;
        let sink = sink_guard.as_mut().ok_or(TransportError::SocketClosed)?;
        debug!(target: "Client/Socket", "--> Sending frame: {} bytes", frame.len());
        sink.send(Message::text(frame))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        let mut sink_guard = self.sink.lock().await;
        let sink = sink_guard.as_mut().ok_or(TransportError::SocketClosed)?;
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        let result = sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()));
        *sink_guard = None;
        result
    }
}

/// Factory dialing TLS WebSocket sessions with bearer-token auth.
#[derive(Default)]
pub struct WsTransportFactory;

impl WsTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for WsTransportFactory {
    async fn dial(
        &self,
        endpoint: &str,
        token: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), DialError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| DialError::Failed(e.into()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| DialError::Failed(e.into()))?;
        request.headers_mut().insert(header::AUTHORIZATION, bearer);

        info!(target: "Client/Socket", "Dialing {endpoint}");
        let (ws, _response) = match connect_async(request).await {
            Ok(pair) => pair,
            Err(tungstenite::Error::Http(response))
                if response.status() == StatusCode::UNAUTHORIZED =>
            {
                return Err(DialError::AuthExpired);
            }
            Err(e) => return Err(DialError::Failed(e.into())),
        };

        let (sink, stream) = ws.split();
        let (event_tx, event_rx) = mpsc::channel(100);
        let transport = Arc::new(WsTransport::new(sink));
        tokio::task::spawn(read_pump(stream, event_tx));

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(target: "Client/Socket", "<-- Received frame: {} bytes", text.len());
                if event_tx
                    .send(TransportEvent::TextReceived(text.as_str().to_string()))
                    .await
                    .is_err()
                {
                    trace!(target: "Client/Socket", "Event receiver dropped, closing read pump");
                    return;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                if event_tx
                    .send(TransportEvent::BinaryReceived(data.to_vec()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                trace!(target: "Client/Socket", "Keepalive frame");
            }
            Some(Ok(Message::Close(frame))) => {
                info!(target: "Client/Socket", "Peer closed the session: {frame:?}");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(target: "Client/Socket", "Error reading from websocket: {e}");
                break;
            }
            None => {
                trace!(target: "Client/Socket", "Websocket stream ended");
                break;
            }
        }
    }

    let _ = event_tx.send(TransportEvent::Disconnected).await;
}
