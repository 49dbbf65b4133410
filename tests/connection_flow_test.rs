use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use pondlink::client::Client;
use pondlink::config::ClientConfig;
use pondlink::forecast::NullForecaster;
use pondlink::packet::RequestWeather;
use pondlink::socket::error::{DialError, TransportError};
use pondlink::socket::transport::{Transport, TransportEvent, TransportFactory};
use pondlink::socket::{ConnState, NORMAL_CLOSE};
use pondlink::store::MemoryStore;
use pondlink::ui::UiLink;

struct FakeTransport {
    sent: Mutex<Vec<String>>,
    closed: Mutex<Option<(u16, String)>>,
    events: mpsc::Sender<TransportEvent>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_text(&self, frame: &str) -> Result<(), TransportError> {
        if self.closed.lock().unwrap().is_some() {
            return Err(TransportError::SocketClosed);
        }
        self.sent.lock().unwrap().push(frame.to_string());
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        *self.closed.lock().unwrap() = Some((code, reason.to_string()));
        // The fake peer echoes the close right away.
        let _ = self.events.try_send(TransportEvent::Disconnected);
        Ok(())
    }
}

struct FakeSession {
    token: String,
    transport: Arc<FakeTransport>,
    events: mpsc::Sender<TransportEvent>,
}

/// Scriptable server side: hands out fake transports and keeps a handle to
/// every dialed session.
#[derive(Default)]
struct FakeBackend {
    reject: AtomicBool,
    fail: AtomicBool,
    sessions: Mutex<Vec<FakeSession>>,
}

impl FakeBackend {
    fn dials(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn token(&self, dial: usize) -> String {
        self.sessions.lock().unwrap()[dial].token.clone()
    }

    fn sent(&self, dial: usize) -> Vec<String> {
        self.sessions.lock().unwrap()[dial]
            .transport
            .sent
            .lock()
            .unwrap()
            .clone()
    }

    fn closed(&self, dial: usize) -> Option<(u16, String)> {
        self.sessions.lock().unwrap()[dial]
            .transport
            .closed
            .lock()
            .unwrap()
            .clone()
    }

    async fn push_text(&self, dial: usize, frame: impl Into<String>) {
        let events = self.sessions.lock().unwrap()[dial].events.clone();
        events
            .send(TransportEvent::TextReceived(frame.into()))
            .await
            .expect("worker dropped its event stream");
    }

    async fn push_binary(&self, dial: usize, data: Vec<u8>) {
        let events = self.sessions.lock().unwrap()[dial].events.clone();
        events
            .send(TransportEvent::BinaryReceived(data))
            .await
            .expect("worker dropped its event stream");
    }

    async fn hang_up(&self, dial: usize) {
        let events = self.sessions.lock().unwrap()[dial].events.clone();
        let _ = events.send(TransportEvent::Disconnected).await;
    }
}

#[async_trait]
impl TransportFactory for FakeBackend {
    async fn dial(
        &self,
        _endpoint: &str,
        token: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), DialError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(DialError::AuthExpired);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(DialError::Failed(anyhow::anyhow!("connection refused")));
        }
        let (event_tx, event_rx) = mpsc::channel(16);
        let transport = Arc::new(FakeTransport {
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(None),
            events: event_tx.clone(),
        });
        self.sessions.lock().unwrap().push(FakeSession {
            token: token.to_string(),
            transport: transport.clone(),
            events: event_tx,
        });
        Ok((transport, event_rx))
    }
}

#[derive(Default)]
struct ProbeUi {
    connected: AtomicUsize,
    auth_expired: AtomicUsize,
    failures: Mutex<Vec<i64>>,
}

impl UiLink for ProbeUi {
    fn connected(&self) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn auth_expired(&self) {
        self.auth_expired.fetch_add(1, Ordering::SeqCst);
    }

    fn profile_received(&self, _username: &str) {}
    fn device_report(&self, _sensor_id: &str) {}

    fn failure(&self, code: i64) {
        self.failures.lock().unwrap().push(code);
    }
}

fn client(backend: Arc<FakeBackend>, ui: Arc<ProbeUi>) -> Arc<Client> {
    let config = ClientConfig {
        signature: "sig-abc".to_string(),
        ..ClientConfig::default()
    };
    Client::new(
        config,
        backend,
        Arc::new(MemoryStore::new()),
        Arc::new(NullForecaster),
        ui,
    )
    .unwrap()
}

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("never observed: {what}");
}

#[tokio::test]
async fn launch_carries_the_token_and_comes_online() {
    let backend = Arc::new(FakeBackend::default());
    let ui = Arc::new(ProbeUi::default());
    let client = client(backend.clone(), ui.clone());

    client.launch("token-1").await.unwrap();

    assert_eq!(backend.dials(), 1);
    assert_eq!(backend.token(0), "token-1");
    assert_eq!(client.connection_state().await, Some(ConnState::Online));
    wait_for("connected signal", || {
        ui.connected.load(Ordering::SeqCst) == 1
    })
    .await;
}

#[tokio::test]
async fn relaunch_stops_the_previous_worker_first() {
    let backend = Arc::new(FakeBackend::default());
    let client = client(backend.clone(), Arc::new(ProbeUi::default()));

    client.launch("token-1").await.unwrap();
    client.launch("token-2").await.unwrap();

    assert_eq!(backend.dials(), 2);
    let (code, reason) = backend.closed(0).expect("first session never closed");
    assert_eq!(code, NORMAL_CLOSE);
    assert_eq!(reason, "Connection handoff");
    assert_eq!(backend.token(1), "token-2");
    assert_eq!(client.connection_state().await, Some(ConnState::Online));
}

#[tokio::test]
async fn send_before_any_launch_is_dropped() {
    let backend = Arc::new(FakeBackend::default());
    let client = client(backend.clone(), Arc::new(ProbeUi::default()));

    client.send(RequestWeather {}.into()).await;

    assert_eq!(backend.dials(), 0);
}

#[tokio::test]
async fn dead_worker_is_relaunched_once_with_the_last_token() {
    let backend = Arc::new(FakeBackend::default());
    let client = client(backend.clone(), Arc::new(ProbeUi::default()));

    client.launch("token-1").await.unwrap();
    backend.hang_up(0).await;
    for _ in 0..500 {
        if client.connection_state().await == Some(ConnState::Closed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(client.connection_state().await, Some(ConnState::Closed));

    client.send(RequestWeather {}.into()).await;

    assert_eq!(backend.dials(), 2);
    assert_eq!(backend.token(1), "token-1");
    let sent = backend.sent(1);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("PacketInRequestWeather"));
}

#[tokio::test]
async fn rejected_token_surfaces_as_auth_expired() {
    let backend = Arc::new(FakeBackend::default());
    let ui = Arc::new(ProbeUi::default());
    let client = client(backend.clone(), ui.clone());
    backend.reject.store(true, Ordering::SeqCst);

    let err = client.launch("stale-token").await.unwrap_err();

    assert!(matches!(
        err,
        pondlink::socket::LaunchError::AuthExpired
    ));
    assert_eq!(ui.auth_expired.load(Ordering::SeqCst), 1);
    assert_eq!(backend.dials(), 0);
}

#[tokio::test]
async fn failed_dial_surfaces_as_a_connect_error() {
    let backend = Arc::new(FakeBackend::default());
    let ui = Arc::new(ProbeUi::default());
    let client = client(backend.clone(), ui.clone());
    backend.fail.store(true, Ordering::SeqCst);

    let err = client.launch("token-1").await.unwrap_err();

    assert!(matches!(err, pondlink::socket::LaunchError::Connect(_)));
    assert_eq!(ui.auth_expired.load(Ordering::SeqCst), 0);
    assert_eq!(backend.dials(), 0);
    assert_eq!(client.connection_state().await, None);
}

#[tokio::test]
async fn bad_frames_never_end_the_receive_loop() {
    let backend = Arc::new(FakeBackend::default());
    let ui = Arc::new(ProbeUi::default());
    let client = client(backend.clone(), ui.clone());

    client.launch("token-1").await.unwrap();
    backend.push_text(0, "{this is not json").await;
    backend.push_binary(0, vec![0x01, 0x02, 0x03]).await;
    backend
        .push_text(0, json!({ "==": "net.pondlink.packet.PacketOutFuture" }).to_string())
        .await;
    backend
        .push_text(
            0,
            json!({ "==": "net.pondlink.packet.PacketOutFailure", "code": "mistyped" }).to_string(),
        )
        .await;
    backend
        .push_text(
            0,
            json!({ "==": "net.pondlink.packet.PacketOutFailure", "code": 418 }).to_string(),
        )
        .await;

    wait_for("failure signal", || {
        ui.failures.lock().unwrap().as_slice() == [418]
    })
    .await;
    assert_eq!(client.connection_state().await, Some(ConnState::Online));
}

#[tokio::test]
async fn registration_request_is_answered_with_the_node_signature() {
    let backend = Arc::new(FakeBackend::default());
    let client = client(backend.clone(), Arc::new(ProbeUi::default()));

    client.launch("token-1").await.unwrap();
    backend
        .push_text(
            0,
            json!({ "==": "net.pondlink.packet.PacketOutRequestNodeRegistration" }).to_string(),
        )
        .await;

    wait_for("registration reply", || {
        backend
            .sent(0)
            .iter()
            .any(|frame| frame.contains("PacketInNodeRegistration") && frame.contains("sig-abc"))
    })
    .await;
}

#[tokio::test]
async fn stop_is_idempotent_and_reports_the_reason() {
    let backend = Arc::new(FakeBackend::default());
    let client = client(backend.clone(), Arc::new(ProbeUi::default()));

    client.launch("token-1").await.unwrap();
    client.stop(NORMAL_CLOSE, "Client shutdown").await;
    client.stop(NORMAL_CLOSE, "Client shutdown").await;

    let (code, reason) = backend.closed(0).expect("session never closed");
    assert_eq!(code, NORMAL_CLOSE);
    assert_eq!(reason, "Client shutdown");
    assert_eq!(client.connection_state().await, Some(ConnState::Closed));
}
