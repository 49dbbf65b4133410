use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use pondlink::client::Client;
use pondlink::config::ClientConfig;
use pondlink::forecast::NullForecaster;
use pondlink::model::SensorReport;
use pondlink::packet::{DecodedFrame, OutboundPacket, Report, TYPE_TAG};
use pondlink::socket::error::{DialError, TransportError};
use pondlink::socket::transport::{Transport, TransportEvent, TransportFactory};
use pondlink::store::MemoryStore;
use pondlink::ui::LogUi;

struct FakeTransport {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_text(&self, frame: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(frame.to_string());
        Ok(())
    }

    async fn close(&self, _code: u16, _reason: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeBackend {
    sessions: Mutex<Vec<(Arc<FakeTransport>, mpsc::Sender<TransportEvent>)>>,
}

impl FakeBackend {
    fn sent(&self) -> Vec<String> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .last()
            .map(|(transport, _)| transport.sent.lock().unwrap().clone())
            .unwrap_or_default()
    }

    async fn push_text(&self, frame: String) {
        let events = self.sessions.lock().unwrap().last().unwrap().1.clone();
        events
            .send(TransportEvent::TextReceived(frame))
            .await
            .expect("worker dropped its event stream");
    }
}

#[async_trait]
impl TransportFactory for FakeBackend {
    async fn dial(
        &self,
        _endpoint: &str,
        _token: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), DialError> {
        let (event_tx, event_rx) = mpsc::channel(16);
        let transport = Arc::new(FakeTransport {
            sent: Mutex::new(Vec::new()),
        });
        self.sessions
            .lock()
            .unwrap()
            .push((transport.clone(), event_tx));
        Ok((transport, event_rx))
    }
}

fn harness() -> (Arc<Client>, Arc<FakeBackend>, Arc<MemoryStore>) {
    let backend = Arc::new(FakeBackend::default());
    let store = Arc::new(MemoryStore::new());
    let client = Client::new(
        ClientConfig::default(),
        backend.clone(),
        store.clone(),
        Arc::new(NullForecaster),
        Arc::new(LogUi),
    )
    .unwrap();
    (client, backend, store)
}

fn sample_report(value: f64) -> SensorReport {
    let mut fields = IndexMap::new();
    fields.insert("DO".to_string(), value);
    SensorReport {
        node_id: "n-1".to_string(),
        sensor_id: "S1".to_string(),
        model: "TNET_100".to_string(),
        fields,
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn report_indices_increment_by_one_across_sends() {
    let (client, backend, _store) = harness();
    client.launch("token-1").await.unwrap();

    client.send_report(sample_report(6.2)).await;
    client.send_report(sample_report(6.3)).await;

    let sent = backend.sent();
    assert_eq!(sent.len(), 2);
    let first: Value = serde_json::from_str(&sent[0]).unwrap();
    let second: Value = serde_json::from_str(&sent[1]).unwrap();
    assert_eq!(first["index"], 0);
    assert_eq!(second["index"], 1);
    assert_eq!(first[TYPE_TAG], "net.pondlink.packet.PacketInReport");
}

#[tokio::test]
async fn sent_report_decodes_back_to_the_original_fields() {
    let (client, backend, _store) = harness();
    client.launch("token-1").await.unwrap();

    let report = sample_report(6.2);
    client.send_report(report.clone()).await;

    let sent = backend.sent();
    match client.registry().decode(&sent[0]).unwrap() {
        DecodedFrame::Outbound(OutboundPacket::Report(Report {
            index,
            report: decoded,
        })) => {
            assert_eq!(index, 0);
            assert_eq!(decoded, report);
            assert!((decoded.fields["DO"] - 6.2).abs() < 1e-9);
        }
        other => panic!("unexpected decode: {other:?}"),
    }
}

#[tokio::test]
async fn receipts_attach_the_backend_id_to_the_stored_record() {
    let (client, backend, store) = harness();
    client.launch("token-1").await.unwrap();

    client.send_report(sample_report(6.2)).await;
    assert_eq!(store.records().await[0].report_id, None);

    backend
        .push_text(
            json!({
                "==": "net.pondlink.packet.PacketOutReportReceipt",
                "index": 0,
                "reportId": "doc-42",
            })
            .to_string(),
        )
        .await;

    for _ in 0..500 {
        if store.records().await[0].report_id.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        store.records().await[0].report_id.as_deref(),
        Some("doc-42")
    );
}

#[tokio::test]
async fn raw_reports_share_the_same_index_sequence() {
    let (client, backend, store) = harness();
    client.launch("token-1").await.unwrap();

    client.send_report(sample_report(6.2)).await;
    client
        .send_raw_report(json!({ "field": "DO", "predicted": [6.1, 6.0] }))
        .await;

    let sent = backend.sent();
    assert_eq!(sent.len(), 2);
    let raw: Value = serde_json::from_str(&sent[1]).unwrap();
    assert_eq!(raw[TYPE_TAG], "net.pondlink.packet.PacketInRawReport");
    assert_eq!(raw["index"], 1);
    assert_eq!(raw["context"]["predicted"][0], 6.1);

    let records = store.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].index, 1);
}
