use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{error, info, warn};
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell, oneshot};

use crate::config::ClientConfig;
use crate::forecast::Forecaster;
use crate::model::{Node, Pond, Sensor, SensorReport, SensorStructure};
use crate::monitor::supervisor::MonitorSupervisor;
use crate::packet::registry::RegistryError;
use crate::packet::{OutboundPacket, PacketRegistry, RawReport, Report, standard_registry};
use crate::socket::conn::{self, ConnState, ConnectionHandle, NORMAL_CLOSE};
use crate::socket::error::LaunchError;
use crate::socket::transport::TransportFactory;
use crate::store::{ReportRecord, ReportStore};
use crate::ui::UiLink;

/// Everything the backend told us about this node, cached from the last
/// `Profile` packet.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub pond: Pond,
    pub node: Node,
    pub sensors: Vec<Sensor>,
    pub structures: Vec<SensorStructure>,
}

struct WorkerSlot {
    handle: ConnectionHandle,
    token: String,
}

/// The application-wide client facade. At most one connection worker is
/// alive at a time; the facade owns the handoff between them and keeps the
/// last session token for transparent relaunches.
pub struct Client {
    pub config: ClientConfig,
    registry: Arc<PacketRegistry>,
    transport_factory: Arc<dyn TransportFactory>,
    store: Arc<dyn ReportStore>,
    forecaster: Arc<dyn Forecaster>,
    ui: Arc<dyn UiLink>,
    monitors: OnceCell<Arc<MonitorSupervisor>>,
    worker: Mutex<Option<WorkerSlot>>,
    session: Mutex<Option<Session>>,
    report_index: AtomicU64,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        transport_factory: Arc<dyn TransportFactory>,
        store: Arc<dyn ReportStore>,
        forecaster: Arc<dyn Forecaster>,
        ui: Arc<dyn UiLink>,
    ) -> Result<Arc<Self>, RegistryError> {
        let registry = Arc::new(standard_registry()?);
        Ok(Arc::new(Self {
            config,
            registry,
            transport_factory,
            store,
            forecaster,
            ui,
            monitors: OnceCell::new(),
            worker: Mutex::new(None),
            session: Mutex::new(None),
            report_index: AtomicU64::new(0),
        }))
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.registry
    }

    pub fn transport_factory(&self) -> &Arc<dyn TransportFactory> {
        &self.transport_factory
    }

    pub fn store(&self) -> &Arc<dyn ReportStore> {
        &self.store
    }

    pub fn forecaster(&self) -> &Arc<dyn Forecaster> {
        &self.forecaster
    }

    pub fn ui(&self) -> &Arc<dyn UiLink> {
        &self.ui
    }

    /// Wires the monitor supervisor in after construction; the supervisor
    /// needs the client and the client needs the supervisor.
    pub fn wire_monitors(&self, monitors: Arc<MonitorSupervisor>) {
        if self.monitors.set(monitors).is_err() {
            warn!(target: "Client", "Monitor supervisor already wired");
        }
    }

    pub fn monitors(&self) -> Option<Arc<MonitorSupervisor>> {
        self.monitors.get().cloned()
    }

    pub async fn session(&self) -> Option<Session> {
        self.session.lock().await.clone()
    }

    pub(crate) async fn set_session(&self, session: Session) {
        *self.session.lock().await = Some(session);
    }

    pub(crate) async fn append_sensor(&self, sensor: Sensor, structure: Option<SensorStructure>) {
        let mut guard = self.session.lock().await;
        match guard.as_mut() {
            Some(session) => {
                if let Some(structure) = structure {
                    if !session.structures.iter().any(|s| s.model == structure.model) {
                        session.structures.push(structure);
                    }
                }
                session.sensors.push(sensor);
            }
            None => warn!(target: "Client", "No session yet, dropping provisioned sensor"),
        }
    }

    /// Allocates the next report index. Indices are process-local and only
    /// ever move forward.
    pub fn next_report_index(&self) -> u64 {
        self.report_index.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn connection_state(&self) -> Option<ConnState> {
        let slot = self.worker.lock().await;
        slot.as_ref().map(|worker| worker.handle.state())
    }

    /// Brings a session online with the given token. Any previous worker is
    /// stopped completely before its successor is spawned, so two workers
    /// never share the wire. The token is retained on success for
    /// transparent relaunches.
    pub async fn launch(self: &Arc<Self>, token: &str) -> Result<(), LaunchError> {
        let mut slot = self.worker.lock().await;
        self.launch_locked(&mut slot, token).await
    }

    async fn launch_locked(
        self: &Arc<Self>,
        slot: &mut Option<WorkerSlot>,
        token: &str,
    ) -> Result<(), LaunchError> {
        if let Some(previous) = slot.take() {
            if previous.handle.is_alive() {
                info!(target: "Client", "Stopping previous worker before relaunch");
                previous.handle.stop(NORMAL_CLOSE, "Connection handoff").await;
            }
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = conn::spawn(self.clone(), token.to_string(), ready_tx);
        let ready = match ready_rx.await {
            Ok(ready) => ready,
            Err(_) => Err(LaunchError::WorkerGone),
        };
        ready.map(|()| {
            *slot = Some(WorkerSlot {
                handle,
                token: token.to_string(),
            });
        })
    }

    /// Sends a packet on the current session. A dead worker is transparently
    /// relaunched once with the last token; with no session ever launched
    /// the packet is dropped. Resolves once the frame has been written (or
    /// dropped).
    pub async fn send(self: &Arc<Self>, packet: OutboundPacket) {
        let mut slot = self.worker.lock().await;
        let current = slot
            .as_ref()
            .map(|worker| (worker.handle.clone(), worker.token.clone()));
        let Some((handle, token)) = current else {
            warn!(
                target: "Client",
                "Client has never been online, dropping {}",
                packet.type_name()
            );
            return;
        };

        let handle = if handle.is_online() {
            handle
        } else {
            info!(target: "Client", "Client is offline, relaunching before send");
            if let Err(e) = self.launch_locked(&mut slot, &token).await {
                error!(
                    target: "Client",
                    "Relaunch failed, dropping {}: {e}",
                    packet.type_name()
                );
                return;
            }
            match slot.as_ref() {
                Some(worker) => worker.handle.clone(),
                None => return,
            }
        };

        drop(slot);
        handle.send(packet).await;
    }

    /// Stops the current session, if any. Safe to call repeatedly.
    pub async fn stop(&self, code: u16, reason: &str) {
        let handle = {
            let slot = self.worker.lock().await;
            slot.as_ref().map(|worker| worker.handle.clone())
        };
        if let Some(handle) = handle {
            handle.stop(code, reason).await;
        }
    }

    /// Persists a sensor sweep and sends it upstream as an indexed report.
    pub async fn send_report(self: &Arc<Self>, report: SensorReport) {
        let index = self.next_report_index();
        let context = match serde_json::to_value(&report) {
            Ok(context) => context,
            Err(e) => {
                warn!(
                    target: "Client",
                    "Report for {} not serializable: {e}",
                    report.sensor_id
                );
                Value::Null
            }
        };
        let record = ReportRecord::sensor(index, &report.sensor_id, context);
        if let Err(e) = self.store.save(record).await {
            warn!(target: "Client", "Failed to store report {index}: {e:?}");
        }
        self.send(Report { index, report }.into()).await;
    }

    /// Persists free-form report context (forecast output) and sends it as
    /// an indexed raw report.
    pub async fn send_raw_report(self: &Arc<Self>, context: Value) {
        let index = self.next_report_index();
        let record = ReportRecord::forecast(index, context.clone());
        if let Err(e) = self.store.save(record).await {
            warn!(target: "Client", "Failed to store raw report {index}: {e:?}");
        }
        self.send(RawReport { index, context }.into()).await;
    }
}
