use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::client::Client;
use crate::model::{Sensor, SensorStructure};
use crate::monitor::forecast::{ForecastBuffer, ForecastMonitor};
use crate::monitor::serial::{command_for, LinkFactory, SerialMonitor};
use crate::monitor::weather::WeatherMonitor;
use crate::monitor::Monitor;

const HEARTBEAT: Duration = Duration::from_secs(1);
const BEATS_PER_PASS: u32 = 60;
const FIRST_PASS_BIAS: u32 = 50;
const WEATHER_KEY: &str = "weather";

enum SupervisorCommand {
    Watch {
        sensor: Sensor,
        structure: SensorStructure,
        done: Option<oneshot::Sender<()>>,
    },
    FeedWeather {
        values: IndexMap<String, f64>,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
}

/// Owns the reporting worker and every monitor in the process.
///
/// All monitors live on one worker task; the rest of the system talks to them
/// through this handle's mailbox. The worker beats once a second and walks
/// every monitor each sixtieth beat, starting shortly after launch.
pub struct MonitorSupervisor {
    client: Arc<Client>,
    link_factory: Arc<dyn LinkFactory>,
    cmd_tx: mpsc::Sender<SupervisorCommand>,
    pending: Mutex<Option<mpsc::Receiver<SupervisorCommand>>>,
    running: AtomicBool,
}

impl MonitorSupervisor {
    pub fn new(client: Arc<Client>, link_factory: Arc<dyn LinkFactory>) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        Arc::new(Self {
            client,
            link_factory,
            cmd_tx,
            pending: Mutex::new(Some(cmd_rx)),
            running: AtomicBool::new(false),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the reporting worker. Further calls are no-ops; a supervisor
    /// whose worker already ended cannot be restarted.
    pub fn launch(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(target: "Client/Supervisor", "Monitor worker already running");
            return;
        }
        let cmd_rx = self
            .pending
            .try_lock()
            .ok()
            .and_then(|mut pending| pending.take());
        let Some(cmd_rx) = cmd_rx else {
            warn!(target: "Client/Supervisor", "Monitor worker already ran, not restarting");
            return;
        };
        info!(target: "Client/Supervisor", "Monitor worker started");
        tokio::spawn(run_worker(self.clone(), cmd_rx));
    }

    /// Registers a device with the worker and waits until it is watched.
    /// Reuses the existing monitor when one is already online for the name.
    pub async fn monitor(&self, sensor: Sensor, structure: SensorStructure) {
        info!(
            target: "Client/Supervisor",
            "Preparing to watch ({}) {}: {}",
            sensor.model, sensor.name, sensor.id
        );
        let (done_tx, done_rx) = oneshot::channel();
        let command = SupervisorCommand::Watch {
            sensor,
            structure,
            done: Some(done_tx),
        };
        if self.cmd_tx.send(command).await.is_err() {
            warn!(target: "Client/Supervisor", "Monitor worker is gone, cannot watch device");
            return;
        }
        let _ = done_rx.await;
    }

    /// Like [`MonitorSupervisor::monitor`], but fire-and-forget. Packet
    /// handlers run on the connection worker and must never wait on this
    /// worker: a pass in flight may itself be waiting on a connection send.
    pub fn queue_monitor(&self, sensor: Sensor, structure: SensorStructure) {
        info!(
            target: "Client/Supervisor",
            "Preparing to watch ({}) {}: {}",
            sensor.model, sensor.name, sensor.id
        );
        let command = SupervisorCommand::Watch {
            sensor,
            structure,
            done: None,
        };
        if self.cmd_tx.try_send(command).is_err() {
            warn!(target: "Client/Supervisor", "Monitor worker is busy, dropping device registration");
        }
    }

    /// Routes a weather observation to every forecast buffer. Drops the
    /// observation when the worker mailbox is full rather than blocking the
    /// caller.
    pub fn feed_weather(&self, values: IndexMap<String, f64>) {
        if self
            .cmd_tx
            .try_send(SupervisorCommand::FeedWeather { values })
            .is_err()
        {
            warn!(target: "Client/Supervisor", "Monitor worker is busy, dropping weather feed");
        }
    }

    /// Stops the worker and waits for every device link to close. The worker
    /// finishes its current pass first.
    pub async fn stop(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SupervisorCommand::Stop { done: done_tx })
            .await
            .is_err()
        {
            return;
        }
        let _ = done_rx.await;
    }
}

async fn run_worker(
    supervisor: Arc<MonitorSupervisor>,
    mut cmd_rx: mpsc::Receiver<SupervisorCommand>,
) {
    let client = supervisor.client.clone();
    let mut monitors: BTreeMap<String, Box<dyn Monitor>> = BTreeMap::new();
    monitors.insert(WEATHER_KEY.to_string(), Box::new(WeatherMonitor::new()));
    let mut buffers: BTreeMap<String, Arc<ForecastBuffer>> = BTreeMap::new();
    let mut beats = FIRST_PASS_BIAS;
    let mut stop_waiters: Vec<oneshot::Sender<()>> = Vec::new();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(HEARTBEAT) => {
                beats += 1;
                if beats < BEATS_PER_PASS {
                    continue;
                }
                beats = 0;
                run_pass(&client, &mut monitors).await;
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(SupervisorCommand::Watch { sensor, structure, done }) => {
                    watch_device(&supervisor, &client, &mut monitors, &mut buffers, sensor, structure).await;
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                }
                Some(SupervisorCommand::FeedWeather { values }) => {
                    debug!(
                        target: "Client/Supervisor",
                        "Routing weather observation to {} buffers",
                        buffers.len()
                    );
                    for buffer in buffers.values() {
                        buffer.append_weather(&values).await;
                    }
                }
                Some(SupervisorCommand::Stop { done }) => {
                    stop_waiters.push(done);
                    break;
                }
                None => break,
            }
        }
    }

    for (name, monitor) in monitors.iter_mut() {
        monitor.close().await;
        debug!(target: "Client/Supervisor", "Closed {name}");
    }
    info!(target: "Client/Supervisor", "All devices disconnected, monitor worker ended");
    supervisor.running.store(false, Ordering::SeqCst);
    for waiter in stop_waiters {
        let _ = waiter.send(());
    }
}

/// One reporting pass: every monitor gets a turn, failures are isolated.
async fn run_pass(client: &Arc<Client>, monitors: &mut BTreeMap<String, Box<dyn Monitor>>) {
    debug!(target: "Client/Supervisor", "Reporting pass over {} monitors", monitors.len());
    for (name, monitor) in monitors.iter_mut() {
        let started = Instant::now();
        match monitor.report(client).await {
            Ok(()) => {
                info!(
                    target: "Client/Supervisor",
                    "{name} reported in {:?}",
                    started.elapsed()
                );
            }
            Err(e) => {
                error!(target: "Client/Supervisor", "Report from {name} failed: {e:?}");
            }
        }
        if let Some(id) = monitor.sensor_id() {
            client.ui().device_report(id);
        }
    }
}

async fn watch_device(
    supervisor: &Arc<MonitorSupervisor>,
    client: &Arc<Client>,
    monitors: &mut BTreeMap<String, Box<dyn Monitor>>,
    buffers: &mut BTreeMap<String, Arc<ForecastBuffer>>,
    sensor: Sensor,
    structure: SensorStructure,
) {
    let key = sensor.name.clone();
    if let Some(existing) = monitors.get(&key) {
        if existing.is_online() {
            info!(target: "Client/Supervisor", "Reusing the online monitor for {key}");
            return;
        }
    }
    let Some(command) = command_for(&sensor.model) else {
        error!(
            target: "Client/Supervisor",
            "No register command for model {}, cannot watch {key}",
            sensor.model
        );
        return;
    };

    let forecast_key = format!("{key}[forecast]");
    if let Some(mut old) = monitors.remove(&key) {
        old.close().await;
    }
    if let Some(mut old) = monitors.remove(&forecast_key) {
        old.close().await;
    }

    let buffer = Arc::new(ForecastBuffer::new());
    let mut link = supervisor.link_factory.create(&sensor.port, &command);
    if let Err(e) = link.connect().await {
        error!(target: "Client/Supervisor", "Connecting to device {key} failed: {e}");
    }
    let monitor = SerialMonitor::new(sensor, structure, command, link, buffer.clone());
    monitors.insert(key.clone(), Box::new(monitor));
    monitors.insert(
        forecast_key.clone(),
        Box::new(ForecastMonitor::new(
            forecast_key,
            buffer.clone(),
            client.forecaster().clone(),
        )),
    );
    buffers.insert(key.clone(), buffer);
    info!(target: "Client/Supervisor", "Watching device {key}");
}
