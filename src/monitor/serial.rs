use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, info, warn};
use thiserror::Error;
use tokio_modbus::prelude::*;
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};

use crate::client::Client;
use crate::model::{Sensor, SensorReport, SensorStructure};
use crate::monitor::forecast::ForecastBuffer;
use crate::monitor::{minute_bucket, Monitor};

const BAUD_RATE: u32 = 9600;

/// Seconds a pulled reading stays fresh before the next pull hits the wire.
const CACHE_TTL_SECS: i64 = 60;
/// Minimum spacing between recorded history points for one field.
const RECORD_GUARD_SECS: i64 = 60;
/// Points older than this relative to the newest are dropped.
const HISTORY_WINDOW_SECS: i64 = 3600;
/// Hard cap on points kept per field.
const HISTORY_MAX_POINTS: usize = 60;

/// Holding-register read that yields every reading a device model exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCommand {
    pub address: u16,
    pub count: u16,
    pub station: u8,
}

/// The register command for a known device model.
pub fn command_for(model: &str) -> Option<ReadCommand> {
    match model {
        "TNET_100" => Some(ReadCommand {
            address: 100,
            count: 24,
            station: 33,
        }),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link is not connected")]
    NotConnected,
    #[error("serial open failed: {0}")]
    Open(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("device exception: {0}")]
    Device(String),
}

/// A register-level connection to one device.
#[async_trait]
pub trait RegisterLink: Send {
    async fn connect(&mut self) -> Result<(), LinkError>;
    fn is_connected(&self) -> bool;
    async fn read_holding(&mut self, address: u16, count: u16) -> Result<Vec<u16>, LinkError>;
    async fn close(&mut self);
}

/// Builds register links for new devices.
pub trait LinkFactory: Send + Sync {
    fn create(&self, port: &str, command: &ReadCommand) -> Box<dyn RegisterLink>;
}

/// Modbus RTU over a local serial port, 9600 baud 8N1.
pub struct ModbusLink {
    port: String,
    station: u8,
    context: Option<client::Context>,
}

impl ModbusLink {
    pub fn new(port: &str, station: u8) -> Self {
        Self {
            port: port.to_string(),
            station,
            context: None,
        }
    }
}

#[async_trait]
impl RegisterLink for ModbusLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        let builder = tokio_serial::new(&self.port, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One);
        let stream = SerialStream::open(&builder).map_err(|e| LinkError::Open(e.to_string()))?;
        self.context = Some(rtu::attach_slave(stream, Slave(self.station)));
        debug!(
            target: "Client/Monitor",
            "Opened {} at {} baud, station {}",
            self.port, BAUD_RATE, self.station
        );
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.context.is_some()
    }

    async fn read_holding(&mut self, address: u16, count: u16) -> Result<Vec<u16>, LinkError> {
        let Some(context) = self.context.as_mut() else {
            return Err(LinkError::NotConnected);
        };
        match context.read_holding_registers(address, count).await {
            Ok(Ok(words)) => Ok(words),
            Ok(Err(exception)) => Err(LinkError::Device(exception.to_string())),
            Err(e) => {
                // Drop the context so the next pull reopens the port.
                self.context = None;
                Err(LinkError::Transport(e.to_string()))
            }
        }
    }

    async fn close(&mut self) {
        if self.context.take().is_some() {
            debug!(target: "Client/Monitor", "Closed serial link on {}", self.port);
        }
    }
}

/// Opens [`ModbusLink`]s on real serial ports.
pub struct SerialLinkFactory;

impl LinkFactory for SerialLinkFactory {
    fn create(&self, port: &str, command: &ReadCommand) -> Box<dyn RegisterLink> {
        Box::new(ModbusLink::new(port, command.station))
    }
}

/// Packs register words into the length-prefixed buffer the device family
/// documents: one byte count, then each word big-endian.
fn encode_payload(words: &[u16]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + words.len() * 2);
    payload.push((words.len() * 2) as u8);
    for word in words {
        payload.extend_from_slice(&word.to_be_bytes());
    }
    payload
}

/// Decodes the word-swapped float layout: each reading is four bytes, upper
/// register pair first on the wire, reassembled lower-then-upper into a
/// big-endian f32.
pub fn decode_readings(payload: &[u8]) -> Option<Vec<f32>> {
    let declared = *payload.first()? as usize;
    if declared % 4 != 0 || payload.len() < 1 + declared {
        warn!(
            target: "Client/Monitor",
            "Malformed reading buffer: {} bytes declared, {} present",
            declared,
            payload.len().saturating_sub(1)
        );
        return None;
    }
    let mut readings = Vec::with_capacity(declared / 4);
    let mut index = 1;
    while index < declared {
        let bytes = [
            payload[index + 2],
            payload[index + 3],
            payload[index],
            payload[index + 1],
        ];
        readings.push(f32::from_be_bytes(bytes));
        index += 4;
    }
    Some(readings)
}

/// Watches one physical water-quality device over its register link.
///
/// Owned by the supervisor worker; all methods run on that context.
pub struct SerialMonitor {
    sensor: Sensor,
    structure: SensorStructure,
    command: ReadCommand,
    link: Box<dyn RegisterLink>,
    readings: Option<Vec<f32>>,
    pulled_at: Option<DateTime<Utc>>,
    history: HashMap<String, BTreeMap<DateTime<Utc>, f64>>,
    forecast: Arc<ForecastBuffer>,
}

impl SerialMonitor {
    pub fn new(
        sensor: Sensor,
        structure: SensorStructure,
        command: ReadCommand,
        link: Box<dyn RegisterLink>,
        forecast: Arc<ForecastBuffer>,
    ) -> Self {
        Self {
            sensor,
            structure,
            command,
            link,
            readings: None,
            pulled_at: None,
            history: HashMap::new(),
            forecast,
        }
    }

    /// Reads the device now, reopening the link first if it dropped.
    /// `None` means the device could not be read this turn.
    pub async fn pull(&mut self) -> Option<Vec<f32>> {
        if !self.link.is_connected() {
            info!(target: "Client/Monitor", "Reopening link for {}", self.sensor.name);
            if let Err(e) = self.link.connect().await {
                warn!(target: "Client/Monitor", "Device {} unreachable: {e}", self.sensor.name);
                return None;
            }
        }
        let started = Instant::now();
        let words = match self
            .link
            .read_holding(self.command.address, self.command.count)
            .await
        {
            Ok(words) => words,
            Err(e) => {
                warn!(target: "Client/Monitor", "Read from {} failed: {e}", self.sensor.name);
                return None;
            }
        };
        let readings = decode_readings(&encode_payload(&words))?;
        let pulled_at = Utc::now();
        self.readings = Some(readings.clone());
        self.pulled_at = Some(pulled_at);
        let values = self.matched(&readings);
        self.record(&values, pulled_at);
        info!(
            target: "Client/Monitor",
            "Pulled {} readings from {} in {:?}",
            readings.len(),
            self.sensor.name,
            started.elapsed()
        );
        Some(readings)
    }

    /// Returns the cached readings while they are fresh, pulling otherwise.
    pub async fn lazy_pull(&mut self) -> Option<Vec<f32>> {
        if let (Some(readings), Some(pulled_at)) = (&self.readings, self.pulled_at) {
            if (Utc::now() - pulled_at).num_seconds() < CACHE_TTL_SECS {
                return Some(readings.clone());
            }
        }
        self.pull().await
    }

    /// Pairs readings with the structure's field keys in declared order,
    /// dropping exact zeros, which this family reports for absent probes.
    pub fn matched(&self, readings: &[f32]) -> IndexMap<String, f64> {
        self.structure
            .fields
            .keys()
            .zip(readings.iter())
            .filter(|&(_, &value)| value != 0.0)
            .map(|(key, &value)| (key.clone(), f64::from(value)))
            .collect()
    }

    /// Folds one matched sample into the per-field history.
    ///
    /// Points land on minute buckets, at most one per minute per field; the
    /// window keeps an hour relative to the newest point and never more than
    /// [`HISTORY_MAX_POINTS`]. Fields absent from the sample are dropped
    /// entirely so a removed probe does not linger.
    pub fn record(&mut self, values: &IndexMap<String, f64>, timestamp: DateTime<Utc>) {
        let bucket = minute_bucket(timestamp);
        for (key, &value) in values {
            let series = self.history.entry(key.clone()).or_default();
            if let Some((&newest, _)) = series.last_key_value() {
                if (bucket - newest).num_seconds() < RECORD_GUARD_SECS {
                    continue;
                }
            }
            series.insert(bucket, value);
            if let Some((&newest, _)) = series.last_key_value() {
                series.retain(|&at, _| (newest - at).num_seconds() < HISTORY_WINDOW_SECS);
            }
            while series.len() > HISTORY_MAX_POINTS {
                series.pop_first();
            }
        }
        self.history.retain(|key, _| values.contains_key(key));
    }

    pub fn history(&self) -> &HashMap<String, BTreeMap<DateTime<Utc>, f64>> {
        &self.history
    }
}

#[async_trait]
impl Monitor for SerialMonitor {
    fn name(&self) -> &str {
        &self.sensor.name
    }

    fn sensor_id(&self) -> Option<&str> {
        Some(&self.sensor.id)
    }

    fn is_online(&self) -> bool {
        self.link.is_connected()
    }

    async fn report(&mut self, client: &Arc<Client>) -> anyhow::Result<()> {
        let Some(readings) = self.lazy_pull().await else {
            debug!(
                target: "Client/Monitor",
                "Device {} is offline, nothing to report",
                self.sensor.name
            );
            return Ok(());
        };
        let values = self.matched(&readings);
        debug!(target: "Client/Monitor", "Device {} matched {values:?}", self.sensor.name);
        self.forecast.append_serial(&values).await;
        self.sensor.fields = values.keys().map(|key| (key.clone(), true)).collect();
        let report = SensorReport {
            node_id: self.sensor.node_id.clone(),
            sensor_id: self.sensor.id.clone(),
            model: self.sensor.model.clone(),
            fields: values,
            timestamp: Utc::now(),
        };
        client.send_report(report).await;
        Ok(())
    }

    async fn close(&mut self) {
        self.link.close().await;
    }
}
