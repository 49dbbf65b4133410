use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, info};
use serde_json::json;
use tokio::sync::Mutex;

use crate::client::Client;
use crate::forecast::{Forecaster, FrameRow, HistoryFrame, ScalerKind};
use crate::monitor::{minute_bucket, Monitor};

pub(crate) const FORECAST_EVERY: u32 = 30;
const MIN_FRAME_ROWS: usize = 16;
const BUFFER_CAP: usize = 240;

/// The field the forecasting engine is trained on.
pub const FORECAST_FIELD: &str = "DO";

/// Minute-keyed samples shared between a device monitor and its forecast
/// companion. Device readings and weather observations land here as they
/// arrive and are merged into one frame when the engine runs.
#[derive(Default)]
pub struct ForecastBuffer {
    serials: Mutex<BTreeMap<DateTime<Utc>, IndexMap<String, f64>>>,
    weathers: Mutex<BTreeMap<DateTime<Utc>, IndexMap<String, f64>>>,
}

impl ForecastBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers one matched device sample under the current minute. A second
    /// sample in the same minute replaces the first.
    pub async fn append_serial(&self, values: &IndexMap<String, f64>) {
        let mut serials = self.serials.lock().await;
        serials.insert(minute_bucket(Utc::now()), values.clone());
        while serials.len() > BUFFER_CAP {
            serials.pop_first();
        }
    }

    pub async fn append_weather(&self, values: &IndexMap<String, f64>) {
        let mut weathers = self.weathers.lock().await;
        weathers.insert(minute_bucket(Utc::now()), values.clone());
        while weathers.len() > BUFFER_CAP {
            weathers.pop_first();
        }
    }

    /// Builds the engine's input frame: one row per buffered device sample,
    /// each merged with the newest weather observed at or before it.
    pub async fn frame(&self) -> HistoryFrame {
        let serials = self.serials.lock().await;
        let weathers = self.weathers.lock().await;
        let rows = serials
            .iter()
            .map(|(&timestamp, values)| {
                let mut merged = values.clone();
                if let Some((_, weather)) = weathers.range(..=timestamp).next_back() {
                    for (key, &value) in weather {
                        merged.insert(key.clone(), value);
                    }
                }
                FrameRow {
                    timestamp,
                    values: merged,
                }
            })
            .collect();
        HistoryFrame { rows }
    }
}

/// Companion unit that periodically runs the forecasting engine over the
/// buffered history and forwards whatever it produces upstream.
pub struct ForecastMonitor {
    name: String,
    buffer: Arc<ForecastBuffer>,
    forecaster: Arc<dyn Forecaster>,
    passes: u32,
}

impl ForecastMonitor {
    pub fn new(name: String, buffer: Arc<ForecastBuffer>, forecaster: Arc<dyn Forecaster>) -> Self {
        Self {
            name,
            buffer,
            forecaster,
            passes: 0,
        }
    }
}

#[async_trait]
impl Monitor for ForecastMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_online(&self) -> bool {
        true
    }

    async fn report(&mut self, client: &Arc<Client>) -> anyhow::Result<()> {
        self.passes += 1;
        if self.passes < FORECAST_EVERY {
            return Ok(());
        }
        self.passes = 0;

        let frame = self.buffer.frame().await;
        if frame.len() < MIN_FRAME_ROWS {
            debug!(
                target: "Client/Monitor",
                "{}: only {} rows buffered, skipping forecast",
                self.name,
                frame.len()
            );
            return Ok(());
        }
        let predicted = self
            .forecaster
            .run(FORECAST_FIELD, &frame, ScalerKind::Mean)
            .await?;
        if predicted.is_empty() {
            debug!(target: "Client/Monitor", "{}: engine produced nothing", self.name);
            return Ok(());
        }
        info!(
            target: "Client/Monitor",
            "{}: engine produced {} points",
            self.name,
            predicted.len()
        );
        let context = json!({
            "field": FORECAST_FIELD,
            "predicted": predicted,
            "window": frame.len(),
            "generated": Utc::now(),
        });
        client.send_raw_report(context).await;
        Ok(())
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, min, 0).unwrap()
    }

    fn values(pairs: &[(&str, f64)]) -> IndexMap<String, f64> {
        pairs.iter().map(|&(k, v)| (k.to_string(), v)).collect()
    }

    #[tokio::test]
    async fn frame_merges_newest_weather_at_or_before_each_row() {
        let buffer = ForecastBuffer::new();
        {
            let mut serials = buffer.serials.lock().await;
            serials.insert(at(10, 0), values(&[("DO", 6.2)]));
            serials.insert(at(10, 30), values(&[("DO", 6.4)]));
            let mut weathers = buffer.weathers.lock().await;
            weathers.insert(at(10, 10), values(&[("air_temp", 21.0)]));
            weathers.insert(at(10, 25), values(&[("air_temp", 23.0)]));
        }

        let frame = buffer.frame().await;
        assert_eq!(frame.len(), 2);
        // No weather existed yet at 10:00.
        assert!(!frame.rows[0].values.contains_key("air_temp"));
        assert!((frame.rows[1].values["air_temp"] - 23.0).abs() < 1e-9);
        assert!((frame.rows[1].values["DO"] - 6.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn buffers_overwrite_within_one_minute() {
        let buffer = ForecastBuffer::new();
        buffer.append_serial(&values(&[("DO", 6.2)])).await;
        buffer.append_serial(&values(&[("DO", 6.9)])).await;
        let frame = buffer.frame().await;
        assert_eq!(frame.len(), 1);
        assert!((frame.rows[0].values["DO"] - 6.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn buffers_stay_bounded() {
        let buffer = ForecastBuffer::new();
        {
            let mut serials = buffer.serials.lock().await;
            for min in 0..BUFFER_CAP as u32 {
                serials.insert(at(0, 0) + chrono::Duration::minutes(i64::from(min)), values(&[("DO", 6.2)]));
            }
        }
        buffer.append_serial(&values(&[("DO", 6.2)])).await;
        assert!(buffer.serials.lock().await.len() <= BUFFER_CAP);
    }
}
