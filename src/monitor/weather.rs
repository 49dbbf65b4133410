use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use log::info;
use serde_json::Value;

use crate::client::Client;
use crate::monitor::Monitor;
use crate::packet::report::RequestWeather;

pub(crate) const WEATHER_EVERY: u32 = 30;

/// Unit that periodically asks the backend for a weather observation. The
/// result arrives asynchronously as a weather packet and is routed into the
/// forecast buffers by the supervisor.
#[derive(Default)]
pub struct WeatherMonitor {
    passes: u32,
}

impl WeatherMonitor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Monitor for WeatherMonitor {
    fn name(&self) -> &str {
        "weather"
    }

    fn is_online(&self) -> bool {
        true
    }

    async fn report(&mut self, client: &Arc<Client>) -> anyhow::Result<()> {
        self.passes += 1;
        if self.passes < WEATHER_EVERY {
            return Ok(());
        }
        self.passes = 0;
        info!(target: "Client/Monitor", "Requesting a weather observation");
        client.send(RequestWeather {}.into()).await;
        Ok(())
    }

    async fn close(&mut self) {}
}

/// Flattens the realtime block of a raw weather payload into the numeric
/// fields the forecast frame uses. Returns nothing when the payload has no
/// realtime block at all.
pub fn extract_realtime(result: &Value) -> Option<IndexMap<String, f64>> {
    let realtime = result.get("realtime")?;
    let mut values = IndexMap::new();
    if let Some(condition) = realtime.get("skycon").and_then(Value::as_str) {
        if let Some(code) = condition_code(condition) {
            values.insert("skycon".to_string(), code);
        }
    }
    if let Some(speed) = realtime.pointer("/wind/speed").and_then(Value::as_f64) {
        values.insert("wind_speed".to_string(), speed);
    }
    if let Some(temperature) = realtime.get("temperature").and_then(Value::as_f64) {
        values.insert("air_temp".to_string(), temperature);
    }
    Some(values)
}

/// Numeric code for an upstream sky-condition label.
fn condition_code(condition: &str) -> Option<f64> {
    let code = match condition {
        "CLEAR_DAY" | "CLEAR_NIGHT" => 0.0,
        "PARTLY_CLOUDY_DAY" | "PARTLY_CLOUDY_NIGHT" => 1.0,
        "CLOUDY" => 2.0,
        "LIGHT_HAZE" | "MODERATE_HAZE" | "HEAVY_HAZE" => 3.0,
        "LIGHT_RAIN" => 4.0,
        "MODERATE_RAIN" => 5.0,
        "HEAVY_RAIN" | "STORM_RAIN" => 6.0,
        "FOG" => 7.0,
        "LIGHT_SNOW" => 8.0,
        "MODERATE_SNOW" | "HEAVY_SNOW" | "STORM_SNOW" => 9.0,
        "DUST" | "SAND" => 10.0,
        "WIND" => 11.0,
        _ => return None,
    };
    Some(code)
}
