use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::model::{Sensor, SensorStructure};
use crate::socket::conn::ConnectionHandle;
use crate::ui::UiLink;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSensorTypeList {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorTypeList {
    pub types: Vec<String>,
}

impl SensorTypeList {
    pub(crate) async fn execute(
        self,
        _conn: &ConnectionHandle,
        _client: &Arc<Client>,
        _ui: &Arc<dyn UiLink>,
    ) -> anyhow::Result<()> {
        info!(
            target: "Client",
            "Backend supports {} sensor types, awaiting operator pick",
            self.types.len()
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorCreation {
    pub name: String,
    pub port: String,
    #[serde(rename = "type")]
    pub model: String,
}

/// A sensor was provisioned for this node; fold it into the cached
/// profile so the next supervisor pass can pick it up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorCreationReceipt {
    pub sensor: Sensor,
    #[serde(default)]
    pub structure: Option<SensorStructure>,
}

impl SensorCreationReceipt {
    pub(crate) async fn execute(
        self,
        _conn: &ConnectionHandle,
        client: &Arc<Client>,
        _ui: &Arc<dyn UiLink>,
    ) -> anyhow::Result<()> {
        info!(
            target: "Client",
            "Sensor {} ({}) provisioned on port {}",
            self.sensor.name, self.sensor.model, self.sensor.port
        );
        client.append_sensor(self.sensor, self.structure).await;
        Ok(())
    }
}
