use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::client::{Client, Session};
use crate::model::{Node, Pond, Sensor, SensorStructure};
use crate::socket::conn::ConnectionHandle;
use crate::ui::UiLink;

/// The backend wants proof of who we are before serving the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestNodeRegistration {}

impl RequestNodeRegistration {
    pub(crate) async fn execute(
        self,
        conn: &ConnectionHandle,
        client: &Arc<Client>,
        _ui: &Arc<dyn UiLink>,
    ) -> anyhow::Result<()> {
        info!(target: "Client", "Registration requested, presenting node signature");
        conn.queue(
            NodeRegistration {
                signature: client.config.signature.clone(),
            }
            .into(),
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestProfile {
    pub node_id: String,
    pub signature: String,
}

/// The node's full session profile: who owns it, where it sits, and what
/// hardware hangs off it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub username: String,
    pub pond: Pond,
    pub node: Node,
    pub sensors: Vec<Sensor>,
    pub structures: Vec<SensorStructure>,
}

impl Profile {
    pub(crate) async fn execute(
        self,
        _conn: &ConnectionHandle,
        client: &Arc<Client>,
        ui: &Arc<dyn UiLink>,
    ) -> anyhow::Result<()> {
        info!(
            target: "Client",
            "Profile received for {} ({} sensors declared)",
            self.username,
            self.sensors.len()
        );
        client
            .set_session(Session {
                username: self.username.clone(),
                pond: self.pond,
                node: self.node,
                sensors: self.sensors.clone(),
                structures: self.structures.clone(),
            })
            .await;

        match client.monitors() {
            Some(monitors) => {
                monitors.launch();
                for sensor in self.sensors {
                    let Some(structure) = self
                        .structures
                        .iter()
                        .find(|structure| structure.model == sensor.model)
                    else {
                        warn!(
                            target: "Client",
                            "No structure declared for sensor {} ({}), skipping",
                            sensor.name, sensor.model
                        );
                        continue;
                    };
                    // Fire-and-forget: this handler runs on the connection
                    // worker, and the supervisor may be mid-pass waiting on
                    // a connection send.
                    monitors.queue_monitor(sensor, structure.clone());
                }
            }
            None => warn!(target: "Client", "No supervisor wired, sensors will not report"),
        }

        ui.profile_received(&self.username);
        Ok(())
    }
}

/// The backend could not serve a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub code: i64,
}

impl Failure {
    pub(crate) async fn execute(
        self,
        _conn: &ConnectionHandle,
        _client: &Arc<Client>,
        ui: &Arc<dyn UiLink>,
    ) -> anyhow::Result<()> {
        warn!(target: "Client", "Server reported failure {}", self.code);
        ui.failure(self.code);
        Ok(())
    }
}
