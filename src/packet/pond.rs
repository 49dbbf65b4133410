use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::model::{Node, Pond};
use crate::socket::conn::ConnectionHandle;
use crate::ui::UiLink;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestNodeList {
    pub pond_id: String,
}

/// Nodes registered under one pond; drives the operator's node pick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeList {
    pub pond_id: String,
    pub nodes: Vec<Node>,
}

impl NodeList {
    pub(crate) async fn execute(
        self,
        _conn: &ConnectionHandle,
        _client: &Arc<Client>,
        _ui: &Arc<dyn UiLink>,
    ) -> anyhow::Result<()> {
        info!(
            target: "Client",
            "Pond {} lists {} nodes, awaiting operator pick",
            self.pond_id,
            self.nodes.len()
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PondList {
    pub ponds: Vec<Pond>,
}

impl PondList {
    pub(crate) async fn execute(
        self,
        _conn: &ConnectionHandle,
        _client: &Arc<Client>,
        _ui: &Arc<dyn UiLink>,
    ) -> anyhow::Result<()> {
        info!(
            target: "Client",
            "Account owns {} ponds, awaiting operator pick",
            self.ponds.len()
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PondCreation {
    pub name: String,
}

/// A pond was created for this account; ask for its nodes so the operator
/// can bind one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PondCreationReceipt {
    pub pond_id: String,
}

impl PondCreationReceipt {
    pub(crate) async fn execute(
        self,
        conn: &ConnectionHandle,
        _client: &Arc<Client>,
        _ui: &Arc<dyn UiLink>,
    ) -> anyhow::Result<()> {
        info!(target: "Client", "Pond {} created", self.pond_id);
        conn.queue(
            RequestNodeList {
                pond_id: self.pond_id,
            }
            .into(),
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCreation {
    pub pond_id: String,
    pub name: String,
    pub signature: String,
}
