use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::Client;
use crate::packet::DecodedFrame;
use crate::socket::conn::ConnectionHandle;
use crate::ui::UiLink;

/// Wrapper the backend uses to push an arbitrary packet under an
/// operation id. The inner value goes back through the normal decode and
/// dispatch path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub operation_id: String,
    pub packet: Value,
}

impl Operation {
    pub(crate) async fn execute(
        self,
        conn: &ConnectionHandle,
        client: &Arc<Client>,
        ui: &Arc<dyn UiLink>,
    ) -> anyhow::Result<()> {
        let Operation {
            operation_id,
            packet,
        } = self;
        match client.registry().decode_value(packet)? {
            DecodedFrame::Packet(inner) => {
                info!(
                    target: "Client",
                    "Operation {} carries {}, executing",
                    operation_id,
                    inner.type_name()
                );
                Box::pin(inner.execute(conn, client, ui)).await
            }
            DecodedFrame::Outbound(inner) => {
                warn!(
                    target: "Client",
                    "Operation {} carries client-bound {}, refusing to execute",
                    operation_id,
                    inner.type_name()
                );
                Ok(())
            }
            DecodedFrame::Raw(raw) => {
                warn!(
                    target: "Client",
                    "Operation {operation_id} carried no executable packet: {raw}"
                );
                Ok(())
            }
        }
    }
}
