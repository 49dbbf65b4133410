use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::Client;
use crate::model::SensorReport;
use crate::monitor::weather::extract_realtime;
use crate::socket::conn::ConnectionHandle;
use crate::store::ReportRecord;
use crate::ui::UiLink;

/// One sensor sweep going upstream, tagged with the process-local index
/// the receipt will refer back to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub index: u64,
    pub report: SensorReport,
}

/// Free-form report payload; carries forecast output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReport {
    pub index: u64,
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestWeather {}

/// Weather conditions around the pond, relayed by the backend with the
/// id it stored the observation under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Weather {
    pub report_id: String,
    pub result: Value,
}

impl Weather {
    pub(crate) async fn execute(
        self,
        _conn: &ConnectionHandle,
        client: &Arc<Client>,
        _ui: &Arc<dyn UiLink>,
    ) -> anyhow::Result<()> {
        let index = client.next_report_index();
        let record = ReportRecord::weather(index, &self.report_id, self.result.clone());
        if let Err(e) = client.store().save(record).await {
            warn!(target: "Client", "Failed to store weather report: {e:?}");
        }

        match extract_realtime(&self.result) {
            Some(values) if !values.is_empty() => {
                debug!(target: "Client", "Weather observation: {values:?}");
                if let Some(monitors) = client.monitors() {
                    monitors.feed_weather(values);
                }
            }
            _ => debug!(target: "Client", "Weather report carried no realtime block"),
        }
        Ok(())
    }
}

/// The backend acknowledged an indexed report and tells us the document
/// id it stored it under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportReceipt {
    pub index: u64,
    pub report_id: String,
}

impl ReportReceipt {
    pub(crate) async fn execute(
        self,
        _conn: &ConnectionHandle,
        client: &Arc<Client>,
        _ui: &Arc<dyn UiLink>,
    ) -> anyhow::Result<()> {
        client.store().attach_id(self.index, &self.report_id).await?;
        debug!(
            target: "Client",
            "Report {} stored upstream as {}",
            self.index, self.report_id
        );
        Ok(())
    }
}
