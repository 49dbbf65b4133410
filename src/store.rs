use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Sensor,
    Weather,
    Forecast,
}

/// One persisted report. `report_id` is the backend's document id; sensor
/// and forecast records get it attached later through a receipt, weather
/// records arrive with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub index: u64,
    pub kind: ReportKind,
    pub sensor_id: Option<String>,
    pub context: Value,
    pub report_id: Option<String>,
    pub created: DateTime<Utc>,
}

impl ReportRecord {
    pub fn sensor(index: u64, sensor_id: &str, context: Value) -> Self {
        Self {
            index,
            kind: ReportKind::Sensor,
            sensor_id: Some(sensor_id.to_string()),
            context,
            report_id: None,
            created: Utc::now(),
        }
    }

    pub fn weather(index: u64, report_id: &str, context: Value) -> Self {
        Self {
            index,
            kind: ReportKind::Weather,
            sensor_id: None,
            context,
            report_id: Some(report_id.to_string()),
            created: Utc::now(),
        }
    }

    pub fn forecast(index: u64, context: Value) -> Self {
        Self {
            index,
            kind: ReportKind::Forecast,
            sensor_id: None,
            context,
            report_id: None,
            created: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Persists a record and returns its storage id.
    async fn save(&self, record: ReportRecord) -> anyhow::Result<i64>;

    /// Attaches the backend's report id to the record saved under `index`.
    async fn attach_id(&self, index: u64, report_id: &str) -> anyhow::Result<()>;
}

/// Keeps records in memory. Deployments swap in something durable behind
/// the same trait.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<ReportRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ReportRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn save(&self, record: ReportRecord) -> anyhow::Result<i64> {
        let mut records = self.records.lock().await;
        records.push(record);
        Ok(records.len() as i64)
    }

    async fn attach_id(&self, index: u64, report_id: &str) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .rev()
            .find(|r| r.index == index)
            .ok_or_else(|| anyhow::anyhow!("no stored report with index {index}"))?;
        record.report_id = Some(report_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn attach_id_fills_the_matching_record() {
        let store = MemoryStore::new();
        store
            .save(ReportRecord::sensor(7, "s1", json!({"DO": 6.2})))
            .await
            .unwrap();
        store
            .save(ReportRecord::forecast(8, json!({"field": "DO"})))
            .await
            .unwrap();

        store.attach_id(7, "doc-123").await.unwrap();

        let records = store.records().await;
        assert_eq!(records[0].report_id.as_deref(), Some("doc-123"));
        assert_eq!(records[1].report_id, None);
        assert!(store.attach_id(99, "doc-999").await.is_err());
    }
}
