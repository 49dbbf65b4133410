use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

/// How the engine normalizes a series before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalerKind {
    Identity,
    Mean,
}

/// One minute bucket of merged readings.
#[derive(Debug, Clone, Serialize)]
pub struct FrameRow {
    pub timestamp: DateTime<Utc>,
    pub values: IndexMap<String, f64>,
}

/// A tabular window of recent readings, oldest row first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryFrame {
    pub rows: Vec<FrameRow>,
}

impl HistoryFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Seam for the forecasting engine. The core hands over a history window
/// and wraps whatever series comes back into a raw report.
#[async_trait]
pub trait Forecaster: Send + Sync {
    async fn run(
        &self,
        field: &str,
        frame: &HistoryFrame,
        scaler: ScalerKind,
    ) -> anyhow::Result<Vec<f64>>;
}

/// Stand-in wired when no engine is deployed: predicts nothing.
#[derive(Default)]
pub struct NullForecaster;

impl NullForecaster {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Forecaster for NullForecaster {
    async fn run(
        &self,
        _field: &str,
        _frame: &HistoryFrame,
        _scaler: ScalerKind,
    ) -> anyhow::Result<Vec<f64>> {
        Ok(Vec::new())
    }
}
