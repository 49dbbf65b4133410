use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};

use crate::client::Client;

pub mod forecast;
pub mod serial;
pub mod supervisor;
pub mod weather;

pub use serial::{LinkError, LinkFactory, RegisterLink, SerialLinkFactory, SerialMonitor};
pub use supervisor::MonitorSupervisor;

/// One reporting unit owned by the supervisor. Implementations run on the
/// supervisor's own context, one turn at a time.
#[async_trait]
pub trait Monitor: Send {
    fn name(&self) -> &str;

    /// The id of the physical device behind this unit, when there is one.
    fn sensor_id(&self) -> Option<&str> {
        None
    }

    /// Whether the unit's device link is currently usable.
    fn is_online(&self) -> bool;

    /// One reporting turn in a pass.
    async fn report(&mut self, client: &Arc<Client>) -> anyhow::Result<()>;

    /// Tears down any device link.
    async fn close(&mut self);
}

/// Truncates a timestamp to its minute bucket.
pub(crate) fn minute_bucket(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}
