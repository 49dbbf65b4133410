use log::{info, warn};

/// Signals the core raises toward whatever presentation layer sits on top.
/// Implementations must not block: these fire from the connection and
/// supervisor contexts.
pub trait UiLink: Send + Sync {
    /// The socket session reached online.
    fn connected(&self);
    /// The server rejected the session token; a fresh login is needed.
    fn auth_expired(&self);
    /// The node profile arrived and monitors are being registered.
    fn profile_received(&self, username: &str);
    /// A device finished its reporting turn in the current pass.
    fn device_report(&self, sensor_id: &str);
    /// The server reported a request failure.
    fn failure(&self, code: i64);
}

/// Log-backed presentation link for headless deployments.
#[derive(Default)]
pub struct LogUi;

impl LogUi {
    pub fn new() -> Self {
        Self
    }
}

impl UiLink for LogUi {
    fn connected(&self) {
        info!(target: "Client/Ui", "Session online");
    }

    fn auth_expired(&self) {
        warn!(target: "Client/Ui", "Session token expired, login required");
    }

    fn profile_received(&self, username: &str) {
        info!(target: "Client/Ui", "Profile loaded for {username}");
    }

    fn device_report(&self, sensor_id: &str) {
        info!(target: "Client/Ui", "Device {sensor_id} reported");
    }

    fn failure(&self, code: i64) {
        warn!(target: "Client/Ui", "Server reported failure {code}");
    }
}
