use thiserror::Error;

/// Failures on an already-open socket. Send and close paths are best-effort;
/// callers log these and move on.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Socket is closed")]
    SocketClosed,
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Failures while dialing a new socket session.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("Server rejected the session token")]
    AuthExpired,
    #[error("WebSocket connect failed: {0}")]
    Failed(#[source] anyhow::Error),
}

/// The outcome a launch resolves with.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Session token has expired")]
    AuthExpired,
    #[error("Failed to go online: {0}")]
    Connect(#[source] anyhow::Error),
    #[error("Connection worker ended before coming online")]
    WorkerGone,
}

impl From<DialError> for LaunchError {
    fn from(err: DialError) -> Self {
        match err {
            DialError::AuthExpired => LaunchError::AuthExpired,
            DialError::Failed(e) => LaunchError::Connect(e),
        }
    }
}
