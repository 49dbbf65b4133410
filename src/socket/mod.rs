pub mod conn;
pub mod error;
pub mod transport;
pub mod ws;

pub use conn::{ConnState, ConnectionHandle, NORMAL_CLOSE};
pub use error::{DialError, LaunchError, TransportError};
pub use transport::{Transport, TransportEvent, TransportFactory};
pub use ws::WsTransportFactory;
