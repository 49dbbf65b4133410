pub const DEFAULT_ENDPOINT: &str = "wss://api.pondlink.net/ws";
pub const DEFAULT_API_BASE: &str = "https://api.pondlink.net";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// WebSocket endpoint for the packet session.
    pub endpoint: String,
    /// Base URL of the REST backend.
    pub api_base: String,
    /// Hardware signature identifying this node.
    pub signature: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            signature: String::new(),
        }
    }
}
