use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use log::{error, info};

use pondlink::api::Backend;
use pondlink::client::Client;
use pondlink::config::ClientConfig;
use pondlink::forecast::NullForecaster;
use pondlink::monitor::supervisor::MonitorSupervisor;
use pondlink::monitor::SerialLinkFactory;
use pondlink::socket::ws::WsTransportFactory;
use pondlink::socket::NORMAL_CLOSE;
use pondlink::store::MemoryStore;
use pondlink::ui::LogUi;

#[derive(Parser, Debug)]
#[command(name = "pondlink", about = "Pond telemetry client")]
struct Args {
    /// Account username, used when no session token is given
    #[arg(long)]
    username: Option<String>,

    /// Account password, used when no session token is given
    #[arg(long)]
    password: Option<String>,

    /// Credential name to mint the session token for
    #[arg(long, default_value = "default")]
    credential: String,

    /// Session token, skips the login roundtrip entirely
    #[arg(long)]
    token: Option<String>,

    /// Socket endpoint override
    #[arg(long)]
    endpoint: Option<String>,

    /// REST base override
    #[arg(long)]
    api_base: Option<String>,

    /// Hardware signature presented when the backend asks for registration
    #[arg(long)]
    signature: Option<String>,
}

/// How long shutdown waits for the workers before giving up.
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async {
        let mut config = ClientConfig::default();
        if let Some(endpoint) = args.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(api_base) = args.api_base {
            config.api_base = api_base;
        }
        config.signature = match args.signature {
            Some(signature) => signature,
            None => std::env::var("PONDLINK_SIGNATURE").unwrap_or_default(),
        };

        let token = match session_token(&config, &args.token, &args.username, &args.password, &args.credential).await {
            Some(token) => token,
            None => return,
        };

        let client = match Client::new(
            config,
            Arc::new(WsTransportFactory),
            Arc::new(MemoryStore::new()),
            Arc::new(NullForecaster),
            Arc::new(LogUi),
        ) {
            Ok(client) => client,
            Err(e) => {
                error!(target: "Client", "Packet registry is inconsistent: {e}");
                return;
            }
        };

        let supervisor = MonitorSupervisor::new(client.clone(), Arc::new(SerialLinkFactory));
        client.wire_monitors(supervisor.clone());

        if let Err(e) = client.launch(&token).await {
            error!(target: "Client", "Session launch failed: {e}");
            return;
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(target: "Client", "Signal handler failed: {e}");
        }
        info!(target: "Client", "Shutting down");
        if tokio::time::timeout(SHUTDOWN_GRACE, supervisor.stop())
            .await
            .is_err()
        {
            error!(target: "Client", "Monitor worker never finished its pass, exiting anyway");
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, client.stop(NORMAL_CLOSE, "Client shutdown"))
            .await
            .is_err()
        {
            error!(target: "Client", "Connection worker never closed, exiting anyway");
        }
        info!(target: "Client", "Shutdown complete");
    });
}

/// Resolves the session token: either taken from the command line or minted
/// through the account endpoints.
async fn session_token(
    config: &ClientConfig,
    token: &Option<String>,
    username: &Option<String>,
    password: &Option<String>,
    credential: &str,
) -> Option<String> {
    if let Some(token) = token {
        return Some(token.clone());
    }
    let (Some(username), Some(password)) = (username, password) else {
        error!(
            target: "Client",
            "Either --token or --username and --password are required"
        );
        return None;
    };
    let backend = Backend::new(&config.api_base);
    let bearer = match backend.login(username, password).await {
        Ok(bearer) => bearer,
        Err(e) => {
            error!(target: "Client", "Login failed: {e}");
            return None;
        }
    };
    info!(target: "Client", "Logged in as {username}");
    match backend.token_generate(&bearer, credential).await {
        Ok(token) => Some(token),
        Err(e) => {
            error!(target: "Client", "Minting a session token failed: {e}");
            None
        }
    }
}
