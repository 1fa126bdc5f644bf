//! Copilot server - HTTP service for the regulatory copilot
//!
//! Usage:
//!   copilot-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>      Path to configuration file (default: config.toml, optional)
//!   --host <HOST>        API server host (default: 0.0.0.0)
//!   --port <PORT>        API server port (default: 8080, PORT env overrides)
//!   --snapshot <PATH>    Preloaded corpus snapshot (overrides config)

use reg_copilot::api::{start_server, AppState};
use reg_copilot::config::CopilotConfig;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Default)]
struct ServerArgs {
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    snapshot: Option<String>,
}

fn parse_args() -> ServerArgs {
    let mut parsed = ServerArgs::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(path) = args.next() {
                    parsed.config_path = Some(PathBuf::from(path));
                }
            }
            "--host" => {
                if let Some(host) = args.next() {
                    parsed.host = Some(host);
                }
            }
            "--port" => {
                if let Some(port) = args.next() {
                    if let Ok(p) = port.parse() {
                        parsed.port = Some(p);
                    }
                }
            }
            "--snapshot" => {
                if let Some(path) = args.next() {
                    parsed.snapshot = Some(path);
                }
            }
            other => {
                warn!("Ignoring unknown argument: {}", other);
            }
        }
    }

    parsed
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args();

    let mut config = match &args.config_path {
        Some(path) => CopilotConfig::from_file(path)?,
        None => {
            let default_path = PathBuf::from("config.toml");
            if default_path.exists() {
                CopilotConfig::from_file(&default_path)?
            } else {
                CopilotConfig::default()
            }
        }
    };

    config.apply_env();
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(snapshot) = args.snapshot {
        config.ingest.snapshot_path = Some(snapshot);
    }
    config.validate()?;

    info!(
        "Starting regulatory copilot v{} on {}:{}",
        reg_copilot::VERSION,
        config.server.host,
        config.server.port
    );

    let host = config.server.host.clone();
    let port = config.server.port;

    let state = AppState::new(config).await?;

    if let Err(e) = start_server(state, &host, port).await {
        error!("Server exited with error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
