use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber;

use palisade::config::PalisadeConfig;
use palisade::ratelimit::RateLimiter;
use palisade::server::Server;

/// TCP admission-control front-end with per-client rate limiting.
#[derive(Parser, Debug)]
#[command(name = "palisade", version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listener port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the requests admitted per client per window
    #[arg(short, long)]
    limit: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let cli = Cli::parse();

    info!("Starting Palisade Admission Control Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration, then apply CLI overrides
    let mut config = match cli.config.as_deref() {
        Some(path) => PalisadeConfig::from_file(path)?,
        None => PalisadeConfig::default(),
    };
    if let Some(port) = cli.port {
        config.server.listen_addr.set_port(port);
    }
    if let Some(limit) = cli.limit {
        config.rate_limiting.limit = limit;
    }
    config.validate()?;
    info!(
        listen_addr = %config.server.listen_addr,
        limit = config.rate_limiting.limit,
        window_secs = config.rate_limiting.window_secs,
        "Configuration loaded"
    );

    // Initialize the rate limiter
    let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limiting));
    info!("Rate limiter initialized");

    // Create and start the TCP server
    let server = Server::new(config.server.clone(), rate_limiter);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Palisade Admission Control Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
