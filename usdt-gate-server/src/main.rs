//! USDT deposit gateway HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p usdt-gate-server --release
//!
//! # Run with custom config path
//! cargo run -p usdt-gate-server -- --config /path/to/config.toml
//!
//! # Configure logging level
//! RUST_LOG=usdt_gate=debug,info cargo run -p usdt-gate-server
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to TOML configuration file (default: `config.toml`)
//! - `HOST` — Override bind address (default: `0.0.0.0`)
//! - `PORT` — Override port (default: `8080`)
//! - `RUST_LOG` — Log level filter (default: `info`)
//!
//! Variables may also be placed in a `.env` file in the working directory.

mod util;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::Method;
use clap::Parser;
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use usdt_gate::IntentStore;
use usdt_gate::ledger::InMemoryLedger;
use usdt_gate_explorer::build_adapters;
use usdt_gate_server::config::ServerConfig;
use usdt_gate_server::{Gateway, gateway_router};

use crate::util::SigDown;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let dotenv = dotenvy::dotenv();

    // Initialize tracing with RUST_LOG env filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }

    if let Err(e) = run(Cli::parse()).await {
        tracing::error!("Server failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load_from(&cli.config)?;
    let networks = config.network_registry();
    tracing::info!(
        host = %config.host,
        port = config.port,
        networks = ?networks.networks(),
        poll_interval_secs = config.payments.poll_interval_secs,
        "Loaded configuration"
    );

    if networks.is_empty() {
        tracing::warn!("No networks configured, deposits cannot be created");
    }

    let adapters = build_adapters(&networks, &config.payments)?;
    let store = Arc::new(IntentStore::new(networks, config.payments.clone()));
    let ledger = Arc::new(InMemoryLedger::new(
        config.payments.share_price,
        store.clock(),
    ));
    let gateway = Arc::new(Gateway::new(store, adapters, ledger));

    let sig_down = SigDown::try_new()?;
    let shutdown = sig_down.cancellation_token();
    gateway.scheduler().start(&shutdown).await;

    let app = gateway_router(Arc::clone(&gateway))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Gateway listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    gateway.scheduler().stop().await;
    sig_down.recv().await;
    tracing::info!("Gateway shut down gracefully");
    Ok(())
}
