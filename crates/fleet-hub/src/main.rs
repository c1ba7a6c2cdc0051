//! Fleet Hub - inbound sync endpoint for node daemons.
//!
//! Serves the `HubService` gRPC endpoint that daemons push agent-state
//! batches into, with the server half of the fixed keepalive policy
//! applied.

use anyhow::{Context, Result};
use clap::Parser;
use fleet_gateway::keepalive;
use fleet_gateway::{HubServer, MemoryAgentStateRepository, SyncGateway};
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Fleet hub - receives agent-state pushes from node daemons.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "9090", env = "FLEET_HUB_PORT")]
    port: u16,

    /// Bind address (default: all interfaces)
    #[arg(short, long, default_value = "0.0.0.0", env = "FLEET_HUB_BIND")]
    bind: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize logging
    let filter = if args.debug {
        "debug,fleet_gateway=trace"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .context("invalid bind address")?;

    // Durable storage is provisioned elsewhere; the hub runs against the
    // in-memory repository until it is wired to one.
    let repository = Arc::new(MemoryAgentStateRepository::new());
    let gateway = SyncGateway::new(repository);
    let service = HubServer::new(gateway).into_service();

    info!("fleet hub listening on {}", addr);

    Server::builder()
        .http2_keepalive_interval(Some(keepalive::SERVER_KEEPALIVE_INTERVAL))
        .http2_keepalive_timeout(Some(keepalive::SERVER_KEEPALIVE_TIMEOUT))
        .max_connection_age(keepalive::MAX_CONNECTION_AGE)
        .initial_stream_window_size(keepalive::INITIAL_WINDOW_SIZE)
        .initial_connection_window_size(keepalive::INITIAL_WINDOW_SIZE)
        .add_service(service)
        .serve_with_shutdown(addr, shutdown_signal())
        .await
        .context("hub server failed")?;

    info!("fleet hub shut down");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => warn!("failed to listen for shutdown signal: {}", e),
    }
}
