//! switchboard: multi-endpoint MCP aggregator and bridge.
//!
//! Boot order: load the config file, connect every downstream service,
//! bring up the upstream endpoints in parallel, then serve the admin API
//! until SIGINT. Shutdown tears things down in the reverse order.

mod admin;
mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use switchboard_mcp::{CallMetrics, EndpointManager, EventBus, ServiceManager, ToolRouter};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "switchboard",
    about = "Aggregate MCP services and bridge them to WebSocket endpoints",
    version
)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, default_value = "switchboard.config.json")]
    config: PathBuf,

    /// Override the admin API port from the config file.
    #[arg(long)]
    admin_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = settings::Settings::load(&cli.config)?;

    let events = EventBus::new();
    let metrics = Arc::new(CallMetrics::new());

    let services = ServiceManager::new(config.manager_options(), events.clone());
    services.load(config.service_configs()).await?;

    let router: Arc<dyn ToolRouter> = Arc::new(services.clone());
    let endpoints = EndpointManager::new(
        router,
        config.endpoint_options(),
        Arc::clone(&metrics),
        events.clone(),
    );
    if config.mcp_endpoints.is_empty() {
        warn!("no endpoints configured; serving the admin API only");
    }
    endpoints.initialize(config.mcp_endpoints.clone()).await?;

    let shutdown = CancellationToken::new();
    let admin_state = admin::AdminState {
        services: services.clone(),
        endpoints: endpoints.clone(),
    };
    let port = cli.admin_port.unwrap_or(config.admin.port);
    let addr: SocketAddr = format!("{}:{}", config.admin.host, port)
        .parse()
        .context("invalid admin listen address")?;
    let admin_task = tokio::spawn(admin::serve(admin_state, addr, shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    shutdown.cancel();
    endpoints.stop().await;
    services.stop().await;
    match admin_task.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!("admin server exited with error: {error}"),
        Err(error) => warn!("admin task join failed: {error}"),
    }
    info!("shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
