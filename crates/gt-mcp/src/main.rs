//! Gas Town MCP server entrypoint.

use anyhow::Context;
use gt_core::{GtConfig, LOCAL_MACHINE};
use gt_mcp::{AppState, create_router};
use gt_transport::MachineRegistry;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = GtConfig::load(None).context("loading town configuration")?;
    let registry = MachineRegistry::new(config.machines()?);
    let transport = registry.get_connection(LOCAL_MACHINE).await?;
    let state = AppState::new(&config, transport);

    if state.token.is_none() {
        warn!("No instance token configured, signature verification is disabled");
    }

    let addr = format!("{}:{}", config.mcp.host, config.mcp.port);
    info!(
        %addr,
        gt_root = %config.town_root.display(),
        token_configured = state.token.is_some(),
        "Starting Gas Town MCP server"
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, create_router(Arc::new(state)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("MCP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
