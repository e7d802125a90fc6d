use anyhow::{Context, Result};
use providers::{ProviderRegistry, RelayConfig};
use server::{gateway, logging, Relay, ServerConfig};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let server_cfg = ServerConfig::from_env_and_file()?;
    let _log_guard = logging::init(server_cfg.log_dir.as_deref())?;

    let relay_cfg = RelayConfig::from_env_and_file()?;
    let registry = ProviderRegistry::from_config(&relay_cfg);
    if registry.ready().is_empty() {
        warn!(target: "server", "no provider credentials configured; every request will fail with provider_unavailable");
    }
    let relay = Relay::new(Arc::new(registry));

    let addr = server_cfg.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    info!(target: "server", "listening on ws://{}/ws", addr);

    axum::serve(listener, gateway::router(relay))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;
    info!(target: "server", "shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(target: "server", "ctrl-c handler failed: {}", e);
        std::future::pending::<()>().await;
    }
}
