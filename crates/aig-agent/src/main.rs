use std::sync::Arc;
use std::time::Duration;

use aig_agent::config::{local_hostname, AgentConfig};
use aig_agent::dispatcher::HandlerRegistry;
use aig_agent::handler::default_handlers;
use aig_agent::session::{ConnectionState, SessionConfig};
use aig_agent::{agent_loop, health, preflight};
use aig_service::{FileTransfer, HttpService};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = AgentConfig::parse();
    info!("aig-agent {} starting", env!("CARGO_PKG_VERSION"));

    let ws_url = config.ws_url().context("invalid --server address")?;
    let http_base = config.http_base_url().context("invalid --server address")?;
    info!("server: {ws_url}");

    let defaults = config.model_defaults();
    match &defaults.default_model {
        Some(m) => info!("default model: {}", m.model),
        None => warn!("no default model configured; tasks without model settings will fail"),
    }
    if let Some(m) = &defaults.eval_model {
        info!("evaluation model override: {}", m.model);
    }

    let tool = config.tool_settings();
    tool.validate()?;
    let service = Arc::new(HttpService::with_timeout(
        &http_base,
        config.transfer_timeout(),
    ));
    let transfer: Arc<dyn FileTransfer> = service.clone();
    let registry = Arc::new(HandlerRegistry::with_handlers(default_handlers(
        transfer,
        defaults,
        tool.clone(),
    ))?);
    info!("handlers: {}", registry.names().join(", "));

    if config.skip_preflight {
        warn!("preflight checks skipped");
    } else {
        preflight::run_all(&tool, &service).await?;
    }

    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

    // Start health endpoint in background
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_port, state_rx).await {
            error!("health server failed: {e}");
        }
    });
    info!("health endpoint: http://127.0.0.1:{health_port}/health");

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            on_signal.cancel();
        }
    });

    let session = SessionConfig {
        url: ws_url,
        agent_id: config.agent_id(),
        hostname: local_hostname(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        heartbeat_interval: config.heartbeat_interval(),
        teardown_timeout: tool.kill_grace + Duration::from_secs(5),
    };
    agent_loop::run(
        session,
        registry,
        state_tx,
        config.reconnect_interval(),
        shutdown,
    )
    .await;

    Ok(())
}
