// ABOUTME: Server startup and shutdown for the code-execution gateway
// ABOUTME: Connects to Docker, recovers sessions, runs the reaper and serves the HTTP router

use anyhow::{bail, Context, Result};
use rce_api::{create_router, AppState};
use rce_sandbox::{
    spawn_reaper, DockerProvider, SandboxProvider, SandboxSettings, SessionManager,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Install the global `tracing` subscriber; `RUST_LOG` overrides the `info` default
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(rce_config::RUST_LOG)
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();
}

/// Run the gateway until Ctrl-C
pub async fn run(config: Config, settings: SandboxSettings) -> Result<()> {
    let provider = DockerProvider::new().context("Failed to create Docker client")?;
    match provider.is_available().await {
        Ok(true) => {}
        Ok(false) => bail!("Docker daemon is not responding; is it running?"),
        Err(e) => bail!("Could not connect to Docker: {}", e),
    }

    info!(
        "Sandbox image {} (memory: {} MB, cpu: {}, network: {}, gpu: {}, max sessions: {})",
        settings.image,
        settings.memory_mb,
        settings.cpu_cores,
        settings.network_enabled,
        settings.gpu_enabled,
        settings.max_sessions
    );
    if settings.is_shared_volume() {
        info!("Shared-volume file transfer enabled");
    }

    let cleanup_interval = settings.cleanup_interval;
    let manager = Arc::new(SessionManager::new(Arc::new(provider), settings));

    match manager.recover().await {
        Ok(count) => info!("Recovered {} existing session(s)", count),
        Err(e) => warn!("Session recovery failed, starting empty: {}", e),
    }

    let reaper = spawn_reaper(manager.clone(), cleanup_interval);

    let app = create_router(AppState::new(manager, config.api_key));
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!("Server listening on {}", listener.local_addr()?);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    reaper.abort();
    info!("Server stopped");

    served.context("Server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
