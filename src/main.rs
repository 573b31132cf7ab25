use relay_core::config::GatewayConfig;
use relay_server::{BackendSupervisor, ServerConfig, SupervisorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting relay gateway");

    let config = GatewayConfig::from_env();

    // The backend child shares the gateway's lifetime: spawned here, sent
    // SIGTERM on the way out.
    let supervisor = BackendSupervisor::spawn(SupervisorConfig::from_env())?;

    let handle = relay_server::start(ServerConfig::from_gateway(&config)).await?;
    tracing::info!(port = handle.port, "gateway ready");

    shutdown_signal().await;

    tracing::info!("Shutting down");
    supervisor.shutdown().await;

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
