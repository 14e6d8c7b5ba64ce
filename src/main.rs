use geo6_api::{create_app, AppState, Config, PeerAddrs, PolicyStore};
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "geo6_api=debug,tower_http=debug".into()),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        access_file = %config.access.file.display(),
        quota_dir = %config.quota.directory.display(),
        postgrest = config.database.postgrest_url.is_some(),
        "Starting GEO-6 API server"
    );
    if config.debug {
        warn!("Debug mode is on: authentication and quota failures will not be rejected");
    }

    // Consumer access rules
    let policies = PolicyStore::load(&config.access.file)?;
    info!(
        "Loaded {} consumer(s) from {}",
        policies.len(),
        config.access.file.display()
    );

    let (host, port) = (config.server.host.clone(), config.server.port);

    let state = AppState::new(config, policies);
    let app = create_app(state);

    // Run the server with graceful shutdown
    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<PeerAddrs>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, draining connections"),
        _ = terminate => info!("Received SIGTERM, draining connections"),
    }
}
