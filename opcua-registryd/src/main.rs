use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use opcua_registryd::api;
use opcua_registryd::config::Config;
use opcua_registryd::maintenance;
use opcua_registryd::registry::{events, Registry, SupervisorTwinActivation};
use opcua_registryd::twin::{TwinDb, TwinStore, TwinStoreHandle};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("opcua_registryd=info"))
        )
        .init();

    tracing::info!("Starting opcua-registryd");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/opcua-registry/registryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let db = TwinDb::open(&config.store.db_path)?;
    tracing::info!("Opened twin store at {:?}", config.store.db_path);

    let store_handle = TwinStoreHandle::spawn(db);
    let store: Arc<dyn TwinStore> = Arc::new(store_handle.clone());
    let activation = Arc::new(SupervisorTwinActivation::new(store.clone()));
    let registry = Registry::new(store, activation, config.registry.settings());

    let cancel = CancellationToken::new();

    let events_rx = registry.events().subscribe();
    let events_handle = tokio::spawn(events::run_event_log(events_rx, cancel.clone()));

    let purge_handle = tokio::spawn(maintenance::run(
        registry.clone(),
        config.registry.authority_id.clone(),
        config.registry.purge.clone(),
        cancel.clone(),
    ));

    let app_state = api::AppState {
        registry,
        authority_id: Arc::from(config.registry.authority_id.as_str()),
        cancel: cancel.clone(),
    };
    let app = api::router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!(
        authority = %config.registry.authority_id,
        "API listening on {}",
        config.api.listen
    );

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // In-flight requests see their contexts cancelled as well
    cancel.cancel();

    let _ = tokio::join!(events_handle, purge_handle, server_handle);

    if let Err(e) = store_handle.shutdown().await {
        tracing::error!("Failed to shutdown twin store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
