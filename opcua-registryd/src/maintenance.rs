use std::time::Duration;
use tokio_util::sync::CancellationToken;
use crate::config::PurgeConfig;
use crate::error::RegistryError;
use crate::registry::{OperationContext, Registry};

/// Periodically unregister applications that stayed disabled past the
/// retention window.
pub async fn run(
    registry: Registry,
    authority_id: String,
    config: PurgeConfig,
    cancel: CancellationToken,
) {
    if !config.enabled {
        tracing::info!("Purge of disabled applications is off");
        return;
    }
    // capped at roughly a century
    let retention = chrono::Duration::seconds(config.retention_secs.min(3_153_600_000) as i64);
    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let ctx = OperationContext::new(authority_id.clone()).with_cancel(cancel.child_token());
                match registry.purge_disabled_applications(&ctx, retention).await {
                    Ok(purged) => tracing::debug!(purged, "Purge sweep done"),
                    Err(RegistryError::Cancelled) => break,
                    Err(e) => tracing::error!("Failed to purge disabled applications: {}", e),
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Maintenance shutting down");
                break;
            }
        }
    }
}
