//! Fire-and-forget notifications about registry transitions

use shared::types::{ApplicationInfo, EndpointInfo, RegistryOperation};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    ApplicationNew { context: RegistryOperation, application: ApplicationInfo },
    ApplicationUpdated { context: RegistryOperation, application: ApplicationInfo },
    ApplicationEnabled { context: RegistryOperation, application: ApplicationInfo },
    ApplicationDisabled { context: RegistryOperation, application: ApplicationInfo },
    ApplicationDeleted { context: RegistryOperation, application: ApplicationInfo },
    EndpointNew { context: RegistryOperation, endpoint: EndpointInfo },
    EndpointUpdated { context: RegistryOperation, endpoint: EndpointInfo },
    EndpointEnabled { context: RegistryOperation, endpoint: EndpointInfo },
    EndpointDisabled { context: RegistryOperation, endpoint: EndpointInfo },
    EndpointDeleted { context: RegistryOperation, endpoint: EndpointInfo },
}

impl RegistryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RegistryEvent::ApplicationNew { .. } => "ApplicationNew",
            RegistryEvent::ApplicationUpdated { .. } => "ApplicationUpdated",
            RegistryEvent::ApplicationEnabled { .. } => "ApplicationEnabled",
            RegistryEvent::ApplicationDisabled { .. } => "ApplicationDisabled",
            RegistryEvent::ApplicationDeleted { .. } => "ApplicationDeleted",
            RegistryEvent::EndpointNew { .. } => "EndpointNew",
            RegistryEvent::EndpointUpdated { .. } => "EndpointUpdated",
            RegistryEvent::EndpointEnabled { .. } => "EndpointEnabled",
            RegistryEvent::EndpointDisabled { .. } => "EndpointDisabled",
            RegistryEvent::EndpointDeleted { .. } => "EndpointDeleted",
        }
    }

    /// Id of the application or endpoint the event is about
    pub fn entity_id(&self) -> &str {
        match self {
            RegistryEvent::ApplicationNew { application, .. }
            | RegistryEvent::ApplicationUpdated { application, .. }
            | RegistryEvent::ApplicationEnabled { application, .. }
            | RegistryEvent::ApplicationDisabled { application, .. }
            | RegistryEvent::ApplicationDeleted { application, .. } => &application.application_id,
            RegistryEvent::EndpointNew { endpoint, .. }
            | RegistryEvent::EndpointUpdated { endpoint, .. }
            | RegistryEvent::EndpointEnabled { endpoint, .. }
            | RegistryEvent::EndpointDisabled { endpoint, .. }
            | RegistryEvent::EndpointDeleted { endpoint, .. } => &endpoint.id,
        }
    }

    pub fn context(&self) -> &RegistryOperation {
        match self {
            RegistryEvent::ApplicationNew { context, .. }
            | RegistryEvent::ApplicationUpdated { context, .. }
            | RegistryEvent::ApplicationEnabled { context, .. }
            | RegistryEvent::ApplicationDisabled { context, .. }
            | RegistryEvent::ApplicationDeleted { context, .. }
            | RegistryEvent::EndpointNew { context, .. }
            | RegistryEvent::EndpointUpdated { context, .. }
            | RegistryEvent::EndpointEnabled { context, .. }
            | RegistryEvent::EndpointDisabled { context, .. }
            | RegistryEvent::EndpointDeleted { context, .. } => context,
        }
    }
}

/// Broadcast bus for registry events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RegistryEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: RegistryEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Log every registry transition until cancelled
pub async fn run_event_log(
    mut rx: broadcast::Receiver<RegistryEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        tracing::info!(
                            event = event.name(),
                            id = event.entity_id(),
                            authority = %event.context().authority_id,
                            "Registry transition"
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event log lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Event log shutting down");
                break;
            }
        }
    }
}
