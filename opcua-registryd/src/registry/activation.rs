use std::sync::Arc;
use async_trait::async_trait;
use shared::identity::parse_module_id;
use shared::types::EndpointInfo;
use crate::error::Result;
use crate::twin::{Twin, TwinKey, TwinStore};
use super::context::OperationContext;

/// Binds and unbinds the runtime connection a supervisor holds for an
/// endpoint.
#[async_trait]
pub trait EndpointActivation: Send + Sync {
    async fn activate(
        &self,
        ctx: &OperationContext,
        endpoint: &EndpointInfo,
        supervisor_id: &str,
    ) -> Result<()>;

    async fn deactivate(
        &self,
        ctx: &OperationContext,
        endpoint: &EndpointInfo,
        supervisor_id: &str,
    ) -> Result<()>;
}

/// Records endpoint bindings in the desired properties of the supervisor
/// twin, where the supervisor picks them up.
pub struct SupervisorTwinActivation {
    store: Arc<dyn TwinStore>,
}

impl SupervisorTwinActivation {
    pub fn new(store: Arc<dyn TwinStore>) -> Self {
        Self { store }
    }

    async fn set_binding(
        &self,
        ctx: &OperationContext,
        endpoint: &EndpointInfo,
        supervisor_id: &str,
        bound: bool,
    ) -> Result<()> {
        let (device, module) = parse_module_id(supervisor_id);
        let mut patch = Twin::new(device, module.map(str::to_string));
        let key = TwinKey::ActivatedEndpoint(endpoint.id.clone());
        if bound {
            patch.desired.set(key, true);
        } else {
            patch.desired.clear(key);
        }
        // Only this endpoint's key is touched, so no etag is needed
        ctx.run(self.store.patch(patch, None, false)).await?;
        Ok(())
    }
}

#[async_trait]
impl EndpointActivation for SupervisorTwinActivation {
    async fn activate(
        &self,
        ctx: &OperationContext,
        endpoint: &EndpointInfo,
        supervisor_id: &str,
    ) -> Result<()> {
        tracing::debug!(endpoint = %endpoint.id, supervisor = supervisor_id, "Binding endpoint");
        self.set_binding(ctx, endpoint, supervisor_id, true).await
    }

    async fn deactivate(
        &self,
        ctx: &OperationContext,
        endpoint: &EndpointInfo,
        supervisor_id: &str,
    ) -> Result<()> {
        tracing::debug!(endpoint = %endpoint.id, supervisor = supervisor_id, "Unbinding endpoint");
        self.set_binding(ctx, endpoint, supervisor_id, false).await
    }
}
