use shared::identity::parse_module_id;
use shared::types::{DiscovererInfo, GatewayInfo, ModuleInfo, PublisherInfo, SupervisorInfo};
use crate::error::{RegistryError, Result};
use crate::registration::EntityRegistration;
use crate::twin::{TwinKey, TwinPredicate};
use super::context::OperationContext;
use super::Registry;

fn site_filter(site_id: Option<&str>) -> TwinPredicate {
    match site_id {
        Some(site) => TwinPredicate::tag_eq(TwinKey::SiteId, site),
        None => TwinPredicate::Always,
    }
}

impl Registry {
    /// Create or replace the twin of an edge module. Endpoint bindings of a
    /// supervisor are kept; they are managed through endpoint activation.
    pub async fn register_module(&self, ctx: &OperationContext, module: ModuleInfo) -> Result<()> {
        let id = module.id().to_string();
        if id.trim().is_empty() {
            return Err(RegistryError::Validation("module id is required".to_string()));
        }

        let mut entity = EntityRegistration::from(module);
        if let EntityRegistration::Supervisor(supervisor) = &mut entity {
            let (device, module_id) = parse_module_id(&id);
            match self.fetch::<SupervisorInfo>(ctx, device, module_id).await {
                Ok(stored) => supervisor.activated_endpoints = stored.activated_endpoints,
                Err(RegistryError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        let twin = entity
            .to_twin()
            .ok_or_else(|| RegistryError::Validation(format!("Cannot register {id}")))?;

        ctx.run(self.store.create_or_update(twin, true)).await?;
        tracing::info!(id = %id, "Registered module");
        Ok(())
    }

    pub async fn get_module(&self, ctx: &OperationContext, id: &str) -> Result<ModuleInfo> {
        let (device, module_id) = parse_module_id(id);
        let twin = ctx.run(self.store.get(device, module_id)).await?;
        EntityRegistration::from_twin(&twin)
            .into_module()
            .ok_or_else(|| RegistryError::NotFound(format!("Module {id}")))
    }

    pub async fn list_supervisors(&self, ctx: &OperationContext, site_id: Option<&str>) -> Result<Vec<SupervisorInfo>> {
        self.query_all(ctx, site_filter(site_id)).await
    }

    pub async fn list_discoverers(&self, ctx: &OperationContext, site_id: Option<&str>) -> Result<Vec<DiscovererInfo>> {
        self.query_all(ctx, site_filter(site_id)).await
    }

    pub async fn list_publishers(&self, ctx: &OperationContext, site_id: Option<&str>) -> Result<Vec<PublisherInfo>> {
        self.query_all(ctx, site_filter(site_id)).await
    }

    pub async fn list_gateways(&self, ctx: &OperationContext, site_id: Option<&str>) -> Result<Vec<GatewayInfo>> {
        self.query_all(ctx, site_filter(site_id)).await
    }
}
