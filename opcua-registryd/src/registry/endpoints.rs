use shared::identity::{endpoint_id, normalize_uri};
use shared::types::{ActivationState, EndpointInfo, EndpointQuery, ListResult};
use crate::error::{RegistryError, Result};
use crate::registration::Registration;
use crate::twin::{TwinKey, TwinPredicate};
use super::applications::{endpoints_of, not_disabled, owned_by_other};
use super::context::OperationContext;
use super::events::RegistryEvent;
use super::reconcile::{partition, ItemOutcome, ReconcileStats};
use super::Registry;

pub fn endpoint_predicate(query: &EndpointQuery) -> TwinPredicate {
    let mut predicate = TwinPredicate::Always;
    if let Some(url) = &query.url {
        predicate = predicate.and(TwinPredicate::tag_eq(TwinKey::EndpointUrlLC, normalize_uri(url)));
    }
    if let Some(application_id) = &query.application_id {
        predicate = predicate.and(endpoints_of(application_id));
    }
    if let Some(site) = &query.site_or_gateway_id {
        predicate = predicate.and(TwinPredicate::tag_eq(TwinKey::SiteId, site.as_str()));
    }
    if let Some(discoverer_id) = &query.discoverer_id {
        predicate = predicate.and(TwinPredicate::tag_eq(TwinKey::DiscovererId, discoverer_id.as_str()));
    }
    if let Some(mode) = query.security_mode {
        predicate = predicate.and(TwinPredicate::tag_eq(TwinKey::SecurityMode, mode.as_str()));
    }
    if let Some(policy) = &query.security_policy {
        predicate = predicate.and(TwinPredicate::tag_eq(TwinKey::SecurityPolicy, policy.trim()));
    }
    if let Some(activated) = query.activated {
        let state = if activated { "Activated" } else { "Deactivated" };
        predicate = predicate.and(TwinPredicate::tag_eq(TwinKey::ActivationState, state));
    }
    if !query.include_not_seen_since {
        predicate = predicate.and(not_disabled());
    }
    predicate
}

/// Stamp a found endpoint with its owner and derive its id.
pub(crate) fn stamp_endpoint(
    mut endpoint: EndpointInfo,
    application_id: &str,
    discoverer_id: &str,
    site_id: Option<&str>,
) -> EndpointInfo {
    endpoint.application_id = application_id.to_string();
    endpoint.discoverer_id = Some(discoverer_id.to_string());
    endpoint.site_id = site_id.map(str::to_string);
    endpoint.id = endpoint_id(
        application_id,
        &endpoint.endpoint_url,
        &endpoint.security_policy,
        endpoint.security_mode,
        endpoint.credential,
    );
    endpoint.not_seen_since = None;
    endpoint
}

impl Registry {
    pub async fn get_endpoint(&self, ctx: &OperationContext, id: &str) -> Result<EndpointInfo> {
        self.fetch(ctx, id, None).await
    }

    pub async fn list_endpoints(
        &self,
        ctx: &OperationContext,
        continuation: Option<String>,
        page_size: Option<usize>,
    ) -> Result<ListResult<EndpointInfo>> {
        self.query_page(ctx, TwinPredicate::Always, continuation, page_size).await
    }

    pub async fn query_endpoints(
        &self,
        ctx: &OperationContext,
        query: &EndpointQuery,
        continuation: Option<String>,
        page_size: Option<usize>,
    ) -> Result<ListResult<EndpointInfo>> {
        self.query_page(ctx, endpoint_predicate(query), continuation, page_size).await
    }

    pub async fn enable_endpoint(&self, ctx: &OperationContext, id: &str) -> Result<()> {
        let endpoint = self.fetch::<EndpointInfo>(ctx, id, None).await?;
        self.enable_endpoint_entity(ctx, &endpoint).await?;
        Ok(())
    }

    pub async fn disable_endpoint(&self, ctx: &OperationContext, id: &str) -> Result<()> {
        let endpoint = self.fetch::<EndpointInfo>(ctx, id, None).await?;
        self.disable_endpoint_entity(ctx, &endpoint).await?;
        Ok(())
    }

    /// Bind an endpoint to a supervisor. Disabled endpoints cannot be
    /// activated and a failed bind leaves the endpoint untouched.
    pub async fn activate_endpoint(
        &self,
        ctx: &OperationContext,
        id: &str,
        supervisor_id: &str,
    ) -> Result<()> {
        if supervisor_id.trim().is_empty() {
            return Err(RegistryError::Validation("supervisor_id is required".to_string()));
        }
        let endpoint = self.fetch::<EndpointInfo>(ctx, id, None).await?;
        if !endpoint.is_enabled() {
            return Err(RegistryError::Validation(format!("Endpoint {id} is disabled")));
        }
        self.activation.activate(ctx, &endpoint, supervisor_id).await?;

        let update = self
            .update_entity::<EndpointInfo, (), _>(ctx, id, None, |current| {
                current.activation_state = ActivationState::Activated;
                current.supervisor_id = Some(supervisor_id.to_string());
                Ok((true, ()))
            })
            .await?;
        if update.patched {
            tracing::info!(id, supervisor = supervisor_id, "Activated endpoint");
            self.events.emit(RegistryEvent::EndpointUpdated {
                context: ctx.operation(),
                endpoint: update.current,
            });
        }
        Ok(())
    }

    pub async fn deactivate_endpoint(&self, ctx: &OperationContext, id: &str) -> Result<()> {
        let endpoint = self.fetch::<EndpointInfo>(ctx, id, None).await?;
        if let Some(supervisor_id) = &endpoint.supervisor_id {
            self.activation.deactivate(ctx, &endpoint, supervisor_id).await?;
        }

        let update = self
            .update_entity::<EndpointInfo, (), _>(ctx, id, None, |current| {
                current.activation_state = ActivationState::Deactivated;
                current.supervisor_id = None;
                Ok((true, ()))
            })
            .await?;
        if update.patched {
            tracing::info!(id, "Deactivated endpoint");
            self.events.emit(RegistryEvent::EndpointUpdated {
                context: ctx.operation(),
                endpoint: update.current,
            });
        }
        Ok(())
    }

    /// Disable every enabled endpoint of an application. Failures are
    /// logged per endpoint.
    pub(crate) async fn disable_endpoints_of(&self, ctx: &OperationContext, application_id: &str) {
        let predicate = endpoints_of(application_id).and(not_disabled());
        let endpoints = match self.query_all::<EndpointInfo>(ctx, predicate).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                tracing::error!(application = application_id, error = %e, "Failed to list endpoints to disable");
                return;
            }
        };
        for endpoint in &endpoints {
            if let Err(e) = self.disable_endpoint_entity(ctx, endpoint).await {
                tracing::error!(application = application_id, endpoint = %endpoint.id, error = %e, "Failed to disable endpoint");
            }
        }
    }

    /// Re-enable every disabled endpoint of an application. Failures are
    /// logged per endpoint.
    pub(crate) async fn enable_endpoints_of(&self, ctx: &OperationContext, application_id: &str) {
        let predicate = endpoints_of(application_id).and(TwinPredicate::TagPresent(TwinKey::NotSeenSince));
        let endpoints = match self.query_all::<EndpointInfo>(ctx, predicate).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                tracing::error!(application = application_id, error = %e, "Failed to list endpoints to enable");
                return;
            }
        };
        for endpoint in &endpoints {
            if let Err(e) = self.enable_endpoint_entity(ctx, endpoint).await {
                tracing::error!(application = application_id, endpoint = %endpoint.id, error = %e, "Failed to enable endpoint");
            }
        }
    }

    /// Unbind the runtime connection, best effort.
    async fn unbind(&self, ctx: &OperationContext, endpoint: &EndpointInfo) {
        if !endpoint.is_activated() {
            return;
        }
        if let Some(supervisor_id) = &endpoint.supervisor_id {
            if let Err(e) = self.activation.deactivate(ctx, endpoint, supervisor_id).await {
                tracing::warn!(endpoint = %endpoint.id, supervisor = %supervisor_id, error = %e, "Failed to unbind endpoint");
            }
        }
    }

    /// Restore the runtime connection of an activated endpoint, best effort.
    async fn rebind(&self, ctx: &OperationContext, endpoint: &EndpointInfo) {
        if !endpoint.is_activated() {
            return;
        }
        if let Some(supervisor_id) = &endpoint.supervisor_id {
            if let Err(e) = self.activation.activate(ctx, endpoint, supervisor_id).await {
                tracing::warn!(endpoint = %endpoint.id, supervisor = %supervisor_id, error = %e, "Failed to rebind endpoint");
            }
        }
    }

    /// Returns whether the endpoint changed state.
    pub(crate) async fn disable_endpoint_entity(&self, ctx: &OperationContext, endpoint: &EndpointInfo) -> Result<bool> {
        if !endpoint.is_enabled() {
            return Ok(false);
        }
        self.unbind(ctx, endpoint).await;
        let update = self
            .update_entity::<EndpointInfo, (), _>(ctx, &endpoint.id, None, |current| {
                if !current.is_enabled() {
                    return Ok((false, ()));
                }
                current.not_seen_since = Some(ctx.time);
                Ok((true, ()))
            })
            .await?;
        if !update.patched {
            return Ok(false);
        }
        tracing::debug!(id = %endpoint.id, "Disabled endpoint");
        self.events.emit(RegistryEvent::EndpointDisabled {
            context: ctx.operation(),
            endpoint: update.current,
        });
        Ok(true)
    }

    /// Returns whether the endpoint changed state.
    pub(crate) async fn enable_endpoint_entity(&self, ctx: &OperationContext, endpoint: &EndpointInfo) -> Result<bool> {
        let update = self
            .update_entity::<EndpointInfo, (), _>(ctx, &endpoint.id, None, |current| {
                if current.is_enabled() {
                    return Ok((false, ()));
                }
                current.not_seen_since = None;
                Ok((true, ()))
            })
            .await?;
        if !update.patched {
            return Ok(false);
        }
        tracing::debug!(id = %endpoint.id, "Enabled endpoint");
        self.rebind(ctx, &update.current).await;
        self.events.emit(RegistryEvent::EndpointEnabled {
            context: ctx.operation(),
            endpoint: update.current,
        });
        Ok(true)
    }

    /// Unbind and delete one endpoint.
    pub(crate) async fn delete_endpoint_entity(&self, ctx: &OperationContext, endpoint: &EndpointInfo) -> Result<()> {
        self.unbind(ctx, endpoint).await;
        match ctx.run(self.store.delete(&endpoint.id, None, None)).await {
            Ok(()) | Err(RegistryError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        tracing::debug!(id = %endpoint.id, "Deleted endpoint");
        self.events.emit(RegistryEvent::EndpointDeleted {
            context: ctx.operation(),
            endpoint: endpoint.clone(),
        });
        Ok(())
    }

    /// Reconcile the endpoints a discoverer found for one application
    /// against those stored for it. `found` must already be stamped.
    pub(crate) async fn sync_endpoints(
        &self,
        ctx: &OperationContext,
        discoverer_id: &str,
        application_id: &str,
        found: Vec<EndpointInfo>,
        register_only: bool,
        hard_delete: bool,
    ) -> Result<ReconcileStats> {
        let existing = self.query_all::<EndpointInfo>(ctx, endpoints_of(application_id)).await?;
        let work = partition(found, existing);
        let mut stats = ReconcileStats::default();

        if !register_only {
            for endpoint in &work.to_remove {
                let result = self.remove_endpoint(ctx, discoverer_id, endpoint, hard_delete).await;
                stats.record("endpoint", &endpoint.id, result)?;
            }
        }
        for (existing, found) in &work.to_update {
            let result = self.merge_endpoint(ctx, discoverer_id, existing, found).await;
            stats.record("endpoint", &existing.id, result)?;
        }
        for found in work.to_add {
            let id = found.id.clone();
            let result = self.add_endpoint(ctx, discoverer_id, found).await;
            stats.record("endpoint", &id, result)?;
        }

        tracing::debug!(application = application_id, ?stats, "Reconciled endpoints");
        Ok(stats)
    }

    async fn remove_endpoint(
        &self,
        ctx: &OperationContext,
        discoverer_id: &str,
        endpoint: &EndpointInfo,
        hard_delete: bool,
    ) -> Result<ItemOutcome> {
        if endpoint.discoverer_id.as_deref() != Some(discoverer_id) {
            return Ok(ItemOutcome::Unchanged);
        }
        if hard_delete {
            self.delete_endpoint_entity(ctx, endpoint).await?;
            return Ok(ItemOutcome::Removed);
        }
        if self.disable_endpoint_entity(ctx, endpoint).await? {
            Ok(ItemOutcome::Removed)
        } else {
            Ok(ItemOutcome::Unchanged)
        }
    }

    async fn merge_endpoint(
        &self,
        ctx: &OperationContext,
        discoverer_id: &str,
        existing: &EndpointInfo,
        found: &EndpointInfo,
    ) -> Result<ItemOutcome> {
        if owned_by_other(existing.discoverer_id.as_deref(), existing.is_enabled(), discoverer_id) {
            tracing::debug!(id = %existing.id, owner = ?existing.discoverer_id, "Endpoint owned by another discoverer");
            return Ok(ItemOutcome::Unchanged);
        }

        let update = self
            .update_entity::<EndpointInfo, bool, _>(ctx, &existing.id, None, |current| {
                if owned_by_other(current.discoverer_id.as_deref(), current.is_enabled(), discoverer_id) {
                    return Ok((false, false));
                }
                let was_disabled = !current.is_enabled();
                let desired = EndpointInfo {
                    endpoint_url: found.endpoint_url.clone(),
                    alternative_urls: found.alternative_urls.clone(),
                    security_level: found.security_level,
                    credential: found.credential,
                    authentication_methods: found.authentication_methods.clone(),
                    server_thumbprint: found.server_thumbprint.clone(),
                    site_id: found.site_id.clone(),
                    discoverer_id: Some(discoverer_id.to_string()),
                    not_seen_since: None,
                    ..current.clone()
                };
                if desired == *current {
                    return Ok((false, false));
                }
                *current = desired;
                Ok((true, was_disabled))
            })
            .await?;

        if !update.patched {
            return Ok(ItemOutcome::Unchanged);
        }
        if update.extra {
            self.rebind(ctx, &update.current).await;
            self.events.emit(RegistryEvent::EndpointEnabled {
                context: ctx.operation(),
                endpoint: update.current,
            });
        } else {
            self.events.emit(RegistryEvent::EndpointUpdated {
                context: ctx.operation(),
                endpoint: update.current,
            });
        }
        Ok(ItemOutcome::Updated)
    }

    async fn add_endpoint(
        &self,
        ctx: &OperationContext,
        discoverer_id: &str,
        found: EndpointInfo,
    ) -> Result<ItemOutcome> {
        let found = EndpointInfo {
            activation_state: ActivationState::Deactivated,
            supervisor_id: None,
            ..found
        };
        match ctx.run(self.store.create_or_update(found.to_twin(), false)).await {
            Ok(_) => {
                tracing::debug!(id = %found.id, discoverer = discoverer_id, "Added endpoint");
                self.events.emit(RegistryEvent::EndpointNew {
                    context: ctx.operation(),
                    endpoint: found,
                });
                Ok(ItemOutcome::Added)
            }
            Err(RegistryError::Conflict(_)) => {
                let existing = self.fetch::<EndpointInfo>(ctx, &found.id, None).await?;
                self.merge_endpoint(ctx, discoverer_id, &existing, &found).await
            }
            Err(e) => Err(e),
        }
    }
}
