use std::collections::BTreeSet;
use chrono::Duration;
use shared::identity::{application_id, normalize_uri};
use shared::types::{
    ApplicationInfo, ApplicationQuery, ApplicationRecord, ApplicationRegistrationRequest,
    ApplicationRegistrationResult, ApplicationRegistrationUpdate, ApplicationType, EndpointInfo,
    ListResult,
};
use crate::error::{RegistryError, Result};
use crate::registration::Registration;
use crate::twin::{TwinKey, TwinPredicate};
use super::context::OperationContext;
use super::events::RegistryEvent;
use super::reconcile::ItemOutcome;
use super::Registry;

pub(crate) fn normalize_capabilities(capabilities: &BTreeSet<String>) -> BTreeSet<String> {
    capabilities
        .iter()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Enabled entity owned by someone other than `discoverer_id`.
pub(crate) fn owned_by_other(owner: Option<&str>, enabled: bool, discoverer_id: &str) -> bool {
    enabled && owner.is_some_and(|owner| owner != discoverer_id)
}

pub(crate) fn endpoints_of(application_id: &str) -> TwinPredicate {
    TwinPredicate::tag_eq(TwinKey::ApplicationId, application_id)
}

pub(crate) fn not_disabled() -> TwinPredicate {
    TwinPredicate::Not(Box::new(TwinPredicate::TagPresent(TwinKey::NotSeenSince)))
}

fn type_predicate(application_type: ApplicationType) -> TwinPredicate {
    let exact = TwinPredicate::tag_eq(TwinKey::ApplicationType, application_type.as_str());
    match application_type {
        ApplicationType::Server | ApplicationType::Client => TwinPredicate::Any(vec![
            exact,
            TwinPredicate::tag_eq(TwinKey::ApplicationType, ApplicationType::ClientAndServer.as_str()),
        ]),
        _ => exact,
    }
}

/// Translate an application query into a twin predicate.
pub fn application_predicate(query: &ApplicationQuery) -> TwinPredicate {
    let mut predicate = TwinPredicate::Always;
    if let Some(uri) = &query.application_uri {
        predicate = predicate.and(TwinPredicate::tag_eq(TwinKey::ApplicationUriLC, normalize_uri(uri)));
    }
    if let Some(product_uri) = &query.product_uri {
        predicate = predicate.and(TwinPredicate::tag_eq(TwinKey::ProductUri, product_uri.as_str()));
    }
    if let Some(application_type) = query.application_type {
        predicate = predicate.and(type_predicate(application_type));
    }
    if let Some(name) = &query.application_name {
        predicate = predicate.and(TwinPredicate::tag_eq(TwinKey::ApplicationName, name.as_str()));
    }
    if let Some(locale) = &query.locale {
        predicate = predicate.and(TwinPredicate::tag_eq(TwinKey::Locale, locale.as_str()));
    }
    if let Some(capability) = &query.capability {
        predicate = predicate.and(TwinPredicate::TagContains(
            TwinKey::Capabilities,
            capability.trim().to_uppercase().into(),
        ));
    }
    if let Some(profile) = &query.discovery_profile_uri {
        predicate = predicate.and(TwinPredicate::tag_eq(TwinKey::DiscoveryProfileUri, profile.as_str()));
    }
    if let Some(gateway_server_uri) = &query.gateway_server_uri {
        predicate = predicate.and(TwinPredicate::tag_eq(TwinKey::GatewayServerUri, gateway_server_uri.as_str()));
    }
    if let Some(site) = &query.site_or_gateway_id {
        predicate = predicate.and(TwinPredicate::tag_eq(TwinKey::SiteId, site.as_str()));
    }
    if let Some(discoverer_id) = &query.discoverer_id {
        predicate = predicate.and(TwinPredicate::tag_eq(TwinKey::DiscovererId, discoverer_id.as_str()));
    }
    if !query.include_not_seen_since {
        predicate = predicate.and(not_disabled());
    }
    predicate
}

impl Registry {
    /// Register an application explicitly. Registering an identity that
    /// already exists updates it and re-enables it if it was disabled.
    pub async fn register_application(
        &self,
        ctx: &OperationContext,
        request: ApplicationRegistrationRequest,
    ) -> Result<ApplicationRegistrationResult> {
        if request.application_uri.trim().is_empty() {
            return Err(RegistryError::Validation("application_uri is required".to_string()));
        }
        let id = application_id(
            &request.application_uri,
            request.product_uri.as_deref(),
            request.application_type,
            request.site_id.as_deref(),
        );
        let application = ApplicationInfo {
            application_id: id.clone(),
            application_uri: request.application_uri,
            product_uri: request.product_uri,
            application_type: request.application_type,
            application_name: request.application_name,
            locale: request.locale,
            localized_names: request.localized_names,
            discovery_profile_uri: request.discovery_profile_uri,
            discovery_urls: request.discovery_urls,
            capabilities: normalize_capabilities(&request.capabilities),
            gateway_server_uri: request.gateway_server_uri,
            site_id: request.site_id,
            created: Some(ctx.operation()),
            ..Default::default()
        };

        match ctx.run(self.store.create_or_update(application.to_twin(), false)).await {
            Ok(_) => {
                tracing::info!(id = %id, "Registered application");
                self.events.emit(RegistryEvent::ApplicationNew {
                    context: ctx.operation(),
                    application,
                });
            }
            Err(RegistryError::Conflict(_)) => {
                self.reregister_application(ctx, &id, application).await?;
            }
            Err(e) => return Err(e),
        }
        Ok(ApplicationRegistrationResult { id })
    }

    async fn reregister_application(
        &self,
        ctx: &OperationContext,
        id: &str,
        requested: ApplicationInfo,
    ) -> Result<()> {
        let update = self
            .update_entity::<ApplicationInfo, bool, _>(ctx, id, None, |current| {
                let was_disabled = !current.is_enabled();
                let mut desired = current.clone();
                desired.application_name = requested.application_name.clone();
                desired.locale = requested.locale.clone();
                desired.localized_names = requested.localized_names.clone();
                desired.discovery_profile_uri = requested.discovery_profile_uri.clone();
                desired.discovery_urls = requested.discovery_urls.clone();
                desired.capabilities = requested.capabilities.clone();
                desired.gateway_server_uri = requested.gateway_server_uri.clone();
                desired.not_seen_since = None;
                if desired.same_content(current) {
                    return Ok((false, false));
                }
                desired.updated = Some(ctx.operation());
                *current = desired;
                Ok((true, was_disabled))
            })
            .await?;

        if !update.patched {
            tracing::debug!(id, "Application re-registered without changes");
            return Ok(());
        }
        if update.extra {
            self.events.emit(RegistryEvent::ApplicationEnabled {
                context: ctx.operation(),
                application: update.current,
            });
            self.enable_endpoints_of(ctx, id).await;
        } else {
            self.events.emit(RegistryEvent::ApplicationUpdated {
                context: ctx.operation(),
                application: update.current,
            });
        }
        Ok(())
    }

    /// Application with its endpoints. With `filter_inactive`, disabled
    /// applications are reported missing and disabled endpoints are left out.
    pub async fn get_application(
        &self,
        ctx: &OperationContext,
        id: &str,
        filter_inactive: bool,
    ) -> Result<ApplicationRecord> {
        let application = self.fetch::<ApplicationInfo>(ctx, id, None).await?;
        if filter_inactive && !application.is_enabled() {
            return Err(RegistryError::NotFound(format!("Application {id} is disabled")));
        }
        let mut predicate = endpoints_of(id);
        if filter_inactive {
            predicate = predicate.and(not_disabled());
        }
        let endpoints = self.query_all::<EndpointInfo>(ctx, predicate).await?;
        Ok(ApplicationRecord { application, endpoints })
    }

    pub async fn update_application(
        &self,
        ctx: &OperationContext,
        id: &str,
        request: ApplicationRegistrationUpdate,
    ) -> Result<()> {
        let update = self
            .update_entity::<ApplicationInfo, (), _>(ctx, id, None, |current| {
                let mut desired = current.clone();
                if let Some(product_uri) = &request.product_uri {
                    desired.product_uri = Some(product_uri.clone());
                }
                if let Some(name) = &request.application_name {
                    desired.application_name = Some(name.clone());
                }
                if let Some(locale) = &request.locale {
                    desired.locale = Some(locale.clone());
                }
                if let Some(names) = &request.localized_names {
                    desired.localized_names = names.clone();
                }
                if let Some(profile) = &request.discovery_profile_uri {
                    desired.discovery_profile_uri = Some(profile.clone());
                }
                if let Some(urls) = &request.discovery_urls {
                    desired.discovery_urls = urls.clone();
                }
                if let Some(capabilities) = &request.capabilities {
                    desired.capabilities = normalize_capabilities(capabilities);
                }
                if let Some(gateway_server_uri) = &request.gateway_server_uri {
                    desired.gateway_server_uri = Some(gateway_server_uri.clone());
                }
                if desired.same_content(current) {
                    return Ok((false, ()));
                }
                desired.updated = Some(ctx.operation());
                *current = desired;
                Ok((true, ()))
            })
            .await?;

        if update.patched {
            self.events.emit(RegistryEvent::ApplicationUpdated {
                context: ctx.operation(),
                application: update.current,
            });
        }
        Ok(())
    }

    /// Clear `NotSeenSince` and re-enable the application's endpoints.
    pub async fn enable_application(&self, ctx: &OperationContext, id: &str) -> Result<()> {
        self.enable_application_cascade(ctx, id).await?;
        Ok(())
    }

    /// Set `NotSeenSince` and disable the application's endpoints.
    pub async fn disable_application(&self, ctx: &OperationContext, id: &str) -> Result<()> {
        self.disable_application_cascade(ctx, id).await?;
        Ok(())
    }

    /// Returns whether the application changed state.
    pub(crate) async fn enable_application_cascade(&self, ctx: &OperationContext, id: &str) -> Result<bool> {
        let update = self
            .update_entity::<ApplicationInfo, (), _>(ctx, id, None, |current| {
                if current.is_enabled() {
                    return Ok((false, ()));
                }
                current.not_seen_since = None;
                current.updated = Some(ctx.operation());
                Ok((true, ()))
            })
            .await?;
        if !update.patched {
            return Ok(false);
        }
        tracing::info!(id, "Enabled application");
        self.events.emit(RegistryEvent::ApplicationEnabled {
            context: ctx.operation(),
            application: update.current,
        });
        self.enable_endpoints_of(ctx, id).await;
        Ok(true)
    }

    /// Returns whether the application changed state.
    pub(crate) async fn disable_application_cascade(&self, ctx: &OperationContext, id: &str) -> Result<bool> {
        let update = self
            .update_entity::<ApplicationInfo, (), _>(ctx, id, None, |current| {
                if !current.is_enabled() {
                    return Ok((false, ()));
                }
                current.not_seen_since = Some(ctx.time);
                current.updated = Some(ctx.operation());
                Ok((true, ()))
            })
            .await?;
        if !update.patched {
            return Ok(false);
        }
        tracing::info!(id, "Disabled application");
        self.events.emit(RegistryEvent::ApplicationDisabled {
            context: ctx.operation(),
            application: update.current,
        });
        self.disable_endpoints_of(ctx, id).await;
        Ok(true)
    }

    /// Delete the application after deleting all of its endpoints.
    ///
    /// If an endpoint cannot be deleted the call fails and the application
    /// stays registered, possibly with some endpoints already gone.
    pub async fn unregister_application(&self, ctx: &OperationContext, id: &str) -> Result<()> {
        let application = self.fetch::<ApplicationInfo>(ctx, id, None).await?;
        let endpoints = self.query_all::<EndpointInfo>(ctx, endpoints_of(id)).await?;
        for endpoint in &endpoints {
            self.delete_endpoint_entity(ctx, endpoint).await?;
        }
        match ctx.run(self.store.delete(id, None, None)).await {
            Ok(()) | Err(RegistryError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        tracing::info!(id, endpoints = endpoints.len(), "Unregistered application");
        self.events.emit(RegistryEvent::ApplicationDeleted {
            context: ctx.operation(),
            application,
        });
        Ok(())
    }

    /// Unregister applications disabled for longer than `not_seen_for`.
    /// Returns how many were removed.
    pub async fn purge_disabled_applications(
        &self,
        ctx: &OperationContext,
        not_seen_for: Duration,
    ) -> Result<usize> {
        let cutoff = ctx.time - not_seen_for;
        let stale = self
            .query_all::<ApplicationInfo>(ctx, TwinPredicate::TagBefore(TwinKey::NotSeenSince, cutoff))
            .await?;
        let mut purged = 0;
        for application in stale {
            match self.unregister_application(ctx, &application.application_id).await {
                Ok(()) => purged += 1,
                Err(RegistryError::Cancelled) => return Err(RegistryError::Cancelled),
                Err(e) => {
                    tracing::error!(id = %application.application_id, error = %e, "Failed to purge application");
                }
            }
        }
        if purged > 0 {
            tracing::info!(purged, %cutoff, "Purged disabled applications");
        }
        Ok(purged)
    }

    pub async fn list_applications(
        &self,
        ctx: &OperationContext,
        continuation: Option<String>,
        page_size: Option<usize>,
    ) -> Result<ListResult<ApplicationInfo>> {
        self.query_page(ctx, TwinPredicate::Always, continuation, page_size).await
    }

    pub async fn query_applications(
        &self,
        ctx: &OperationContext,
        query: &ApplicationQuery,
        continuation: Option<String>,
        page_size: Option<usize>,
    ) -> Result<ListResult<ApplicationInfo>> {
        self.query_page(ctx, application_predicate(query), continuation, page_size).await
    }

    /// Distinct site ids of all registered applications.
    pub async fn list_sites(&self, ctx: &OperationContext) -> Result<Vec<String>> {
        let applications = self
            .query_all::<ApplicationInfo>(ctx, TwinPredicate::TagPresent(TwinKey::SiteId))
            .await?;
        let sites: BTreeSet<String> = applications.into_iter().filter_map(|a| a.site_id).collect();
        Ok(sites.into_iter().collect())
    }

    /// Disable an application a discoverer no longer reports, or delete it
    /// when `hard_delete` is set. Applications owned by other discoverers
    /// are left alone.
    pub(crate) async fn remove_application(
        &self,
        ctx: &OperationContext,
        discoverer_id: &str,
        application: &ApplicationInfo,
        hard_delete: bool,
    ) -> Result<ItemOutcome> {
        if application.discoverer_id.as_deref() != Some(discoverer_id) {
            tracing::debug!(
                id = %application.application_id,
                owner = ?application.discoverer_id,
                "Application owned by another discoverer, not removing"
            );
            return Ok(ItemOutcome::Unchanged);
        }
        if hard_delete {
            self.unregister_application(ctx, &application.application_id).await?;
            return Ok(ItemOutcome::Removed);
        }
        if !application.is_enabled() {
            return Ok(ItemOutcome::Unchanged);
        }
        if self.disable_application_cascade(ctx, &application.application_id).await? {
            Ok(ItemOutcome::Removed)
        } else {
            Ok(ItemOutcome::Unchanged)
        }
    }

    /// Merge a re-discovered application into the stored one. Enabled
    /// applications owned by another discoverer are not taken over.
    pub(crate) async fn merge_application(
        &self,
        ctx: &OperationContext,
        discoverer_id: &str,
        existing: &ApplicationInfo,
        found: &ApplicationInfo,
    ) -> Result<ItemOutcome> {
        let id = existing.application_id.as_str();
        if owned_by_other(existing.discoverer_id.as_deref(), existing.is_enabled(), discoverer_id) {
            tracing::debug!(id, owner = ?existing.discoverer_id, "Application owned by another discoverer");
            return Ok(ItemOutcome::Unchanged);
        }

        let update = self
            .update_entity::<ApplicationInfo, bool, _>(ctx, id, None, |current| {
                if owned_by_other(current.discoverer_id.as_deref(), current.is_enabled(), discoverer_id) {
                    return Ok((false, false));
                }
                let was_disabled = !current.is_enabled();
                let mut desired = current.clone();
                // Key fields too, so the stored entry matches the next scan
                desired.application_uri = found.application_uri.clone();
                desired.product_uri = found.product_uri.clone();
                desired.application_name = found.application_name.clone();
                desired.locale = found.locale.clone();
                desired.localized_names = found.localized_names.clone();
                desired.discovery_profile_uri = found.discovery_profile_uri.clone();
                desired.application_type = found.application_type;
                desired.discovery_urls = found.discovery_urls.clone();
                desired.host_addresses = found.host_addresses.clone();
                desired.capabilities = found.capabilities.clone();
                desired.gateway_server_uri = found.gateway_server_uri.clone();
                desired.site_id = found.site_id.clone();
                desired.discoverer_id = Some(discoverer_id.to_string());
                desired.not_seen_since = None;
                if desired.same_content(current) {
                    return Ok((false, false));
                }
                desired.updated = Some(ctx.operation());
                *current = desired;
                Ok((true, was_disabled))
            })
            .await?;

        if !update.patched {
            return Ok(ItemOutcome::Unchanged);
        }
        let event = if update.extra {
            tracing::info!(id, discoverer = discoverer_id, "Re-enabled application");
            RegistryEvent::ApplicationEnabled {
                context: ctx.operation(),
                application: update.current,
            }
        } else {
            RegistryEvent::ApplicationUpdated {
                context: ctx.operation(),
                application: update.current,
            }
        };
        self.events.emit(event);
        Ok(ItemOutcome::Updated)
    }

    /// Create a newly discovered application. If the id is already taken the
    /// stored twin is updated instead. Returns the outcome and the id.
    pub(crate) async fn add_application(
        &self,
        ctx: &OperationContext,
        discoverer_id: &str,
        mut found: ApplicationInfo,
    ) -> Result<(ItemOutcome, String)> {
        let id = found.application_id.clone();
        found.not_seen_since = None;
        found.created = Some(ctx.operation());
        found.updated = None;

        match ctx.run(self.store.create_or_update(found.to_twin(), false)).await {
            Ok(_) => {
                tracing::info!(id = %id, discoverer = discoverer_id, "Added application");
                self.events.emit(RegistryEvent::ApplicationNew {
                    context: ctx.operation(),
                    application: found,
                });
                Ok((ItemOutcome::Added, id))
            }
            Err(RegistryError::Conflict(_)) => {
                tracing::debug!(id = %id, "Application already exists, updating instead");
                let existing = self.fetch::<ApplicationInfo>(ctx, &id, None).await?;
                let outcome = self.merge_application(ctx, discoverer_id, &existing, &found).await?;
                Ok((outcome, id))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::testing::{drain_events, test_app, test_endpoint, TestRegistry};

    fn request(uri: &str) -> ApplicationRegistrationRequest {
        ApplicationRegistrationRequest {
            application_uri: uri.to_string(),
            application_name: Some("Press".to_string()),
            capabilities: ["da".to_string()].into(),
            site_id: Some("s1".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let t = TestRegistry::new().await;
        let ctx = t.ctx();
        let result = t.registry.register_application(&ctx, request("urn:press:1")).await.unwrap();

        let record = t.registry.get_application(&ctx, &result.id, true).await.unwrap();
        assert_eq!(record.application.application_uri, "urn:press:1");
        assert_eq!(record.application.capabilities, ["DA".to_string()].into());
        assert!(record.application.created.is_some());
        assert!(record.endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_register_validates_uri() {
        let t = TestRegistry::new().await;
        let err = t
            .registry
            .register_application(&t.ctx(), request("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
        assert_eq!(t.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_reregister_enables_disabled_application() {
        let t = TestRegistry::new().await;
        let ctx = t.ctx();
        let id = t.registry.register_application(&ctx, request("urn:press:1")).await.unwrap().id;
        t.registry.disable_application(&ctx, &id).await.unwrap();
        let mut events = t.registry.events().subscribe();

        let again = t.registry.register_application(&ctx, request("URN:PRESS:1")).await.unwrap();
        assert_eq!(again.id, id, "case-insensitive URI yields the same id");

        let record = t.registry.get_application(&ctx, &id, true).await.unwrap();
        assert!(record.application.is_enabled());
        assert_eq!(drain_events(&mut events), vec!["ApplicationEnabled"]);
    }

    #[tokio::test]
    async fn test_disable_cascades_to_endpoints() {
        let t = TestRegistry::new().await;
        let ctx = t.ctx();
        let app = t.insert_app(test_app("urn:plc:1", "s1", Some("d1"))).await;
        let mut activated = test_endpoint(&app, "opc.tcp://plc:4840");
        activated.supervisor_id = Some("gw1_module_supervisor".to_string());
        activated.activation_state = shared::types::ActivationState::Activated;
        let activated = t.insert_endpoint(activated).await;
        let plain = t.insert_endpoint(test_endpoint(&app, "opc.tcp://plc:4841")).await;

        let mut events = t.registry.events().subscribe();
        t.registry.disable_application(&ctx, &app.application_id).await.unwrap();

        let record = t.registry.get_application(&ctx, &app.application_id, false).await.unwrap();
        assert!(!record.application.is_enabled());
        assert_eq!(record.endpoints.len(), 2);
        assert!(record.endpoints.iter().all(|e| !e.is_enabled()));
        assert_eq!(t.activation.calls(), vec![format!("deactivate {}", activated.id)]);

        let mut names = drain_events(&mut events);
        names.sort();
        assert_eq!(names, vec!["ApplicationDisabled", "EndpointDisabled", "EndpointDisabled"]);

        let err = t.registry.get_application(&ctx, &app.application_id, true).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
        let _ = plain;
    }

    #[tokio::test]
    async fn test_disable_cascade_survives_unbind_failure() {
        let t = TestRegistry::new().await;
        let ctx = t.ctx();
        let app = t.insert_app(test_app("urn:plc:1", "s1", Some("d1"))).await;
        let mut endpoint = test_endpoint(&app, "opc.tcp://plc:4840");
        endpoint.supervisor_id = Some("gw1_module_supervisor".to_string());
        endpoint.activation_state = shared::types::ActivationState::Activated;
        t.insert_endpoint(endpoint).await;
        t.activation.fail_all(true);

        t.registry.disable_application(&ctx, &app.application_id).await.unwrap();

        let record = t.registry.get_application(&ctx, &app.application_id, false).await.unwrap();
        assert!(record.endpoints.iter().all(|e| !e.is_enabled()));
    }

    #[tokio::test]
    async fn test_enable_rebinds_activated_endpoints() {
        let t = TestRegistry::new().await;
        let ctx = t.ctx();
        let app = t.insert_app(test_app("urn:plc:1", "s1", Some("d1"))).await;
        let mut endpoint = test_endpoint(&app, "opc.tcp://plc:4840");
        endpoint.supervisor_id = Some("gw1_module_supervisor".to_string());
        endpoint.activation_state = shared::types::ActivationState::Activated;
        let endpoint = t.insert_endpoint(endpoint).await;

        t.registry.disable_application(&ctx, &app.application_id).await.unwrap();
        t.activation.fail_all(true);
        t.registry.enable_application(&ctx, &app.application_id).await.unwrap();

        let record = t.registry.get_application(&ctx, &app.application_id, true).await.unwrap();
        assert_eq!(record.endpoints.len(), 1, "endpoint stays enabled when rebind fails");
        assert_eq!(
            t.activation.calls(),
            vec![format!("deactivate {}", endpoint.id), format!("activate {}", endpoint.id)]
        );
    }

    #[tokio::test]
    async fn test_unregister_deletes_endpoints_first() {
        let t = TestRegistry::new().await;
        let ctx = t.ctx();
        let app = t.insert_app(test_app("urn:plc:1", "s1", Some("d1"))).await;
        t.insert_endpoint(test_endpoint(&app, "opc.tcp://plc:4840")).await;
        t.insert_endpoint(test_endpoint(&app, "opc.tcp://plc:4841")).await;
        let mut events = t.registry.events().subscribe();

        t.registry.unregister_application(&ctx, &app.application_id).await.unwrap();

        assert!(matches!(
            t.registry.get_application(&ctx, &app.application_id, false).await,
            Err(RegistryError::NotFound(_))
        ));
        assert_eq!(
            drain_events(&mut events),
            vec!["EndpointDeleted", "EndpointDeleted", "ApplicationDeleted"]
        );
    }

    /// An endpoint that cannot be deleted aborts the unregister and leaves
    /// the application registered with its other endpoints already deleted.
    #[tokio::test]
    async fn test_unregister_partial_failure_keeps_application() {
        let t = TestRegistry::new().await;
        let ctx = t.ctx();
        let app = t.insert_app(test_app("urn:plc:1", "s1", Some("d1"))).await;
        let a = t.insert_endpoint(test_endpoint(&app, "opc.tcp://plc:4840")).await;
        let b = t.insert_endpoint(test_endpoint(&app, "opc.tcp://plc:4841")).await;
        let (first, second) = if a.id < b.id { (a, b) } else { (b, a) };
        t.store.fail_writes_for(&second.id);

        let err = t.registry.unregister_application(&ctx, &app.application_id).await.unwrap_err();
        assert!(matches!(err, RegistryError::Store(_)));

        let record = t.registry.get_application(&ctx, &app.application_id, false).await.unwrap();
        let remaining: Vec<_> = record.endpoints.iter().map(|e| e.id.clone()).collect();
        assert_eq!(remaining, vec![second.id.clone()]);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_purge_removes_only_long_disabled() {
        let t = TestRegistry::new().await;
        let ctx = t.ctx();
        let mut old = test_app("urn:plc:old", "s1", Some("d1"));
        old.not_seen_since = Some(ctx.time - Duration::days(10));
        let old = t.insert_app(old).await;
        let mut recent = test_app("urn:plc:recent", "s1", Some("d1"));
        recent.not_seen_since = Some(ctx.time - Duration::hours(1));
        let recent = t.insert_app(recent).await;
        let enabled = t.insert_app(test_app("urn:plc:enabled", "s1", Some("d1"))).await;

        let purged = t.registry.purge_disabled_applications(&ctx, Duration::days(7)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(t.registry.get_application(&ctx, &old.application_id, false).await.is_err());
        assert!(t.registry.get_application(&ctx, &recent.application_id, false).await.is_ok());
        assert!(t.registry.get_application(&ctx, &enabled.application_id, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_query_applications() {
        let t = TestRegistry::new().await;
        let ctx = t.ctx();
        let mut server = test_app("urn:plc:1", "s1", Some("d1"));
        server.capabilities = ["HD".to_string()].into();
        t.insert_app(server).await;
        let mut both = test_app("urn:hmi:1", "s2", Some("d2"));
        both.application_type = ApplicationType::ClientAndServer;
        t.insert_app(both).await;
        let mut disabled = test_app("urn:plc:2", "s1", Some("d1"));
        disabled.not_seen_since = Some(ctx.time);
        t.insert_app(disabled).await;

        let servers = ApplicationQuery {
            application_type: Some(ApplicationType::Server),
            ..Default::default()
        };
        let result = t.registry.query_applications(&ctx, &servers, None, None).await.unwrap();
        assert_eq!(result.items.len(), 2);

        let by_capability = ApplicationQuery {
            capability: Some("hd".to_string()),
            ..Default::default()
        };
        let result = t.registry.query_applications(&ctx, &by_capability, None, None).await.unwrap();
        assert_eq!(result.items.len(), 1);

        let site_with_disabled = ApplicationQuery {
            site_or_gateway_id: Some("s1".to_string()),
            include_not_seen_since: true,
            ..Default::default()
        };
        let result = t.registry.query_applications(&ctx, &site_with_disabled, None, None).await.unwrap();
        assert_eq!(result.items.len(), 2);

        let by_uri = ApplicationQuery {
            application_uri: Some("URN:HMI:1".to_string()),
            ..Default::default()
        };
        let result = t.registry.query_applications(&ctx, &by_uri, None, None).await.unwrap();
        assert_eq!(result.items.len(), 1);

        assert_eq!(t.registry.list_sites(&ctx).await.unwrap(), vec!["s1", "s2"]);
    }
}
