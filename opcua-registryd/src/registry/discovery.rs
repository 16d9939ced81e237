//! Ingestion of discoverer scan results.

use std::collections::{BTreeSet, HashMap, HashSet};
use serde::Serialize;
use shared::identity::{application_id, parse_module_id};
use shared::types::{ApplicationInfo, DiscoveryEvent, DiscoveryResult, EndpointInfo};
use crate::error::{RegistryError, Result};
use crate::registration::{ApplicationKey, LogicalIdentity};
use crate::twin::{TwinKey, TwinPredicate};
use super::applications::normalize_capabilities;
use super::context::OperationContext;
use super::endpoints::stamp_endpoint;
use super::reconcile::{partition, ItemOutcome, ReconcileStats};
use super::Registry;

/// Counters of one discovery run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiscoveryStats {
    pub applications: ReconcileStats,
    pub endpoints: ReconcileStats,
}

/// The single site a batch belongs to. Batches without any site fall back
/// to the gateway the discoverer runs on.
fn resolve_site_id(discoverer_id: &str, result: &DiscoveryResult, events: &[DiscoveryEvent]) -> Result<String> {
    let sites: BTreeSet<&str> = events
        .iter()
        .flat_map(|e| [e.application.site_id.as_deref(), e.registration.site_id.as_deref()])
        .chain(std::iter::once(result.site_id.as_deref()))
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let mut sites = sites.into_iter();
    match (sites.next(), sites.next()) {
        (None, _) => Ok(parse_module_id(discoverer_id).0.to_string()),
        (Some(site), None) => Ok(site.to_string()),
        (Some(a), Some(b)) => Err(RegistryError::Validation(format!(
            "Discovery batch from {discoverer_id} spans several sites ({a}, {b}, ...)"
        ))),
    }
}

/// Stamp found applications with owner and site, and fold events of the
/// same application into one entry carrying all its endpoints.
fn group_events(
    discoverer_id: &str,
    site_id: &str,
    events: Vec<DiscoveryEvent>,
) -> (Vec<ApplicationInfo>, HashMap<ApplicationKey, Vec<EndpointInfo>>) {
    let mut applications: Vec<ApplicationInfo> = Vec::new();
    let mut index: HashMap<ApplicationKey, usize> = HashMap::new();
    let mut endpoints: HashMap<ApplicationKey, Vec<EndpointInfo>> = HashMap::new();

    for event in events {
        let mut app = event.application;
        app.site_id = Some(site_id.to_string());
        app.discoverer_id = Some(discoverer_id.to_string());
        app.capabilities = normalize_capabilities(&app.capabilities);
        app.application_id = application_id(
            &app.application_uri,
            app.product_uri.as_deref(),
            app.application_type,
            Some(site_id),
        );
        app.not_seen_since = None;
        app.created = None;
        app.updated = None;

        let key = app.logical_key();
        match index.get(&key) {
            Some(&i) => {
                let group = &mut applications[i];
                group.discovery_urls.extend(app.discovery_urls);
                group.host_addresses.extend(app.host_addresses);
                group.capabilities.extend(app.capabilities);
            }
            None => {
                index.insert(key.clone(), applications.len());
                applications.push(app);
            }
        }
        endpoints.entry(key).or_default().push(event.registration);
    }
    (applications, endpoints)
}

impl Registry {
    /// Reconcile one discoverer scan against the registry.
    ///
    /// Every application and endpoint of the batch is claimed for the
    /// calling discoverer and the batch site. Applications of that site or
    /// discoverer that were not reported are disabled (or deleted when hard
    /// delete is configured) unless `register_only` is set.
    pub async fn process_discovery_results(
        &self,
        ctx: &OperationContext,
        discoverer_id: &str,
        result: &DiscoveryResult,
        events: Option<Vec<DiscoveryEvent>>,
    ) -> Result<DiscoveryStats> {
        if discoverer_id.trim().is_empty() {
            return Err(RegistryError::Validation("discoverer_id is required".to_string()));
        }
        let events = events.ok_or_else(|| RegistryError::Validation("events are required".to_string()))?;
        if result.register_only && events.is_empty() {
            return Ok(DiscoveryStats::default());
        }
        if let Some(event) = events.iter().find(|e| e.application.application_uri.trim().is_empty()) {
            return Err(RegistryError::Validation(format!(
                "Discovery event {} has no application uri",
                event.index
            )));
        }
        let site_id = resolve_site_id(discoverer_id, result, &events)?;

        tracing::info!(
            discoverer = discoverer_id,
            site = %site_id,
            events = events.len(),
            register_only = result.register_only,
            "Processing discovery results"
        );

        let (found, mut endpoints_by_key) = group_events(discoverer_id, &site_id, events);
        let existing = self
            .query_all::<ApplicationInfo>(
                ctx,
                TwinPredicate::Any(vec![
                    TwinPredicate::tag_eq(TwinKey::SiteId, site_id.as_str()),
                    TwinPredicate::tag_eq(TwinKey::DiscovererId, discoverer_id),
                ]),
            )
            .await?;

        let hard_delete = self.settings.hard_delete_missing;
        let work = partition(found, existing);
        let mut stats = DiscoveryStats::default();

        // A renamed application keeps its id and is merged by the add step
        let readded: HashSet<&str> = work.to_add.iter().map(|a| a.application_id.as_str()).collect();
        if !result.register_only {
            for app in work.to_remove.iter().filter(|a| !readded.contains(a.application_id.as_str())) {
                let outcome = self.remove_application(ctx, discoverer_id, app, hard_delete).await;
                stats.applications.record("application", &app.application_id, outcome)?;
            }
        }

        for (existing, found) in &work.to_update {
            let id = existing.application_id.as_str();
            let outcome = self.merge_application(ctx, discoverer_id, existing, found).await;
            let failed = outcome.is_err();
            stats.applications.record("application", id, outcome)?;
            if !failed {
                let endpoints = endpoints_by_key.remove(&found.logical_key()).unwrap_or_default();
                self.sync_application_endpoints(ctx, discoverer_id, id, &site_id, endpoints, result.register_only, &mut stats)
                    .await?;
            }
        }

        for found in work.to_add {
            let key = found.logical_key();
            let proposed = found.application_id.clone();
            match self.add_application(ctx, discoverer_id, found).await {
                Ok((outcome, id)) => {
                    stats.applications.record("application", &id, Ok(outcome))?;
                    let endpoints = endpoints_by_key.remove(&key).unwrap_or_default();
                    self.sync_application_endpoints(ctx, discoverer_id, &id, &site_id, endpoints, result.register_only, &mut stats)
                        .await?;
                }
                Err(e) => stats.applications.record("application", &proposed, Err(e))?,
            }
        }

        tracing::info!(
            discoverer = discoverer_id,
            site = %site_id,
            applications = ?stats.applications,
            endpoints = ?stats.endpoints,
            "Processed discovery results"
        );
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_application_endpoints(
        &self,
        ctx: &OperationContext,
        discoverer_id: &str,
        application_id: &str,
        site_id: &str,
        found: Vec<EndpointInfo>,
        register_only: bool,
        stats: &mut DiscoveryStats,
    ) -> Result<()> {
        let found = found
            .into_iter()
            .map(|e| stamp_endpoint(e, application_id, discoverer_id, Some(site_id)))
            .collect();
        match self
            .sync_endpoints(ctx, discoverer_id, application_id, found, register_only, self.settings.hard_delete_missing)
            .await
        {
            Ok(endpoint_stats) => stats.endpoints += endpoint_stats,
            Err(RegistryError::Cancelled) => return Err(RegistryError::Cancelled),
            Err(e) => {
                tracing::error!(application = application_id, error = %e, "Failed to reconcile endpoints");
                stats.endpoints.count(ItemOutcome::Unchanged);
            }
        }
        Ok(())
    }
}
