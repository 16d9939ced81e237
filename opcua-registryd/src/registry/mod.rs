//! Registry core: reconciliation of discovery results against the twin store.
//!
//! The registry keeps no entity state of its own. Every call re-reads what it
//! needs from the store and every write is a single-twin, etag-guarded patch,
//! so independent calls may run concurrently without in-process locking.

pub mod activation;
pub mod applications;
pub mod context;
pub mod discovery;
pub mod endpoints;
pub mod events;
pub mod modules;
pub mod reconcile;
pub mod update;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use shared::protocol::DEFAULT_PAGE_SIZE;
use shared::types::ListResult;
use crate::error::{RegistryError, Result};
use crate::registration::Registration;
use crate::twin::{TwinPredicate, TwinStore};

pub use activation::{EndpointActivation, SupervisorTwinActivation};
pub use context::OperationContext;
pub use discovery::DiscoveryStats;
pub use events::{EventBus, RegistryEvent};
pub use reconcile::ReconcileStats;
pub use update::RetryPolicy;

/// Tunables of the registry core
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub retry: RetryPolicy,
    /// Delete applications and endpoints a discoverer no longer reports
    /// instead of disabling them
    pub hard_delete_missing: bool,
    pub page_size: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            hard_delete_missing: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Application, endpoint and module registry on top of a twin store
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn TwinStore>,
    activation: Arc<dyn EndpointActivation>,
    events: EventBus,
    settings: RegistrySettings,
}

impl Registry {
    pub fn new(
        store: Arc<dyn TwinStore>,
        activation: Arc<dyn EndpointActivation>,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            store,
            activation,
            events: EventBus::default(),
            settings,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Load one entity of kind `T`. Twins of another kind count as missing.
    pub(crate) async fn fetch<T: Registration>(
        &self,
        ctx: &OperationContext,
        id: &str,
        module_id: Option<&str>,
    ) -> Result<T> {
        let twin = ctx.run(self.store.get(id, module_id)).await?;
        T::from_twin(&twin)
            .ok_or_else(|| RegistryError::NotFound(format!("{} {}", T::DEVICE_TYPE, id)))
    }

    /// Collect every entity of kind `T` matching `predicate`, across pages.
    pub(crate) async fn query_all<T: Registration>(
        &self,
        ctx: &OperationContext,
        predicate: TwinPredicate,
    ) -> Result<Vec<T>> {
        let predicate = TwinPredicate::device_type(T::DEVICE_TYPE).and(predicate);
        let mut items = Vec::new();
        let mut continuation = None;
        loop {
            let page = ctx
                .run(self.store.query(&predicate, continuation, Some(self.settings.page_size)))
                .await?;
            items.extend(page.twins.iter().filter_map(T::from_twin));
            match page.continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }
        Ok(items)
    }

    /// One page of entities of kind `T` matching `predicate`.
    pub(crate) async fn query_page<T: Registration>(
        &self,
        ctx: &OperationContext,
        predicate: TwinPredicate,
        continuation: Option<String>,
        page_size: Option<usize>,
    ) -> Result<ListResult<T>> {
        let predicate = TwinPredicate::device_type(T::DEVICE_TYPE).and(predicate);
        let page_size = page_size.unwrap_or(self.settings.page_size);
        let page = ctx
            .run(self.store.query(&predicate, continuation, Some(page_size)))
            .await?;
        Ok(ListResult {
            items: page.twins.iter().filter_map(T::from_twin).collect(),
            continuation_token: page.continuation,
        })
    }
}
