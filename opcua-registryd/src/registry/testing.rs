//! In-memory registry with fault injection for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use shared::identity::{application_id, endpoint_id};
use shared::types::{ApplicationInfo, ApplicationType, DiscoveryEvent, EndpointInfo, SecurityMode};
use tokio::sync::broadcast;
use crate::error::{RegistryError, Result};
use crate::registration::Registration;
use crate::twin::{StoreError, Twin, TwinDb, TwinPage, TwinPredicate, TwinStore, TwinStoreHandle};
use super::activation::EndpointActivation;
use super::context::OperationContext;
use super::events::RegistryEvent;
use super::update::RetryPolicy;
use super::{Registry, RegistrySettings};

pub const POLICY_NONE: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";

/// Twin store wrapper counting writes and failing them on demand.
pub struct FlakyStore {
    inner: TwinStoreHandle,
    out_of_date: AtomicU32,
    patches: AtomicUsize,
    writes: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    hidden: Mutex<HashSet<String>>,
}

impl FlakyStore {
    fn new(inner: TwinStoreHandle) -> Self {
        Self {
            inner,
            out_of_date: AtomicU32::new(0),
            patches: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
            hidden: Mutex::new(HashSet::new()),
        }
    }

    /// Reject the next `n` patches as if the twin changed since it was read
    pub fn fail_next_patches_out_of_date(&self, n: u32) {
        self.out_of_date.store(n, Ordering::SeqCst);
    }

    /// Fail every write to this twin id with a backend error
    pub fn fail_writes_for(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    /// Leave this twin out of the next query, as if another writer created
    /// it right after the query ran
    pub fn hide_from_next_query(&self, id: &str) {
        self.hidden.lock().unwrap().insert(id.to_string());
    }

    pub fn patch_count(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_write(&self, id: &str) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(id) {
            return Err(StoreError::Backend(anyhow::anyhow!("injected failure for {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl TwinStore for FlakyStore {
    async fn get(&self, id: &str, module_id: Option<&str>) -> Result<Twin, StoreError> {
        self.inner.get(id, module_id).await
    }

    async fn query(
        &self,
        predicate: &TwinPredicate,
        continuation: Option<String>,
        page_size: Option<usize>,
    ) -> Result<TwinPage, StoreError> {
        let mut page = self.inner.query(predicate, continuation, page_size).await?;
        let hidden = std::mem::take(&mut *self.hidden.lock().unwrap());
        page.twins.retain(|twin| !hidden.contains(&twin.id));
        Ok(page)
    }

    async fn create_or_update(&self, twin: Twin, allow_duplicate: bool) -> Result<Twin, StoreError> {
        self.check_write(&twin.id)?;
        self.inner.create_or_update(twin, allow_duplicate).await
    }

    async fn patch(&self, patch: Twin, etag: Option<String>, upsert: bool) -> Result<Twin, StoreError> {
        self.patches.fetch_add(1, Ordering::SeqCst);
        self.check_write(&patch.id)?;
        let injected = etag.is_some()
            && self
                .out_of_date
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if injected {
            return Err(StoreError::OutOfDate(patch.id));
        }
        self.inner.patch(patch, etag, upsert).await
    }

    async fn delete(&self, id: &str, module_id: Option<&str>, etag: Option<String>) -> Result<(), StoreError> {
        self.check_write(id)?;
        self.inner.delete(id, module_id, etag).await
    }
}

/// Activation double recording `activate <id>` / `deactivate <id>` calls.
#[derive(Default)]
pub struct RecordingActivation {
    calls: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingActivation {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RegistryError::Store(anyhow::anyhow!("supervisor unreachable")));
        }
        Ok(())
    }
}

#[async_trait]
impl EndpointActivation for RecordingActivation {
    async fn activate(&self, _ctx: &OperationContext, endpoint: &EndpointInfo, _supervisor_id: &str) -> Result<()> {
        self.record(format!("activate {}", endpoint.id))
    }

    async fn deactivate(&self, _ctx: &OperationContext, endpoint: &EndpointInfo, _supervisor_id: &str) -> Result<()> {
        self.record(format!("deactivate {}", endpoint.id))
    }
}

pub struct TestRegistry {
    pub registry: Registry,
    pub store: Arc<FlakyStore>,
    pub activation: Arc<RecordingActivation>,
}

impl TestRegistry {
    pub async fn new() -> Self {
        let db = TwinDb::open(":memory:").unwrap();
        let store = Arc::new(FlakyStore::new(TwinStoreHandle::spawn(db)));
        let activation = Arc::new(RecordingActivation::default());
        let settings = RegistrySettings {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                multiplier: 2.0,
            },
            hard_delete_missing: false,
            page_size: 2,
        };
        let registry = Registry::new(store.clone(), activation.clone(), settings);
        Self { registry, store, activation }
    }

    pub fn ctx(&self) -> OperationContext {
        OperationContext::new("test")
    }

    /// Store an application as is, bypassing the registry
    pub async fn insert_app(&self, app: ApplicationInfo) -> ApplicationInfo {
        self.store.inner.create_or_update(app.to_twin(), false).await.unwrap();
        app
    }

    pub async fn insert_endpoint(&self, endpoint: EndpointInfo) -> EndpointInfo {
        self.store.inner.create_or_update(endpoint.to_twin(), false).await.unwrap();
        endpoint
    }

    pub async fn app(&self, id: &str) -> ApplicationInfo {
        let twin = self.store.inner.get(id, None).await.unwrap();
        ApplicationInfo::from_twin(&twin).unwrap()
    }

    pub async fn endpoint(&self, id: &str) -> EndpointInfo {
        let twin = self.store.inner.get(id, None).await.unwrap();
        EndpointInfo::from_twin(&twin).unwrap()
    }
}

pub fn test_app(uri: &str, site: &str, discoverer: Option<&str>) -> ApplicationInfo {
    ApplicationInfo {
        application_id: application_id(uri, None, ApplicationType::Server, Some(site)),
        application_uri: uri.to_string(),
        application_type: ApplicationType::Server,
        application_name: Some(format!("App {uri}")),
        locale: Some("en".to_string()),
        site_id: Some(site.to_string()),
        discoverer_id: discoverer.map(str::to_string),
        ..Default::default()
    }
}

pub fn test_endpoint(app: &ApplicationInfo, url: &str) -> EndpointInfo {
    let mut endpoint = EndpointInfo {
        application_id: app.application_id.clone(),
        endpoint_url: url.to_string(),
        security_mode: SecurityMode::None,
        security_policy: POLICY_NONE.to_string(),
        site_id: app.site_id.clone(),
        discoverer_id: app.discoverer_id.clone(),
        ..Default::default()
    };
    endpoint.id = endpoint_id(
        &endpoint.application_id,
        &endpoint.endpoint_url,
        &endpoint.security_policy,
        endpoint.security_mode,
        endpoint.credential,
    );
    endpoint
}

/// Discovery event for `uri` exposing one endpoint at `url`. Ids are left
/// for the registry to derive.
pub fn test_event(uri: &str, url: &str) -> DiscoveryEvent {
    DiscoveryEvent {
        time_stamp: None,
        application: ApplicationInfo {
            application_uri: uri.to_string(),
            application_type: ApplicationType::Server,
            application_name: Some(format!("App {uri}")),
            locale: Some("en".to_string()),
            ..Default::default()
        },
        registration: EndpointInfo {
            endpoint_url: url.to_string(),
            security_mode: SecurityMode::None,
            security_policy: POLICY_NONE.to_string(),
            ..Default::default()
        },
        index: 0,
    }
}

/// Names of all events received so far.
pub fn drain_events(rx: &mut broadcast::Receiver<RegistryEvent>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    names
}
