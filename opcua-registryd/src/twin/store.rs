use async_trait::async_trait;
use thiserror::Error;
use super::model::Twin;
use super::query::TwinPredicate;

/// Errors raised by a twin store
#[derive(Error, Debug)]
pub enum StoreError {
    /// No twin with this id
    #[error("Twin not found: {0}")]
    NotFound(String),

    /// The etag passed along no longer matches the stored twin
    #[error("Twin {0} was modified concurrently")]
    OutOfDate(String),

    /// A twin with this id already exists
    #[error("Twin already exists: {0}")]
    Conflicting(String),

    #[error("Store error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

/// One page of a query.
#[derive(Debug, Clone, Default)]
pub struct TwinPage {
    pub twins: Vec<Twin>,
    pub continuation: Option<String>,
}

/// Entity store keyed by device id and optional module id, with
/// etag-guarded single-entity writes.
#[async_trait]
pub trait TwinStore: Send + Sync {
    async fn get(&self, id: &str, module_id: Option<&str>) -> Result<Twin, StoreError>;

    async fn query(
        &self,
        predicate: &TwinPredicate,
        continuation: Option<String>,
        page_size: Option<usize>,
    ) -> Result<TwinPage, StoreError>;

    /// Create a twin, or replace it wholesale when `allow_duplicate` is set.
    async fn create_or_update(&self, twin: Twin, allow_duplicate: bool) -> Result<Twin, StoreError>;

    /// Merge `patch` into the stored twin. With an etag the write only
    /// succeeds if the twin is unchanged since it was read.
    async fn patch(&self, patch: Twin, etag: Option<String>, upsert: bool) -> Result<Twin, StoreError>;

    async fn delete(&self, id: &str, module_id: Option<&str>, etag: Option<String>) -> Result<(), StoreError>;
}
