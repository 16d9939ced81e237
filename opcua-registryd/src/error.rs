//! Registry error types

use thiserror::Error;
use crate::twin::StoreError;

/// Errors surfaced by registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A required argument is missing or malformed; no I/O was attempted
    #[error("Invalid argument: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Etag mismatch outside of the update loop
    #[error("Entity was modified concurrently: {0}")]
    OutOfDate(String),

    /// Entity with the same identity already exists
    #[error("Entity already exists: {0}")]
    Conflict(String),

    /// Update loop gave up after repeated etag conflicts
    #[error("Gave up updating {id} after {attempts} conflicting writes")]
    Contention { id: String, attempts: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Store error: {0:#}")]
    Store(anyhow::Error),
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => RegistryError::NotFound(id),
            StoreError::OutOfDate(id) => RegistryError::OutOfDate(id),
            StoreError::Conflicting(id) => RegistryError::Conflict(id),
            StoreError::Backend(e) => RegistryError::Store(e),
        }
    }
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
