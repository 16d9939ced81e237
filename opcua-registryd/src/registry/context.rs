use std::future::Future;
use chrono::{DateTime, Utc};
use shared::types::RegistryOperation;
use tokio_util::sync::CancellationToken;
use crate::error::{RegistryError, Result};
use crate::twin::StoreError;

/// Caller identity, operation time and cancellation for one registry call.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub authority_id: String,
    pub time: DateTime<Utc>,
    pub cancel: CancellationToken,
}

impl OperationContext {
    pub fn new(authority_id: impl Into<String>) -> Self {
        Self {
            authority_id: authority_id.into(),
            time: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Audit record for entities touched by this call
    pub fn operation(&self) -> RegistryOperation {
        RegistryOperation {
            authority_id: self.authority_id.clone(),
            time: self.time,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run one store call, abandoning it when the caller cancels.
    pub async fn run<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RegistryError::Cancelled),
            result = call => result.map_err(RegistryError::from),
        }
    }
}
