use std::thread;
use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use super::db::TwinDb;
use super::model::Twin;
use super::query::TwinPredicate;
use super::store::{StoreError, TwinPage, TwinStore};

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

/// Commands sent to the twin store thread
enum TwinCommand {
    Get {
        id: String,
        module_id: Option<String>,
        reply: Reply<Twin>,
    },
    Query {
        predicate: TwinPredicate,
        continuation: Option<String>,
        page_size: Option<usize>,
        reply: Reply<TwinPage>,
    },
    CreateOrUpdate {
        twin: Twin,
        allow_duplicate: bool,
        reply: Reply<Twin>,
    },
    Patch {
        patch: Twin,
        etag: Option<String>,
        upsert: bool,
        reply: Reply<Twin>,
    },
    Delete {
        id: String,
        module_id: Option<String>,
        etag: Option<String>,
        reply: Reply<()>,
    },
    Shutdown,
}

/// Handle to the SQLite twin store running on its own thread
#[derive(Clone)]
pub struct TwinStoreHandle {
    tx: mpsc::Sender<TwinCommand>,
}

impl TwinStoreHandle {
    /// Spawn the store thread owning `db`
    pub fn spawn(db: TwinDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<TwinCommand>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    TwinCommand::Get { id, module_id, reply } => {
                        let _ = reply.send(db.get(&id, module_id.as_deref()));
                    }
                    TwinCommand::Query { predicate, continuation, page_size, reply } => {
                        let _ = reply.send(db.query(&predicate, continuation, page_size));
                    }
                    TwinCommand::CreateOrUpdate { twin, allow_duplicate, reply } => {
                        let _ = reply.send(db.create_or_update(twin, allow_duplicate));
                    }
                    TwinCommand::Patch { patch, etag, upsert, reply } => {
                        let _ = reply.send(db.patch(patch, etag, upsert));
                    }
                    TwinCommand::Delete { id, module_id, etag, reply } => {
                        let _ = reply.send(db.delete(&id, module_id.as_deref(), etag));
                    }
                    TwinCommand::Shutdown => {
                        tracing::info!("Twin store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> TwinCommand,
    ) -> Result<T, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| anyhow!("Twin store thread is not running"))?;
        rx.await
            .map_err(|_| anyhow!("Twin store thread dropped the request"))?
    }

    /// Stop the store thread
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.tx
            .send(TwinCommand::Shutdown)
            .await
            .map_err(|_| anyhow!("Twin store thread is not running"))?;
        Ok(())
    }
}

#[async_trait]
impl TwinStore for TwinStoreHandle {
    async fn get(&self, id: &str, module_id: Option<&str>) -> Result<Twin, StoreError> {
        let id = id.to_string();
        let module_id = module_id.map(str::to_string);
        self.call(|reply| TwinCommand::Get { id, module_id, reply }).await
    }

    async fn query(
        &self,
        predicate: &TwinPredicate,
        continuation: Option<String>,
        page_size: Option<usize>,
    ) -> Result<TwinPage, StoreError> {
        let predicate = predicate.clone();
        self.call(|reply| TwinCommand::Query { predicate, continuation, page_size, reply })
            .await
    }

    async fn create_or_update(&self, twin: Twin, allow_duplicate: bool) -> Result<Twin, StoreError> {
        self.call(|reply| TwinCommand::CreateOrUpdate { twin, allow_duplicate, reply })
            .await
    }

    async fn patch(&self, patch: Twin, etag: Option<String>, upsert: bool) -> Result<Twin, StoreError> {
        self.call(|reply| TwinCommand::Patch { patch, etag, upsert, reply }).await
    }

    async fn delete(&self, id: &str, module_id: Option<&str>, etag: Option<String>) -> Result<(), StoreError> {
        let id = id.to_string();
        let module_id = module_id.map(str::to_string);
        self.call(|reply| TwinCommand::Delete { id, module_id, etag, reply }).await
    }
}
