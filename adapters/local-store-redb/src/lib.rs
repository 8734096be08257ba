//! redb-backed implementation of [`replicate_client::local_store::LocalKv`].
//!
//! A single table holds every namespaced key this crate's sibling client
//! modules write: `checkpoint:<collection>`, `crdt:<collection>`, and
//! `protocolVersion`. One [`RedbLocalStore`] is meant to be shared (via
//! `Arc`) across every collection a process opens, mirroring how the backend
//! redb adapter shares one `redb::Database` across collections.

use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use replicate_client::local_store::LocalKv;
use replicate_types::error::LocalStoreOp;
use replicate_types::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

mod error;
use error::Error as LocalError;

const TABLE_KV: TableDefinition<&str, &[u8]> = TableDefinition::new("local_kv");

pub struct RedbLocalStore {
    db: Arc<redb::Database>,
}

impl RedbLocalStore {
    pub async fn open(path: impl AsRef<Path>) -> ClResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| local_err(LocalStoreOp::Set, &path, LocalError::Io(e.to_string())))?;
        }

        let path_for_blocking = path.clone();
        let db = tokio::task::spawn_blocking(move || -> Result<redb::Database, LocalError> {
            let db = redb::Database::create(&path_for_blocking).map_err(|e| LocalError::Db(e.to_string()))?;
            let tx = db.begin_write().map_err(|e| LocalError::Db(e.to_string()))?;
            let _ = tx.open_table(TABLE_KV);
            tx.commit().map_err(|e| LocalError::Db(e.to_string()))?;
            Ok(db)
        })
        .await
        .map_err(|e| local_err(LocalStoreOp::Set, &path, LocalError::Io(e.to_string())))?
        .map_err(|e| local_err(LocalStoreOp::Set, &path, e))?;

        debug!(?path, "opened local store");
        Ok(Self { db: Arc::new(db) })
    }
}

fn local_err(operation: LocalStoreOp, key: impl std::fmt::Debug, cause: LocalError) -> Error {
    Error::local_store(operation, format!("{key:?}")).with_cause(cause)
}

#[async_trait::async_trait]
impl LocalKv for RedbLocalStore {
    async fn get(&self, key: &str) -> ClResult<Option<Vec<u8>>> {
        let db = Arc::clone(&self.db);
        let key = key.to_string();
        let result = tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>, LocalError> {
            let tx = db.begin_read().map_err(|e| LocalError::Db(e.to_string()))?;
            let table = tx.open_table(TABLE_KV).map_err(|e| LocalError::Db(e.to_string()))?;
            Ok(table.get(key.as_str()).map_err(|e| LocalError::Db(e.to_string()))?.map(|v| v.value().to_vec()))
        })
        .await
        .map_err(|e| local_err(LocalStoreOp::Get, "spawn_blocking", LocalError::Io(e.to_string())))?;
        result.map_err(|e| local_err(LocalStoreOp::Get, "get", e))
    }

    async fn set(&self, key: &str, value: &[u8]) -> ClResult<()> {
        let db = Arc::clone(&self.db);
        let key = key.to_string();
        let value = value.to_vec();
        let result = tokio::task::spawn_blocking(move || -> Result<(), LocalError> {
            let tx = db.begin_write().map_err(|e| LocalError::Db(e.to_string()))?;
            {
                let mut table = tx.open_table(TABLE_KV).map_err(|e| LocalError::Db(e.to_string()))?;
                table.insert(key.as_str(), value.as_slice()).map_err(|e| LocalError::Db(e.to_string()))?;
            }
            tx.commit().map_err(|e| LocalError::Db(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| local_err(LocalStoreOp::Set, "spawn_blocking", LocalError::Io(e.to_string())))?;
        result.map_err(|e| local_err(LocalStoreOp::Set, "set", e))
    }

    async fn delete(&self, key: &str) -> ClResult<()> {
        let db = Arc::clone(&self.db);
        let key = key.to_string();
        let result = tokio::task::spawn_blocking(move || -> Result<(), LocalError> {
            let tx = db.begin_write().map_err(|e| LocalError::Db(e.to_string()))?;
            {
                let mut table = tx.open_table(TABLE_KV).map_err(|e| LocalError::Db(e.to_string()))?;
                table.remove(key.as_str()).map_err(|e| LocalError::Db(e.to_string()))?;
            }
            tx.commit().map_err(|e| LocalError::Db(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| local_err(LocalStoreOp::Delete, "spawn_blocking", LocalError::Io(e.to_string())))?;
        result.map_err(|e| local_err(LocalStoreOp::Delete, "delete", e))
    }
}

impl std::fmt::Debug for RedbLocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbLocalStore").finish()
    }
}


// vim: ts=4
