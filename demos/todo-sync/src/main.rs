//! Minimal wiring of the replicate engine over a todo list: a redb-backed
//! backend store, a redb-backed local key-value store, and an in-memory
//! optimistic UI store, driven through insert/update/delete and a few turns
//! of the reconciliation loop (spec §8 "Illustrative scenarios" 1-3).

use replicate_backend::CollectionConfig;
use replicate_backend_adapter_redb::{AdapterConfig, RedbBackendAdapter};
use replicate_client::engine::CollectionEngine;
use replicate_client::optimistic::{MutationOp, OptimisticStore};
use replicate_client::protocol::Migration;
use replicate_local_store_redb::RedbLocalStore;
use replicate_types::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A toy stand-in for the host application's reactive UI store (spec
/// §4.10 `OptimisticStore`): keyed by the `id` field embedded in each
/// record's JSON payload, since the trait's `write` call only carries the
/// record value, not its id.
#[derive(Default)]
struct TodoUiStore {
    rows: Mutex<HashMap<String, serde_json::Value>>,
    pending: Mutex<Vec<MutationOp>>,
}

#[async_trait::async_trait]
impl OptimisticStore for TodoUiStore {
    async fn begin(&self) -> ClResult<()> {
        self.pending.lock().await.clear();
        Ok(())
    }

    async fn write(&self, op: MutationOp) -> ClResult<()> {
        self.pending.lock().await.push(op);
        Ok(())
    }

    async fn commit(&self) -> ClResult<()> {
        let ops = std::mem::take(&mut *self.pending.lock().await);
        let mut rows = self.rows.lock().await;
        for op in ops {
            match op {
                MutationOp::Insert(value) | MutationOp::Update(value) => {
                    if let Some(id) = value.get("id").and_then(|v| v.as_str()) {
                        rows.insert(id.to_string(), value);
                    }
                }
                MutationOp::Delete(id) => {
                    rows.remove(id.as_ref());
                }
            }
        }
        Ok(())
    }

    async fn truncate(&self) -> ClResult<()> {
        self.rows.lock().await.clear();
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".into()));
    let backend = Arc::new(
        RedbBackendAdapter::new(data_dir.join("backend.redb"), AdapterConfig::default())
            .await
            .expect("open backend store"),
    );
    let local =
        Arc::new(RedbLocalStore::open(data_dir.join("local.redb")).await.expect("open local store"));

    let config = CollectionConfig::new("todos");
    let engine = CollectionEngine::open(Arc::clone(&backend), local, TodoUiStore::default(), config)
        .await
        .expect("open collection engine");

    let migrations: Vec<Arc<dyn Migration>> = Vec::new();
    engine.negotiate_protocol(migrations).await.expect("negotiate protocol version");
    engine.initialize();

    // Bootstrap the reconciliation loop before any local writes, so the
    // initial gap probe sees an empty log and resolves straight to
    // `Streaming` rather than demanding a snapshot this collection has
    // never compacted (spec §4.8).
    engine.run_once().await.expect("bootstrap stream");

    engine
        .insert(vec![
            ("1".into(), serde_json::json!({"id": "1", "text": "Buy milk", "done": false})),
            ("2".into(), serde_json::json!({"id": "2", "text": "Walk the dog", "done": false})),
        ])
        .await
        .expect("insert todos");
    engine.run_once().await.expect("reconcile inserts");

    engine
        .update(vec![("1".into(), serde_json::json!({"id": "1", "text": "Buy milk", "done": true}))])
        .await
        .expect("update todo");
    engine.run_once().await.expect("reconcile update");

    engine.delete(vec!["2".into()]).await.expect("delete todo");
    engine.run_once().await.expect("reconcile delete");

    let records = engine.materialize().await;
    println!("materialized records: {records:#?}");

    engine.close().await.expect("close collection");
}

// vim: ts=4
