//! Shared test doubles for `replicate-client` integration tests: an
//! in-memory [`FakeBackend`] standing in for `adapters/backend-adapter-redb`
//! (so these tests exercise the engine's reconciliation logic without
//! depending on a concrete storage engine), a [`MemoryKv`] standing in for
//! `adapters/local-store-redb`, and a [`RecordingUiStore`] standing in for
//! the host's optimistic UI store.

#![allow(dead_code)]

use async_trait::async_trait;
use replicate_backend::{
    BackendAdapter, ChangeStreamSummary, CollectionStats, InsertRequest, PullResult, StreamOptions,
    StreamOrder, UpdateRequest,
};
use replicate_client::local_store::LocalKv;
use replicate_client::optimistic::{MutationOp, OptimisticStore};
use replicate_codec::CrdtDocument;
use replicate_types::prelude::*;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;

/// In-memory stand-in for a backend adapter, implementing the same
/// dual-write/pull/compact/prune contract as
/// `replicate-backend-adapter-redb::RedbBackendAdapter`, minus persistence.
#[derive(Default)]
pub struct FakeBackend {
    inner: Mutex<FakeBackendState>,
}

#[derive(Default)]
struct FakeBackendState {
    deltas: Vec<DeltaEvent>,
    materialized: HashMap<DocumentId, MaterializedRow>,
    snapshots: Vec<Snapshot>,
    protocol_version: u32,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self { inner: Mutex::new(FakeBackendState { protocol_version: 1, ..Default::default() }) }
    }

    pub async fn set_protocol_version(&self, version: u32) {
        self.inner.lock().await.protocol_version = version;
    }

    pub async fn delta_count(&self) -> usize {
        self.inner.lock().await.deltas.len()
    }
}

#[async_trait]
impl BackendAdapter for FakeBackend {
    async fn insert(&self, collection: &CollectionId, req: InsertRequest) -> ClResult<DeltaEvent> {
        let mut state = self.inner.lock().await;
        if state.materialized.contains_key(&req.id) {
            return Err(Error::already_exists());
        }
        let timestamp = Timestamp::max_or_successor_of(
            Timestamp::now(),
            state.deltas.last().map(|d| d.timestamp).unwrap_or(Timestamp::ZERO),
        );
        let delta = DeltaEvent {
            collection: collection.clone(),
            document_id: req.id.clone(),
            crdt_bytes: req.crdt_bytes,
            version: 1,
            timestamp,
        };
        state.materialized.insert(
            req.id.clone(),
            MaterializedRow { id: req.id, fields: req.materialized, version: 1, timestamp, deleted: None },
        );
        state.deltas.push(delta.clone());
        Ok(delta)
    }

    async fn update(&self, collection: &CollectionId, req: UpdateRequest) -> ClResult<DeltaEvent> {
        let mut state = self.inner.lock().await;
        let current_version = state.materialized.get(&req.id).map(|r| r.version).unwrap_or(0);
        if current_version != req.version - 1 {
            return Err(Error::version_conflict(req.version - 1, current_version));
        }
        let current_timestamp =
            state.materialized.get(&req.id).map(|r| r.timestamp).unwrap_or(Timestamp::ZERO);
        let timestamp = Timestamp::max_or_successor_of(Timestamp::now(), current_timestamp);
        let delta = DeltaEvent {
            collection: collection.clone(),
            document_id: req.id.clone(),
            crdt_bytes: req.crdt_bytes,
            version: req.version,
            timestamp,
        };
        state.materialized.insert(
            req.id.clone(),
            MaterializedRow { id: req.id, fields: req.materialized, version: req.version, timestamp, deleted: None },
        );
        state.deltas.push(delta.clone());
        Ok(delta)
    }

    async fn delete(&self, collection: &CollectionId, id: &str) -> ClResult<DeltaEvent> {
        let mut state = self.inner.lock().await;
        let next_version = state.materialized.get(id).map(|r| r.version + 1).unwrap_or(1);
        let current_timestamp = state.materialized.get(id).map(|r| r.timestamp).unwrap_or(Timestamp::ZERO);
        let timestamp = Timestamp::max_or_successor_of(Timestamp::now(), current_timestamp);
        let delta = DeltaEvent {
            collection: collection.clone(),
            document_id: id.into(),
            crdt_bytes: Vec::new(),
            version: next_version,
            timestamp,
        };
        state.materialized.remove(id);
        state.deltas.push(delta.clone());
        Ok(delta)
    }

    async fn pull_changes(
        &self,
        collection: &CollectionId,
        checkpoint: Checkpoint,
        limit: Option<usize>,
    ) -> ClResult<PullResult> {
        self.stream(collection, StreamOptions { checkpoint, limit, order: StreamOrder::Asc, snapshot_mode: false })
            .await
    }

    async fn stream(&self, _collection: &CollectionId, opts: StreamOptions) -> ClResult<PullResult> {
        let state = self.inner.lock().await;

        if opts.snapshot_mode {
            return Ok(match state.snapshots.last() {
                Some(snapshot) => PullResult {
                    changes: vec![DeltaEvent {
                        collection: snapshot.collection.clone(),
                        document_id: SNAPSHOT_SENTINEL_ID.into(),
                        crdt_bytes: snapshot.snapshot_bytes.clone(),
                        version: 0,
                        timestamp: snapshot.latest_compaction_timestamp,
                    }],
                    checkpoint: Checkpoint { last_modified: snapshot.latest_compaction_timestamp },
                    has_more: false,
                },
                None => PullResult { changes: Vec::new(), checkpoint: opts.checkpoint, has_more: false },
            });
        }

        let limit = opts.limit.unwrap_or(replicate_backend::DEFAULT_PULL_LIMIT);
        let mut changes: Vec<DeltaEvent> =
            state.deltas.iter().filter(|d| d.timestamp > opts.checkpoint.last_modified).cloned().collect();
        if opts.order == StreamOrder::Desc {
            changes.reverse();
        }
        let has_more = changes.len() > limit;
        changes.truncate(limit);
        let checkpoint = changes
            .iter()
            .map(|d| d.timestamp)
            .max()
            .map(|last_modified| Checkpoint { last_modified })
            .unwrap_or(opts.checkpoint);
        Ok(PullResult { changes, checkpoint, has_more })
    }

    async fn change_stream(
        &self,
        _collection: &CollectionId,
    ) -> ClResult<std::pin::Pin<Box<dyn futures_core::Stream<Item = ChangeStreamSummary> + Send>>> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn compact(&self, collection: &CollectionId, retention_days: u32) -> ClResult<()> {
        let mut state = self.inner.lock().await;
        let cutoff = Timestamp::now().add_days(-(retention_days as i64));

        let doc = CrdtDocument::new();
        let mut max_folded: Option<Timestamp> = None;
        state.deltas.retain(|delta| {
            if delta.timestamp > cutoff {
                return true;
            }
            if !delta.crdt_bytes.is_empty() {
                let _ = doc.apply_update(&delta.crdt_bytes);
            }
            max_folded = Some(max_folded.map_or(delta.timestamp, |t| t.max(delta.timestamp)));
            false
        });

        if let Some(latest_compaction_timestamp) = max_folded {
            state.snapshots.push(Snapshot {
                collection: collection.clone(),
                snapshot_bytes: doc.encode_snapshot(),
                latest_compaction_timestamp,
                created_at: Timestamp::now(),
            });
        }
        Ok(())
    }

    async fn prune(&self, _collection: &CollectionId, retention_days: u32) -> ClResult<()> {
        let mut state = self.inner.lock().await;
        let cutoff = Timestamp::now().add_days(-(retention_days as i64));
        let newest = state.snapshots.iter().map(|s| s.created_at).max();
        state.snapshots.retain(|s| Some(s.created_at) == newest || s.created_at >= cutoff);
        Ok(())
    }

    async fn get_protocol_version(&self) -> ClResult<u32> {
        Ok(self.inner.lock().await.protocol_version)
    }

    async fn export_all(&self, _collection: &CollectionId) -> ClResult<Vec<MaterializedRow>> {
        Ok(self.inner.lock().await.materialized.values().cloned().collect())
    }

    async fn collection_stats(&self, _collection: &CollectionId) -> ClResult<CollectionStats> {
        let state = self.inner.lock().await;
        Ok(CollectionStats {
            delta_count: state.deltas.len() as u64,
            document_count: state.materialized.len() as u64,
            has_snapshot: !state.snapshots.is_empty(),
        })
    }

    async fn list_collections(&self) -> ClResult<Vec<CollectionId>> {
        Ok(Vec::new())
    }
}

/// In-memory [`LocalKv`], one instance per simulated client device.
#[derive(Default)]
pub struct MemoryKv {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl LocalKv for MemoryKv {
    async fn get(&self, key: &str) -> ClResult<Option<Vec<u8>>> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> ClResult<()> {
        self.data.lock().await.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> ClResult<()> {
        self.data.lock().await.remove(key);
        Ok(())
    }
}

/// In-memory optimistic UI store, keyed by the `id` field embedded in every
/// record payload (mirrors `demos/todo-sync`'s `TodoUiStore`).
#[derive(Default)]
pub struct RecordingUiStore {
    rows: StdMutex<HashMap<String, serde_json::Value>>,
    pending: StdMutex<Vec<MutationOp>>,
}

impl RecordingUiStore {
    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl OptimisticStore for RecordingUiStore {
    async fn begin(&self) -> ClResult<()> {
        self.pending.lock().unwrap().clear();
        Ok(())
    }

    async fn write(&self, op: MutationOp) -> ClResult<()> {
        self.pending.lock().unwrap().push(op);
        Ok(())
    }

    async fn commit(&self) -> ClResult<()> {
        let ops = std::mem::take(&mut *self.pending.lock().unwrap());
        let mut rows = self.rows.lock().unwrap();
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
        self.rows.lock().unwrap().clear();
        Ok(())
    }
}

// vim: ts=4
