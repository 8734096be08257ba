//! redb-backed implementation of [`replicate_backend::BackendAdapter`].
//!
//! # Storage layout
//!
//! - `deltas` — append-only log, keyed so a collection-prefixed range scan
//!   returns rows ordered `(timestamp ASC, version ASC)`.
//! - `materialized` — current-state table, one row per live document.
//! - `snapshots` — one or more full-state encodings per collection; pruning
//!   always keeps the newest.
//! - `meta` — deployment-wide metadata (currently just the protocol version).
//!
//! # Change notification
//!
//! Each collection gets a lazily-created [`CollectionInstance`] holding a
//! `tokio::sync::broadcast` channel; `change_stream` subscribes to it.

use async_stream::stream;
use dashmap::DashMap;
use futures_core::Stream;
use redb::{ReadableDatabase, ReadableTable};
use replicate_backend::{
    BackendAdapter, ChangeStreamSummary, CollectionStats, InsertRequest, PullResult,
    StreamOptions, StreamOrder, UpdateRequest,
};
use replicate_codec::CrdtDocument;
use replicate_types::error::{CodecOp, LocalStoreOp};
use replicate_types::prelude::*;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

mod error;
mod storage;
pub use error::Error;
use storage::*;

/// Configuration for [`RedbBackendAdapter`], mirroring the shape used by this
/// crate's sibling CRDT/RTDB redb adapters.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Capacity of the per-collection broadcast channel feeding `change_stream`.
    pub broadcast_capacity: usize,
    /// Idle timeout before a collection's cached instance (broadcaster,
    /// running delta count) is evicted.
    pub idle_timeout_secs: u64,
    /// Enable the background idle-eviction task.
    pub auto_evict: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self { broadcast_capacity: 1000, idle_timeout_secs: 300, auto_evict: true }
    }
}

struct CollectionInstance {
    broadcaster: tokio::sync::broadcast::Sender<ChangeStreamSummary>,
    delta_count: AtomicU64,
    last_accessed: AtomicU64,
}

impl CollectionInstance {
    fn new(capacity: usize, initial_count: u64) -> Self {
        let (broadcaster, _) = tokio::sync::broadcast::channel(capacity);
        Self {
            broadcaster,
            delta_count: AtomicU64::new(initial_count),
            last_accessed: AtomicU64::new(Timestamp::now().0 as u64),
        }
    }

    fn touch(&self) {
        self.last_accessed.store(Timestamp::now().0 as u64, Ordering::Relaxed);
    }

    fn last_accessed(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    fn record_delta(&self, timestamp: Timestamp) {
        let count = self.delta_count.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.broadcaster.send(ChangeStreamSummary { timestamp, count });
    }
}

pub struct RedbBackendAdapter {
    db: Arc<redb::Database>,
    config: AdapterConfig,
    instances: Arc<DashMap<String, Arc<CollectionInstance>>>,
}

impl RedbBackendAdapter {
    pub async fn new(path: impl AsRef<Path>, config: AdapterConfig) -> ClResult<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Io(e.to_string()))
                .map_err(|e| Error::local_from(LocalStoreOp::Set, &path, e))?;
        }

        let db = redb::Database::create(&path)
            .map_err(|e| Error::Db(e.to_string()))
            .map_err(|e| Error::local_from(LocalStoreOp::Set, &path, e))?;

        {
            let tx = db
                .begin_write()
                .map_err(|e| Error::Db(e.to_string()))
                .map_err(|e| Error::local_from(LocalStoreOp::Set, &path, e))?;
            let _ = tx.open_table(TABLE_DELTAS);
            let _ = tx.open_table(TABLE_MATERIALIZED);
            let _ = tx.open_table(TABLE_SNAPSHOTS);
            let _ = tx.open_table(TABLE_META);
            tx.commit()
                .map_err(|e| Error::Db(e.to_string()))
                .map_err(|e| Error::local_from(LocalStoreOp::Set, &path, e))?;
        }

        debug!(?path, "opened backend store");

        let adapter = Self { db: Arc::new(db), config, instances: Arc::new(DashMap::new()) };
        if adapter.config.auto_evict {
            adapter.spawn_eviction_task();
        }
        Ok(adapter)
    }

    /// Set the protocol version this deployment reports to clients.
    pub fn set_protocol_version(&self, version: u32) -> ClResult<()> {
        let tx = self.db.begin_write().map_err(|e| Error::Db(e.to_string()))?;
        {
            let mut table = tx.open_table(TABLE_META).map_err(|e| Error::Db(e.to_string()))?;
            table
                .insert(PROTOCOL_VERSION_KEY, version.to_string().as_str())
                .map_err(|e| Error::Db(e.to_string()))?;
        }
        tx.commit().map_err(|e| Error::Db(e.to_string()))?;
        Ok(())
    }

    fn get_or_create_instance(&self, collection: &CollectionId) -> ClResult<Arc<CollectionInstance>> {
        let key = collection.as_str().to_string();
        if let Some(instance) = self.instances.get(&key) {
            instance.touch();
            return Ok(Arc::clone(&instance));
        }

        let initial_count = self.count_deltas(collection)?;
        let instance =
            Arc::new(CollectionInstance::new(self.config.broadcast_capacity, initial_count));
        self.instances.insert(key, Arc::clone(&instance));
        Ok(instance)
    }

    fn count_deltas(&self, collection: &CollectionId) -> ClResult<u64> {
        let tx = self.db.begin_read().map_err(|e| Error::Db(e.to_string()))?;
        let table = tx.open_table(TABLE_DELTAS).map_err(|e| Error::Db(e.to_string()))?;
        let prefix = collection_prefix(collection);
        let mut count = 0u64;
        let range = table.range(prefix.as_str()..).map_err(|e| Error::Db(e.to_string()))?;
        for item in range {
            let (key, _) = item.map_err(|e| Error::Db(e.to_string()))?;
            if !belongs_to_collection(key.value(), &prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    fn spawn_eviction_task(&self) {
        let instances = Arc::clone(&self.instances);
        let idle_timeout = self.config.idle_timeout_secs;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let now = Timestamp::now().0 as u64;
                let before = instances.len();
                instances.retain(|_, instance| now.saturating_sub(instance.last_accessed()) <= idle_timeout * 1000);
                if instances.len() < before {
                    debug!(evicted = before - instances.len(), "evicted idle collection instances");
                }
            }
        });
    }

}

impl Error {
    fn local_from(operation: LocalStoreOp, key: impl std::fmt::Debug, cause: Error) -> replicate_types::error::Error {
        replicate_types::error::Error::local_store(operation, format!("{key:?}")).with_cause(cause)
    }

    fn dual_storage(cause: Error) -> replicate_types::error::Error {
        replicate_types::error::Error::dual_storage(cause.to_string()).with_cause(cause)
    }
}

fn db_err(e: impl std::error::Error + Send + Sync + 'static) -> replicate_types::error::Error {
    Error::dual_storage(Error::Db(e.to_string()))
}

#[async_trait::async_trait]
impl BackendAdapter for RedbBackendAdapter {
    async fn insert(&self, collection: &CollectionId, req: InsertRequest) -> ClResult<DeltaEvent> {
        let instance = self.get_or_create_instance(collection)?;
        let db = Arc::clone(&self.db);
        let collection = collection.clone();

        let delta = tokio::task::spawn_blocking(move || {
            let tx = db.begin_write().map_err(db_err)?;
            let delta = {
                let mut materialized = tx.open_table(TABLE_MATERIALIZED).map_err(db_err)?;
                let mut deltas = tx.open_table(TABLE_DELTAS).map_err(db_err)?;

                let mat_key = materialized_key(&collection, &req.id);
                if materialized.get(mat_key.as_str()).map_err(db_err)?.is_some() {
                    return Err(replicate_types::error::Error::already_exists());
                }

                let timestamp = Timestamp::max_or_successor_of(Timestamp::now(), Timestamp::ZERO);
                let delta = DeltaEvent {
                    collection: collection.clone(),
                    document_id: req.id.clone(),
                    crdt_bytes: req.crdt_bytes,
                    version: 1,
                    timestamp,
                };
                let row = MaterializedRow {
                    id: req.id.clone(),
                    fields: req.materialized,
                    version: 1,
                    timestamp,
                    deleted: None,
                };

                let delta_bytes = serde_json::to_vec(&delta)
                    .map_err(|e| replicate_types::error::Error::codec(CodecOp::Encode, e.to_string()))?;
                let row_bytes = serde_json::to_vec(&row)
                    .map_err(|e| replicate_types::error::Error::codec(CodecOp::Encode, e.to_string()))?;

                deltas
                    .insert(delta_key(&collection, timestamp, 1, &req.id).as_str(), delta_bytes.as_slice())
                    .map_err(db_err)?;
                materialized.insert(mat_key.as_str(), row_bytes.as_slice()).map_err(db_err)?;

                delta
            };
            tx.commit().map_err(db_err)?;
            Ok::<_, replicate_types::error::Error>(delta)
        })
        .await
        .map_err(|e| replicate_types::error::Error::dual_storage(e.to_string()))??;

        instance.record_delta(delta.timestamp);
        Ok(delta)
    }

    async fn update(&self, collection: &CollectionId, req: UpdateRequest) -> ClResult<DeltaEvent> {
        let instance = self.get_or_create_instance(collection)?;
        let db = Arc::clone(&self.db);
        let collection = collection.clone();

        let delta = tokio::task::spawn_blocking(move || {
            let tx = db.begin_write().map_err(db_err)?;
            let delta = {
                let mut materialized = tx.open_table(TABLE_MATERIALIZED).map_err(db_err)?;
                let mut deltas = tx.open_table(TABLE_DELTAS).map_err(db_err)?;

                let mat_key = materialized_key(&collection, &req.id);
                let current = materialized
                    .get(mat_key.as_str())
                    .map_err(db_err)?
                    .map(|v| {
                        serde_json::from_slice::<MaterializedRow>(v.value())
                            .map_err(|e| replicate_types::error::Error::codec(CodecOp::Decode, e.to_string()))
                    })
                    .transpose()?;

                let current_version = current.as_ref().map(|r| r.version).unwrap_or(0);
                if current_version != req.version - 1 {
                    return Err(replicate_types::error::Error::version_conflict(
                        req.version - 1,
                        current_version,
                    ));
                }

                let current_timestamp = current.as_ref().map(|r| r.timestamp).unwrap_or(Timestamp::ZERO);
                let timestamp = Timestamp::max_or_successor_of(Timestamp::now(), current_timestamp);

                let delta = DeltaEvent {
                    collection: collection.clone(),
                    document_id: req.id.clone(),
                    crdt_bytes: req.crdt_bytes,
                    version: req.version,
                    timestamp,
                };
                let row = MaterializedRow {
                    id: req.id.clone(),
                    fields: req.materialized,
                    version: req.version,
                    timestamp,
                    deleted: None,
                };

                let delta_bytes = serde_json::to_vec(&delta)
                    .map_err(|e| replicate_types::error::Error::codec(CodecOp::Encode, e.to_string()))?;
                let row_bytes = serde_json::to_vec(&row)
                    .map_err(|e| replicate_types::error::Error::codec(CodecOp::Encode, e.to_string()))?;

                deltas
                    .insert(
                        delta_key(&collection, timestamp, req.version, &req.id).as_str(),
                        delta_bytes.as_slice(),
                    )
                    .map_err(db_err)?;
                materialized.insert(mat_key.as_str(), row_bytes.as_slice()).map_err(db_err)?;

                delta
            };
            tx.commit().map_err(db_err)?;
            Ok::<_, replicate_types::error::Error>(delta)
        })
        .await
        .map_err(|e| replicate_types::error::Error::dual_storage(e.to_string()))??;

        instance.record_delta(delta.timestamp);
        Ok(delta)
    }

    async fn delete(&self, collection: &CollectionId, id: &str) -> ClResult<DeltaEvent> {
        let instance = self.get_or_create_instance(collection)?;
        let db = Arc::clone(&self.db);
        let collection = collection.clone();
        let id: DocumentId = id.into();

        let delta = tokio::task::spawn_blocking(move || {
            let tx = db.begin_write().map_err(db_err)?;
            let delta = {
                let mut materialized = tx.open_table(TABLE_MATERIALIZED).map_err(db_err)?;
                let mut deltas = tx.open_table(TABLE_DELTAS).map_err(db_err)?;

                let mat_key = materialized_key(&collection, &id);

                // The materialized row is gone after a prior delete, so it can't tell us
                // where the version lineage left off; the delta log is the source of truth.
                let prefix = collection_prefix(&collection);
                let mut latest: Option<(u64, Timestamp)> = None;
                let range = deltas.range(prefix.as_str()..).map_err(db_err)?;
                for item in range {
                    let (key, value) = item.map_err(db_err)?;
                    if !belongs_to_collection(key.value(), &prefix) {
                        break;
                    }
                    let existing: DeltaEvent = serde_json::from_slice(value.value())
                        .map_err(|e| replicate_types::error::Error::codec(CodecOp::Decode, e.to_string()))?;
                    if existing.document_id == id
                        && latest.is_none_or(|(version, _)| existing.version > version)
                    {
                        latest = Some((existing.version, existing.timestamp));
                    }
                }

                let next_version = latest.map(|(version, _)| version + 1).unwrap_or(1);
                let current_timestamp = latest.map(|(_, timestamp)| timestamp).unwrap_or(Timestamp::ZERO);
                let timestamp = Timestamp::max_or_successor_of(Timestamp::now(), current_timestamp);

                let delta = DeltaEvent {
                    collection: collection.clone(),
                    document_id: id.clone(),
                    crdt_bytes: Vec::new(),
                    version: next_version,
                    timestamp,
                };
                let delta_bytes = serde_json::to_vec(&delta)
                    .map_err(|e| replicate_types::error::Error::codec(CodecOp::Encode, e.to_string()))?;

                deltas
                    .insert(delta_key(&collection, timestamp, next_version, &id).as_str(), delta_bytes.as_slice())
                    .map_err(db_err)?;
                materialized.remove(mat_key.as_str()).map_err(db_err)?;

                delta
            };
            tx.commit().map_err(db_err)?;
            Ok::<_, replicate_types::error::Error>(delta)
        })
        .await
        .map_err(|e| replicate_types::error::Error::dual_storage(e.to_string()))??;

        instance.record_delta(delta.timestamp);
        Ok(delta)
    }

    async fn pull_changes(
        &self,
        collection: &CollectionId,
        checkpoint: Checkpoint,
        limit: Option<usize>,
    ) -> ClResult<PullResult> {
        self.stream(
            collection,
            StreamOptions { checkpoint, limit, order: StreamOrder::Asc, snapshot_mode: false },
        )
        .await
    }

    async fn stream(&self, collection: &CollectionId, opts: StreamOptions) -> ClResult<PullResult> {
        let db = Arc::clone(&self.db);
        let collection = collection.clone();

        tokio::task::spawn_blocking(move || {
            let tx = db.begin_read().map_err(db_err)?;

            if opts.snapshot_mode {
                let snapshot = {
                    let table = tx.open_table(TABLE_SNAPSHOTS).map_err(db_err)?;
                    let prefix = collection_prefix(&collection);
                    let mut latest: Option<Snapshot> = None;
                    let range = table.range(prefix.as_str()..).map_err(db_err)?;
                    for item in range {
                        let (key, value) = item.map_err(db_err)?;
                        if !belongs_to_collection(key.value(), &prefix) {
                            break;
                        }
                        let snapshot: Snapshot = serde_json::from_slice(value.value())
                            .map_err(|e| replicate_types::error::Error::codec(CodecOp::Decode, e.to_string()))?;
                        if latest.as_ref().is_none_or(|s| snapshot.created_at > s.created_at) {
                            latest = Some(snapshot);
                        }
                    }
                    latest
                };

                return Ok(match snapshot {
                    Some(snapshot) => PullResult {
                        changes: vec![DeltaEvent {
                            collection: collection.clone(),
                            document_id: SNAPSHOT_SENTINEL_ID.into(),
                            crdt_bytes: snapshot.snapshot_bytes,
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
            let table = tx.open_table(TABLE_DELTAS).map_err(db_err)?;
            let prefix = collection_prefix(&collection);
            let mut changes = Vec::new();
            let range = table.range(prefix.as_str()..).map_err(db_err)?;
            for item in range {
                let (key, value) = item.map_err(db_err)?;
                if !belongs_to_collection(key.value(), &prefix) {
                    break;
                }
                let delta: DeltaEvent = serde_json::from_slice(value.value())
                    .map_err(|e| replicate_types::error::Error::codec(CodecOp::Decode, e.to_string()))?;
                if delta.timestamp > opts.checkpoint.last_modified {
                    changes.push(delta);
                    // `Asc` can stop as soon as it has `limit` items off the
                    // front of the range; `Desc` wants the newest `limit`, off
                    // the tail, so it must keep scanning and truncate after.
                    if opts.order == StreamOrder::Asc && changes.len() >= limit {
                        break;
                    }
                }
            }

            let matched = changes.len();
            if opts.order == StreamOrder::Desc {
                if changes.len() > limit {
                    changes.drain(..changes.len() - limit);
                }
                changes.reverse();
            }

            let has_more = matched >= limit;
            let checkpoint = changes
                .iter()
                .map(|d| d.timestamp)
                .max()
                .map(|last_modified| Checkpoint { last_modified })
                .unwrap_or(opts.checkpoint);

            Ok(PullResult { changes, checkpoint, has_more })
        })
        .await
        .map_err(|e| replicate_types::error::Error::dual_storage(e.to_string()))?
    }

    async fn change_stream(
        &self,
        collection: &CollectionId,
    ) -> ClResult<Pin<Box<dyn Stream<Item = ChangeStreamSummary> + Send>>> {
        let instance = self.get_or_create_instance(collection)?;
        let initial = ChangeStreamSummary {
            timestamp: Timestamp::now(),
            count: instance.delta_count.load(Ordering::SeqCst),
        };
        let mut rx = instance.broadcaster.subscribe();

        let out = stream! {
            yield initial;
            loop {
                match rx.recv().await {
                    Ok(summary) => yield summary,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "change_stream subscriber lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(out))
    }

    async fn compact(&self, collection: &CollectionId, retention_days: u32) -> ClResult<()> {
        let db = Arc::clone(&self.db);
        let collection = collection.clone();

        tokio::task::spawn_blocking(move || {
            let cutoff = Timestamp::now().add_days(-(retention_days as i64));

            let tx = db.begin_write().map_err(db_err)?;
            {
                let existing_snapshot = {
                    let table = tx.open_table(TABLE_SNAPSHOTS).map_err(db_err)?;
                    let prefix = collection_prefix(&collection);
                    let mut latest: Option<Snapshot> = None;
                    let range = table.range(prefix.as_str()..).map_err(db_err)?;
                    for item in range {
                        let (key, value) = item.map_err(db_err)?;
                        if !belongs_to_collection(key.value(), &prefix) {
                            break;
                        }
                        let snapshot: Snapshot = serde_json::from_slice(value.value())
                            .map_err(|e| replicate_types::error::Error::codec(CodecOp::Decode, e.to_string()))?;
                        if latest.as_ref().is_none_or(|s| snapshot.created_at > s.created_at) {
                            latest = Some(snapshot);
                        }
                    }
                    latest
                };

                let doc = match &existing_snapshot {
                    Some(s) => CrdtDocument::from_bytes(&s.snapshot_bytes)?,
                    None => CrdtDocument::new(),
                };

                let mut deltas = tx.open_table(TABLE_DELTAS).map_err(db_err)?;
                let prefix = collection_prefix(&collection);
                let mut folded_keys = Vec::new();
                let mut max_folded_ts: Option<Timestamp> = None;

                let range = deltas.range(prefix.as_str()..).map_err(db_err)?;
                for item in range {
                    let (key, value) = item.map_err(db_err)?;
                    if !belongs_to_collection(key.value(), &prefix) {
                        break;
                    }
                    let delta: DeltaEvent = serde_json::from_slice(value.value())
                        .map_err(|e| replicate_types::error::Error::codec(CodecOp::Decode, e.to_string()))?;
                    if delta.timestamp > cutoff {
                        continue;
                    }
                    if !delta.crdt_bytes.is_empty() {
                        doc.apply_update(&delta.crdt_bytes)?;
                    }
                    max_folded_ts = Some(max_folded_ts.map_or(delta.timestamp, |t| t.max(delta.timestamp)));
                    folded_keys.push(key.value().to_string());
                }

                if folded_keys.is_empty() {
                    debug!(%collection, "compaction found nothing older than cutoff, skipping");
                    return Ok(());
                }

                let latest_compaction_timestamp = max_folded_ts.unwrap();
                let now = Timestamp::now();
                let snapshot = Snapshot {
                    collection: collection.clone(),
                    snapshot_bytes: doc.encode_snapshot(),
                    latest_compaction_timestamp,
                    created_at: now,
                };
                let snapshot_bytes = serde_json::to_vec(&snapshot)
                    .map_err(|e| replicate_types::error::Error::codec(CodecOp::Encode, e.to_string()))?;

                {
                    let mut snapshots = tx.open_table(TABLE_SNAPSHOTS).map_err(db_err)?;
                    snapshots
                        .insert(snapshot_key(&collection, now).as_str(), snapshot_bytes.as_slice())
                        .map_err(db_err)?;
                }

                for key in folded_keys {
                    deltas.remove(key.as_str()).map_err(db_err)?;
                }

                debug!(%collection, folded = ?latest_compaction_timestamp, "compaction complete");
            }
            tx.commit().map_err(db_err)?;
            Ok(())
        })
        .await
        .map_err(|e| replicate_types::error::Error::dual_storage(e.to_string()))?
    }

    async fn prune(&self, collection: &CollectionId, retention_days: u32) -> ClResult<()> {
        let db = Arc::clone(&self.db);
        let collection = collection.clone();

        tokio::task::spawn_blocking(move || {
            let cutoff = Timestamp::now().add_days(-(retention_days as i64));

            let tx = db.begin_write().map_err(db_err)?;
            {
                let mut snapshots = tx.open_table(TABLE_SNAPSHOTS).map_err(db_err)?;
                let prefix = collection_prefix(&collection);
                let mut rows = Vec::new();
                let range = snapshots.range(prefix.as_str()..).map_err(db_err)?;
                for item in range {
                    let (key, value) = item.map_err(db_err)?;
                    if !belongs_to_collection(key.value(), &prefix) {
                        break;
                    }
                    let snapshot: Snapshot = serde_json::from_slice(value.value())
                        .map_err(|e| replicate_types::error::Error::codec(CodecOp::Decode, e.to_string()))?;
                    rows.push((key.value().to_string(), snapshot.created_at));
                }

                if rows.len() <= 1 {
                    return Ok(());
                }
                let newest = rows.iter().map(|(_, ts)| *ts).max().unwrap();

                for (key, created_at) in rows {
                    if created_at != newest && created_at < cutoff {
                        snapshots.remove(key.as_str()).map_err(db_err)?;
                    }
                }
            }
            tx.commit().map_err(db_err)?;
            Ok(())
        })
        .await
        .map_err(|e| replicate_types::error::Error::dual_storage(e.to_string()))?
    }

    async fn get_protocol_version(&self) -> ClResult<u32> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let tx = db.begin_read().map_err(db_err)?;
            let table = tx.open_table(TABLE_META).map_err(db_err)?;
            match table.get(PROTOCOL_VERSION_KEY).map_err(db_err)? {
                Some(v) => v.value().parse::<u32>().map_err(|e| {
                    replicate_types::error::Error::codec(CodecOp::Decode, e.to_string())
                }),
                None => Ok(1),
            }
        })
        .await
        .map_err(|e| replicate_types::error::Error::dual_storage(e.to_string()))?
    }

    async fn export_all(&self, collection: &CollectionId) -> ClResult<Vec<MaterializedRow>> {
        let db = Arc::clone(&self.db);
        let collection = collection.clone();
        tokio::task::spawn_blocking(move || {
            let tx = db.begin_read().map_err(db_err)?;
            let table = tx.open_table(TABLE_MATERIALIZED).map_err(db_err)?;
            let prefix = collection_prefix(&collection);
            let mut rows = Vec::new();
            let range = table.range(prefix.as_str()..).map_err(db_err)?;
            for item in range {
                let (key, value) = item.map_err(db_err)?;
                if !belongs_to_collection(key.value(), &prefix) {
                    break;
                }
                let row: MaterializedRow = serde_json::from_slice(value.value())
                    .map_err(|e| replicate_types::error::Error::codec(CodecOp::Decode, e.to_string()))?;
                rows.push(row);
            }
            Ok(rows)
        })
        .await
        .map_err(|e| replicate_types::error::Error::dual_storage(e.to_string()))?
    }

    async fn collection_stats(&self, collection: &CollectionId) -> ClResult<CollectionStats> {
        let db = Arc::clone(&self.db);
        let collection = collection.clone();
        tokio::task::spawn_blocking(move || {
            let tx = db.begin_read().map_err(db_err)?;

            let delta_count = {
                let table = tx.open_table(TABLE_DELTAS).map_err(db_err)?;
                let prefix = collection_prefix(&collection);
                let mut count = 0u64;
                let range = table.range(prefix.as_str()..).map_err(db_err)?;
                for item in range {
                    let (key, _) = item.map_err(db_err)?;
                    if !belongs_to_collection(key.value(), &prefix) {
                        break;
                    }
                    count += 1;
                }
                count
            };

            let document_count = {
                let table = tx.open_table(TABLE_MATERIALIZED).map_err(db_err)?;
                let prefix = collection_prefix(&collection);
                let mut count = 0u64;
                let range = table.range(prefix.as_str()..).map_err(db_err)?;
                for item in range {
                    let (key, _) = item.map_err(db_err)?;
                    if !belongs_to_collection(key.value(), &prefix) {
                        break;
                    }
                    count += 1;
                }
                count
            };

            let has_snapshot = {
                let table = tx.open_table(TABLE_SNAPSHOTS).map_err(db_err)?;
                let prefix = collection_prefix(&collection);
                let range = table.range(prefix.as_str()..).map_err(db_err)?;
                let mut found = false;
                for item in range {
                    let (key, _) = item.map_err(db_err)?;
                    if !belongs_to_collection(key.value(), &prefix) {
                        break;
                    }
                    found = true;
                    break;
                }
                found
            };

            Ok(CollectionStats { delta_count, document_count, has_snapshot })
        })
        .await
        .map_err(|e| replicate_types::error::Error::dual_storage(e.to_string()))?
    }

    async fn list_collections(&self) -> ClResult<Vec<CollectionId>> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let tx = db.begin_read().map_err(db_err)?;
            let table = tx.open_table(TABLE_MATERIALIZED).map_err(db_err)?;
            let mut seen = std::collections::BTreeSet::new();
            for item in table.iter().map_err(db_err)? {
                let (key, _) = item.map_err(db_err)?;
                if let Some((collection, _)) = key.value().split_once('\0') {
                    seen.insert(collection.to_string());
                }
            }
            Ok(seen.into_iter().map(CollectionId::new).collect())
        })
        .await
        .map_err(|e| replicate_types::error::Error::dual_storage(e.to_string()))?
    }
}

impl std::fmt::Debug for RedbBackendAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackendAdapter").field("config", &self.config).finish()
    }
}

// vim: ts=4
