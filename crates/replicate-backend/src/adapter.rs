//! The backend adapter trait: server-exposed operations per collection. A
//! concrete adapter owns the two deployment-wide tables plus the
//! per-collection materialized table and implements the dual-write
//! transaction contract.

use crate::types::{
    ChangeStreamSummary, CollectionStats, InsertRequest, PullResult, StreamOptions, UpdateRequest,
};
use futures_core::Stream;
use replicate_types::prelude::*;
use std::pin::Pin;

/// Backend storage model plus the operations exposed per collection.
/// Implementors provide the transactional isolation the dual-write contract
/// requires; this engine assumes but does not itself implement
/// serializability.
#[async_trait::async_trait]
pub trait BackendAdapter: Send + Sync {
    /// `insertDocument`. Fails `AlreadyExists` if `req.id` is already present
    /// in the materialized table.
    async fn insert(&self, collection: &CollectionId, req: InsertRequest) -> ClResult<DeltaEvent>;

    /// `updateDocument`. Fails `VersionConflict{expected,actual}` if the
    /// current row's version doesn't match `req.version - 1`.
    async fn update(&self, collection: &CollectionId, req: UpdateRequest) -> ClResult<DeltaEvent>;

    /// `deleteDocument`. Idempotent: if the row is already absent, still
    /// appends a tombstone delta rather than failing.
    async fn delete(&self, collection: &CollectionId, id: &str) -> ClResult<DeltaEvent>;

    /// `pullChanges`.
    async fn pull_changes(
        &self,
        collection: &CollectionId,
        checkpoint: Checkpoint,
        limit: Option<usize>,
    ) -> ClResult<PullResult>;

    /// `stream`: superset of `pullChanges` with snapshot-mode smuggling and
    /// explicit ordering.
    async fn stream(
        &self,
        collection: &CollectionId,
        opts: StreamOptions,
    ) -> ClResult<PullResult>;

    /// `changeStream`: reactive summary of newest delta timestamp plus total
    /// count, re-delivered whenever a matching row changes.
    async fn change_stream(
        &self,
        collection: &CollectionId,
    ) -> ClResult<Pin<Box<dyn Stream<Item = ChangeStreamSummary> + Send>>>;

    /// `compact`: fold deltas older than `retention_days` into a fresh
    /// snapshot and delete the folded deltas.
    async fn compact(&self, collection: &CollectionId, retention_days: u32) -> ClResult<()>;

    /// `prune`: delete snapshots older than `retention_days`, always keeping
    /// the newest one.
    async fn prune(&self, collection: &CollectionId, retention_days: u32) -> ClResult<()>;

    /// `getProtocolVersion`: the protocol version this backend deployment
    /// currently speaks.
    async fn get_protocol_version(&self) -> ClResult<u32>;

    /// `getTasks`: full-scan SSR hydration helper. Returns every live
    /// materialized row for `collection`, unpaginated.
    async fn export_all(&self, collection: &CollectionId) -> ClResult<Vec<MaterializedRow>>;

    /// Point-in-time volume stats, used by operational tooling and the
    /// compaction scheduler's logging.
    async fn collection_stats(&self, collection: &CollectionId) -> ClResult<CollectionStats>;

    /// All collection names this adapter currently has data for.
    async fn list_collections(&self) -> ClResult<Vec<CollectionId>>;
}

// vim: ts=4
