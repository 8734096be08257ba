//! Request/response shapes for the backend storage model.

use replicate_types::prelude::*;
use serde::{Deserialize, Serialize};

/// Arguments for `insert`. `version` is always `1`; carried
/// explicitly so callers can't accidentally insert at a later version.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InsertRequest {
    pub id: DocumentId,
    pub crdt_bytes: Vec<u8>,
    pub materialized: serde_json::Value,
}

/// Arguments for `update`. `version` is the version the caller
/// believes the row is currently at plus one; mismatches fail `VersionConflict`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub id: DocumentId,
    pub crdt_bytes: Vec<u8>,
    pub materialized: serde_json::Value,
    pub version: u64,
}

/// Result of `pullChanges`/`stream`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PullResult {
    pub changes: Vec<DeltaEvent>,
    pub checkpoint: Checkpoint,
    pub has_more: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamOrder {
    #[default]
    Asc,
    Desc,
}

/// Options for `stream`: a superset of `pullChanges` that can also
/// smuggle a snapshot through the delta channel.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreamOptions {
    pub checkpoint: Checkpoint,
    pub limit: Option<usize>,
    pub order: StreamOrder,
    pub snapshot_mode: bool,
}

/// Default page size for `pullChanges`/`stream`.
pub const DEFAULT_PULL_LIMIT: usize = 100;

/// Result of the reactive `changeStream(collection)` query:
/// re-delivered by the platform whenever a matching row changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStreamSummary {
    pub timestamp: Timestamp,
    pub count: u64,
}

/// Configuration recognized by the collection factory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub collection: CollectionId,
    pub compaction_retention_days: u32,
    pub pruning_retention_days: u32,
    #[serde(default)]
    pub initial_data: Vec<serde_json::Value>,
    #[serde(default = "default_database_name")]
    pub database_name: String,
}

fn default_database_name() -> String {
    "replicate".to_string()
}

impl CollectionConfig {
    pub fn new(collection: impl Into<CollectionId>) -> Self {
        Self {
            collection: collection.into(),
            compaction_retention_days: 90,
            pruning_retention_days: 180,
            initial_data: Vec::new(),
            database_name: default_database_name(),
        }
    }
}

/// Point-in-time size/volume stats for a collection, used by operational
/// tooling and the compaction scheduler's logging.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct CollectionStats {
    pub delta_count: u64,
    pub document_count: u64,
    pub has_snapshot: bool,
}

// vim: ts=4
