//! redb table layout for the backend storage model.
//!
//! Keys are built so that a lexicographic range scan over a collection
//! prefix yields rows already ordered the way callers need them: deltas
//! by `(timestamp ASC, version ASC)`, snapshots by `createdAt ASC`.

use redb::TableDefinition;
use replicate_types::prelude::*;

/// `documents` log: `{collection}\0{timestamp:020}\0{version:020}\0{documentId}` -> JSON [`DeltaEvent`].
pub const TABLE_DELTAS: TableDefinition<&str, &[u8]> = TableDefinition::new("deltas");

/// Materialized current-state table: `{collection}\0{documentId}` -> JSON [`MaterializedRow`].
pub const TABLE_MATERIALIZED: TableDefinition<&str, &[u8]> = TableDefinition::new("materialized");

/// `snapshots` table: `{collection}\0{createdAt:020}` -> JSON [`Snapshot`].
pub const TABLE_SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

/// Deployment-wide metadata: currently just the protocol version.
pub const TABLE_META: TableDefinition<&str, &str> = TableDefinition::new("meta");

pub const PROTOCOL_VERSION_KEY: &str = "protocol_version";

/// Width used to zero-pad `timestamp`/`version` in keys so string ordering
/// matches numeric ordering. `i64::MAX` has 19 digits; 20 leaves headroom.
const PAD_WIDTH: usize = 20;

pub fn collection_prefix(collection: &CollectionId) -> String {
    format!("{}\0", collection.as_str())
}

pub fn delta_key(collection: &CollectionId, timestamp: Timestamp, version: u64, document_id: &str) -> String {
    format!(
        "{}\0{:0pad$}\0{:0pad$}\0{}",
        collection.as_str(),
        timestamp.0.max(0),
        version,
        document_id,
        pad = PAD_WIDTH
    )
}

pub fn materialized_key(collection: &CollectionId, document_id: &str) -> String {
    format!("{}\0{}", collection.as_str(), document_id)
}

pub fn snapshot_key(collection: &CollectionId, created_at: Timestamp) -> String {
    format!("{}\0{:0pad$}", collection.as_str(), created_at.0.max(0), pad = PAD_WIDTH)
}

/// Strip the leading `collection\0` from a delta/snapshot key's document
/// suffix, used after a prefix range scan to confirm a key still belongs to
/// the collection being scanned (redb ranges aren't prefix-bounded).
pub fn belongs_to_collection(key: &str, prefix: &str) -> bool {
    key.starts_with(prefix)
}

// vim: ts=4
