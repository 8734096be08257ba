//! Data model: documents, delta events, snapshots, checkpoints.

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name of a user collection. Cheap to clone; shared across every component
/// that touches a collection (adapters, subscriptions, the singleton registry).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionId(pub Arc<str>);

impl CollectionId {
	pub fn new(name: impl Into<Arc<str>>) -> Self {
		Self(name.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for CollectionId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&str> for CollectionId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

impl From<String> for CollectionId {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

/// Client-generated stable document identifier. Reusable after a hard delete.
pub type DocumentId = Box<str>;

/// Synthetic document id used to smuggle a snapshot through a delta stream
/// when `snapshotMode=true`.
pub const SNAPSHOT_SENTINEL_ID: &str = "__snapshot__";

/// A single CRDT update appended to the backend's append-only log.
///
/// `crdt_bytes` is opaque to this engine: it must round-trip byte-identical
/// through every storage and wire hop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeltaEvent {
	pub collection: CollectionId,
	pub document_id: DocumentId,
	pub crdt_bytes: Vec<u8>,
	pub version: u64,
	pub timestamp: Timestamp,
}

impl DeltaEvent {
	/// A tombstone delta carries no forward state of its own — the document's
	/// removal is recorded by its absence from the materialized table.
	pub fn is_snapshot_sentinel(&self) -> bool {
		self.document_id.as_ref() == SNAPSHOT_SENTINEL_ID
	}
}

/// Full-state encoding of a collection's CRDT document as of
/// `latest_compaction_timestamp`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
	pub collection: CollectionId,
	pub snapshot_bytes: Vec<u8>,
	pub latest_compaction_timestamp: Timestamp,
	pub created_at: Timestamp,
}

/// A client's cursor into a collection's delta log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
	pub last_modified: Timestamp,
}

impl Checkpoint {
	pub const ZERO: Checkpoint = Checkpoint { last_modified: Timestamp::ZERO };

	pub fn age(&self, now: Timestamp) -> std::time::Duration {
		let age_ms = (now.0 - self.last_modified.0).max(0);
		std::time::Duration::from_millis(age_ms as u64)
	}
}

/// A row of the materialized current-state table: application fields plus
/// the engine-injected version and timestamp.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaterializedRow {
	pub id: DocumentId,
	pub fields: serde_json::Value,
	pub version: u64,
	pub timestamp: Timestamp,
	/// Retained only for backward compatibility with deployments that used to
	/// carry a `deleted` flag; new rows never set it, and a row's absence from
	/// the table is the sole authoritative deletion signal.
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub deleted: Option<bool>,
}

// vim: ts=4
