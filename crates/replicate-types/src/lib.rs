//! Shared domain types, error taxonomy, and small newtypes used across every
//! crate in the replication engine.

pub mod error;
pub mod model;
pub mod time;

pub mod prelude {
	pub use crate::error::{ClResult, Error, ErrorKind};
	pub use crate::model::{
		Checkpoint, CollectionId, DeltaEvent, DocumentId, MaterializedRow, Snapshot,
		SNAPSHOT_SENTINEL_ID,
	};
	pub use crate::time::Timestamp;
}

// vim: ts=4
