//! Error taxonomy. One tagged kind per failure mode the engine's public
//! surface can produce; the engine never throws an untyped error.

use crate::model::CollectionId;
use thiserror::Error;

pub type ClResult<T> = std::result::Result<T, Error>;

/// A single taxonomy kind, carried both standalone (for callers that only
/// care about the category) and embedded in [`Error`] (for callers that also
/// want `collection`/`document_id`/`cause`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
	VersionConflict { expected: u64, actual: u64 },
	AlreadyExists,
	NotFound,
	LocalStoreError { operation: LocalStoreOp },
	NetworkError { retryable: bool },
	ProtocolMismatchError,
	GapDetectedError,
	SnapshotError { reason: SnapshotErrorReason },
	CodecError { operation: CodecOp },
	DualStorageError,
	OptimisticWriteError { reason: OptimisticWriteErrorReason },
	Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalStoreOp {
	Get,
	Set,
	Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecOp {
	Encode,
	Decode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotErrorReason {
	NoSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimisticWriteErrorReason {
	NotInitialized,
}

/// The engine's public error type: a taxonomy kind plus enough context to act
/// on it (`{kind, collection?, documentId?, cause}`).
#[derive(Debug, Error)]
#[error("{kind:?} in collection {collection:?} doc {document_id:?}: {message}")]
pub struct Error {
	pub kind: ErrorKind,
	pub collection: Option<CollectionId>,
	pub document_id: Option<Box<str>>,
	pub message: String,
	#[source]
	pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self { kind, collection: None, document_id: None, message: message.into(), cause: None }
	}

	pub fn with_collection(mut self, collection: CollectionId) -> Self {
		self.collection = Some(collection);
		self
	}

	pub fn with_document(mut self, document_id: impl Into<Box<str>>) -> Self {
		self.document_id = Some(document_id.into());
		self
	}

	pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
		self.cause = Some(Box::new(cause));
		self
	}

	pub fn version_conflict(expected: u64, actual: u64) -> Self {
		Self::new(
			ErrorKind::VersionConflict { expected, actual },
			format!("expected version {expected}, found {actual}"),
		)
	}

	pub fn already_exists() -> Self {
		Self::new(ErrorKind::AlreadyExists, "document already exists")
	}

	pub fn not_found() -> Self {
		Self::new(ErrorKind::NotFound, "document not found")
	}

	pub fn local_store(operation: LocalStoreOp, key: impl Into<String>) -> Self {
		let key = key.into();
		Self::new(ErrorKind::LocalStoreError { operation }, format!("local store op on {key}"))
	}

	pub fn network(retryable: bool, message: impl Into<String>) -> Self {
		Self::new(ErrorKind::NetworkError { retryable }, message)
	}

	pub fn protocol_mismatch(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::ProtocolMismatchError, message)
	}

	pub fn gap_detected() -> Self {
		Self::new(ErrorKind::GapDetectedError, "checkpoint predates oldest retained delta")
	}

	pub fn no_snapshot() -> Self {
		Self::new(
			ErrorKind::SnapshotError { reason: SnapshotErrorReason::NoSnapshot },
			"server has no snapshot for this collection; cannot recover a stale client",
		)
	}

	pub fn codec(operation: CodecOp, message: impl Into<String>) -> Self {
		Self::new(ErrorKind::CodecError { operation }, message)
	}

	pub fn dual_storage(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::DualStorageError, message)
	}

	pub fn optimistic_not_initialized() -> Self {
		Self::new(
			ErrorKind::OptimisticWriteError { reason: OptimisticWriteErrorReason::NotInitialized },
			"optimistic store written before initialization completed",
		)
	}

	pub fn timeout(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Timeout, message)
	}

	/// Whether this error can be retried transparently rather than surfaced
	/// to the caller.
	pub fn is_retryable(&self) -> bool {
		matches!(self.kind, ErrorKind::NetworkError { retryable: true })
	}
}

// vim: ts=4
