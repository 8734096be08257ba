//! Client-side half of the replication engine: checkpoints and a hydrated
//! CRDT document, the gap/recovery state machine, the subscription/
//! reconciliation loop, the optimistic write path, protocol-version
//! migration, and the per-`(database, collection)` singleton registry.
//!
//! [`engine::CollectionEngine`] is the object application code actually
//! holds; everything else in this crate is a collaborator it wires together.

pub mod engine;
pub mod local_store;
pub mod optimistic;
pub mod protocol;
pub mod recovery;
pub mod registry;
pub mod retry;

pub mod prelude {
    pub use crate::engine::{CollectionEngine, RunOutcome, ACTIVE_POLL_INTERVAL, IDLE_POLL_INTERVAL};
    pub use crate::local_store::{CheckpointStore, CrdtStore, LocalKv};
    pub use crate::optimistic::{MutationOp, OptimisticStore, OptimisticWritePath};
    pub use crate::protocol::{Migration, ProtocolCoordinator, PROTOCOL_VERSION_KEY, SERVER_CALL_TIMEOUT};
    pub use crate::recovery::{StreamEvent, StreamState, StreamStateMachine, TransitionLog};
    pub use crate::registry::SingletonRegistry;
    pub use crate::retry::{with_retry, with_timeout, BACKOFF_CAP_MS, BACKOFF_SCHEDULE_MS};
}

// vim: ts=4
