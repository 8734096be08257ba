//! Gap detection and snapshot recovery state machine.

use replicate_types::prelude::*;
use std::time::Duration;
use tracing::{info, warn};

/// `age(cp) > STALE_THRESHOLD` triggers a gap probe on open.
pub const STALE_THRESHOLD: Duration = Duration::from_secs(7 * 24 * 3600);
/// Budget for the `Recovering` state before it's treated as failed.
pub const RECOVERY_BUDGET: Duration = Duration::from_secs(30);
/// Timeout for the oldest-delta probe in `GapProbe`.
pub const GAP_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Opening,
    GapProbe,
    Recovering,
    Streaming,
    Offline,
    Terminated,
}

/// Events that drive [`StreamState`] transitions. A succeeding gap probe is
/// resolved through [`StreamStateMachine::resolve_gap_probe`] instead of an
/// event here, since its outcome depends on comparing two timestamps the
/// caller holds, not on the event alone.
pub enum StreamEvent {
    Start,
    CheckpointLoaded { checkpoint: Checkpoint, now: Timestamp },
    OldestDeltaProbeFailed,
    SnapshotFetched,
    NoSnapshotAvailable,
    DeltaBatchApplied,
    NetworkDown,
    NetworkUp,
    UserClose,
}

/// A minimal event log entry: structured events carrying `collection`,
/// prior state, and relevant timestamps on every transition.
#[derive(Debug, Clone)]
pub struct TransitionLog {
    pub collection: CollectionId,
    pub from: StreamState,
    pub to: StreamState,
    pub at: Timestamp,
}

/// The per-stream state machine. Owns only the current state; callers drive
/// it with [`StreamStateMachine::apply`] and own the actual I/O (probing,
/// fetching snapshots, applying deltas) that produces each [`StreamEvent`].
pub struct StreamStateMachine {
    collection: CollectionId,
    state: StreamState,
}

impl StreamStateMachine {
    pub fn new(collection: CollectionId) -> Self {
        Self { collection, state: StreamState::Idle }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Apply one event, returning the transition taken (and logging it).
    pub fn apply(&mut self, event: StreamEvent) -> ClResult<TransitionLog> {
        let from = self.state;
        let to = self.transition(event)?;
        self.state = to;

        let log = TransitionLog { collection: self.collection.clone(), from, to, at: Timestamp::now() };
        info!(collection = %log.collection, ?log.from, ?log.to, "stream state transition");
        Ok(log)
    }

    fn transition(&self, event: StreamEvent) -> ClResult<StreamState> {
        use StreamEvent::*;
        use StreamState::*;

        Ok(match (self.state, event) {
            (Idle, Start) => Opening,

            (Opening, CheckpointLoaded { checkpoint, now }) => {
                if checkpoint.age(now) > STALE_THRESHOLD {
                    GapProbe
                } else {
                    Streaming
                }
            }

            (GapProbe, OldestDeltaProbeFailed) => {
                warn!(collection = %self.collection, "gap probe timed out; continuing best-effort");
                Streaming
            }

            (Recovering, SnapshotFetched) => Streaming,
            (Recovering, NoSnapshotAvailable) => {
                return Err(Error::no_snapshot().with_collection(self.collection.clone()));
            }

            (Streaming, DeltaBatchApplied) => Streaming,
            (Streaming, NetworkDown) => Offline,

            (Offline, NetworkUp) => Opening,

            (_, UserClose) => Terminated,

            (state, _) => {
                return Err(Error::new(
                    ErrorKind::ProtocolMismatchError,
                    format!("invalid stream event for state {state:?}"),
                )
                .with_collection(self.collection.clone()));
            }
        })
    }

    /// Resolve a `GapProbe` once the caller has compared the probed oldest
    /// delta against the loaded checkpoint: if `cp.lastModified < t_oldest`
    /// the stream moves to `Recovering`, otherwise to `Streaming`.
    pub fn resolve_gap_probe(&mut self, checkpoint: Checkpoint, oldest: Timestamp) -> ClResult<TransitionLog> {
        if self.state != StreamState::GapProbe {
            return Err(Error::new(
                ErrorKind::ProtocolMismatchError,
                format!("resolve_gap_probe called outside GapProbe (state={:?})", self.state),
            )
            .with_collection(self.collection.clone()));
        }

        let from = self.state;
        self.state = if checkpoint.last_modified < oldest {
            StreamState::Recovering
        } else {
            StreamState::Streaming
        };

        let log = TransitionLog { collection: self.collection.clone(), from, to: self.state, at: Timestamp::now() };
        info!(collection = %log.collection, ?log.from, ?log.to, "stream state transition");
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> StreamStateMachine {
        StreamStateMachine::new(CollectionId::new("todos"))
    }

    #[test]
    fn fresh_checkpoint_goes_straight_to_streaming() {
        let mut m = machine();
        m.apply(StreamEvent::Start).unwrap();
        let now = Timestamp::now();
        let cp = Checkpoint { last_modified: now };
        let log = m.apply(StreamEvent::CheckpointLoaded { checkpoint: cp, now }).unwrap();
        assert_eq!(log.to, StreamState::Streaming);
    }

    #[test]
    fn stale_checkpoint_triggers_gap_probe() {
        let mut m = machine();
        m.apply(StreamEvent::Start).unwrap();
        let now = Timestamp::now();
        let cp = Checkpoint { last_modified: now.add_days(-30) };
        let log = m.apply(StreamEvent::CheckpointLoaded { checkpoint: cp, now }).unwrap();
        assert_eq!(log.to, StreamState::GapProbe);
    }

    #[test]
    fn gap_probe_resolves_to_recovering_when_checkpoint_predates_oldest() {
        let mut m = machine();
        m.apply(StreamEvent::Start).unwrap();
        let now = Timestamp::now();
        let cp = Checkpoint { last_modified: now.add_days(-30) };
        m.apply(StreamEvent::CheckpointLoaded { checkpoint: cp, now }).unwrap();

        let oldest = now.add_days(-5);
        let log = m.resolve_gap_probe(cp, oldest).unwrap();
        assert_eq!(log.to, StreamState::Recovering);
    }

    #[test]
    fn gap_probe_resolves_to_streaming_when_checkpoint_covers_oldest() {
        let mut m = machine();
        m.apply(StreamEvent::Start).unwrap();
        let now = Timestamp::now();
        let cp = Checkpoint { last_modified: now.add_days(-30) };
        m.apply(StreamEvent::CheckpointLoaded { checkpoint: cp, now }).unwrap();

        let oldest = now.add_days(-40);
        let log = m.resolve_gap_probe(cp, oldest).unwrap();
        assert_eq!(log.to, StreamState::Streaming);
    }

    #[test]
    fn recovering_without_snapshot_is_fatal_for_the_stream() {
        let mut m = machine();
        m.apply(StreamEvent::Start).unwrap();
        let now = Timestamp::now();
        let cp = Checkpoint { last_modified: now.add_days(-30) };
        m.apply(StreamEvent::CheckpointLoaded { checkpoint: cp, now }).unwrap();
        m.resolve_gap_probe(cp, now.add_days(-5)).unwrap();

        let err = m.apply(StreamEvent::NoSnapshotAvailable).unwrap_err();
        assert!(matches!(
            err.kind,
            ErrorKind::SnapshotError { reason: SnapshotErrorReason::NoSnapshot }
        ));
    }

    #[test]
    fn network_down_then_up_returns_to_opening() {
        let mut m = machine();
        m.apply(StreamEvent::Start).unwrap();
        let now = Timestamp::now();
        let cp = Checkpoint { last_modified: now };
        m.apply(StreamEvent::CheckpointLoaded { checkpoint: cp, now }).unwrap();
        m.apply(StreamEvent::DeltaBatchApplied).unwrap();
        let log = m.apply(StreamEvent::NetworkDown).unwrap();
        assert_eq!(log.to, StreamState::Offline);
        let log = m.apply(StreamEvent::NetworkUp).unwrap();
        assert_eq!(log.to, StreamState::Opening);
    }

    #[test]
    fn close_from_any_state_terminates() {
        let mut m = machine();
        m.apply(StreamEvent::Start).unwrap();
        let log = m.apply(StreamEvent::UserClose).unwrap();
        assert_eq!(log.to, StreamState::Terminated);
    }
}

// vim: ts=4
