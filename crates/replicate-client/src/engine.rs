//! Per-collection engine: wires the checkpoint store, CRDT store,
//! gap/recovery state machine, optimistic write path, and a
//! [`BackendAdapter`] into the single object a collection factory hands back
//! to the application.
//!
//! This is the object [`crate::registry::SingletonRegistry`] keys on
//! `(databaseName, collectionName)`. The control flow: the client bootstraps
//! protocol + checkpoint + CRDT store, opens a reactive stream, and on each
//! delta batch decodes, merges into the CRDT document, reconciles into the
//! optimistic store, and advances the checkpoint.

use crate::local_store::{CheckpointStore, CrdtStore, LocalKv};
use crate::optimistic::{MutationOp, OptimisticStore, OptimisticWritePath};
use crate::protocol::{Migration, ProtocolCoordinator, SERVER_CALL_TIMEOUT};
use crate::recovery::{StreamEvent, StreamState, StreamStateMachine, GAP_PROBE_TIMEOUT, RECOVERY_BUDGET};
use crate::retry::{with_retry, with_timeout};
use replicate_backend::{BackendAdapter, CollectionConfig, CronSchedule, StreamOptions, StreamOrder};
use replicate_types::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Poll interval while the stream is actively applying deltas.
pub const ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Poll interval once a batch comes back empty.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// One collection's engine instance. Generic over the three external
/// collaborators this engine integrates with but does not itself own: the
/// backend platform (`B`), the local key-value store (`K`), and the UI's
/// optimistic store (`S`).
pub struct CollectionEngine<B, K, S> {
    collection: CollectionId,
    backend: Arc<B>,
    kv: Arc<K>,
    checkpoints: CheckpointStore<Arc<K>>,
    crdt: CrdtStore<Arc<K>>,
    writer: OptimisticWritePath<S, B>,
    state: Mutex<StreamStateMachine>,
    config: CollectionConfig,
}

impl<B, K, S> CollectionEngine<B, K, S>
where
    B: BackendAdapter + 'static,
    K: LocalKv + 'static,
    S: OptimisticStore,
{
    /// Bootstrap a collection: hydrate the CRDT document and checkpoint from
    /// local storage, then wire the optimistic write path
    /// against the same CRDT document so local mutations are reflected by
    /// [`CollectionEngine::materialize`] immediately, without waiting on a
    /// round trip through the backend.
    pub async fn open(
        backend: Arc<B>,
        kv: Arc<K>,
        optimistic_store: S,
        config: CollectionConfig,
    ) -> ClResult<Self> {
        let collection = config.collection.clone();
        let checkpoints = CheckpointStore::new(Arc::clone(&kv));
        let crdt = CrdtStore::open(Arc::clone(&kv), &collection).await?;
        let writer = OptimisticWritePath::with_shared_crdt(
            optimistic_store,
            Arc::clone(&backend),
            collection.clone(),
            crdt.doc_handle(),
        );

        Ok(Self {
            collection: collection.clone(),
            backend,
            kv,
            checkpoints,
            crdt,
            writer,
            state: Mutex::new(StreamStateMachine::new(collection)),
            config,
        })
    }

    pub fn collection(&self) -> &CollectionId {
        &self.collection
    }

    pub async fn state(&self) -> StreamState {
        self.state.lock().await.state()
    }

    /// Mark the optimistic write path ready for mutation. Idempotent; call
    /// once bootstrapping (local hydration, initial
    /// `materialize()`) has completed.
    pub fn initialize(&self) {
        self.writer.initialize();
    }

    pub async fn insert(&self, items: Vec<(DocumentId, serde_json::Value)>) -> ClResult<()> {
        self.writer.insert(items).await
    }

    pub async fn update(&self, items: Vec<(DocumentId, serde_json::Value)>) -> ClResult<()> {
        self.writer.update(items).await
    }

    pub async fn delete(&self, ids: Vec<DocumentId>) -> ClResult<()> {
        self.writer.delete(ids).await
    }

    pub async fn upsert(&self, items: Vec<(DocumentId, serde_json::Value)>) -> ClResult<()> {
        self.writer.upsert(items).await
    }

    /// The current materialized record set, the authoritative local view
    /// every read in the application ultimately derives from.
    pub async fn materialize(&self) -> std::collections::HashMap<DocumentId, serde_json::Value> {
        self.crdt.materialize().await
    }

    /// Protocol-version negotiation. Blocks startup; run this before opening
    /// the reconciliation loop. `migrations` are the ordered, named
    /// procedures registered at compile time — the call site is that
    /// registration point.
    #[instrument(skip(self, migrations), fields(collection = %self.collection))]
    pub async fn negotiate_protocol(&self, migrations: Vec<Arc<dyn Migration>>) -> ClResult<u32> {
        let backend = Arc::clone(&self.backend);
        let mut coordinator = ProtocolCoordinator::new(Arc::clone(&self.kv), move || {
            let backend = Arc::clone(&backend);
            Box::pin(async move {
                with_timeout(SERVER_CALL_TIMEOUT, async { backend.get_protocol_version().await }).await
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ClResult<u32>> + Send>>
        });
        for migration in migrations {
            coordinator = coordinator.register(migration);
        }
        coordinator.startup().await
    }

    /// Spawn the backend-side compaction and pruning jobs for this
    /// collection, using this collection's configured retention days.
    pub fn spawn_scheduled_jobs(
        &self,
        compaction_schedule: CronSchedule,
        pruning_schedule: CronSchedule,
    ) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let backend: Arc<dyn BackendAdapter> = Arc::clone(&self.backend);
        let compaction = replicate_backend::spawn_compaction_job(
            Arc::clone(&backend),
            self.collection.clone(),
            self.config.compaction_retention_days,
            compaction_schedule,
        );
        let pruning = replicate_backend::spawn_pruning_job(
            backend,
            self.collection.clone(),
            self.config.pruning_retention_days,
            pruning_schedule,
        );
        (compaction, pruning)
    }

    /// Run the full gap-detection/recovery/streaming cycle once. Returns
    /// after applying (at most) one delta batch, or after recovering from a
    /// gap. Callers that want a running subscription should use
    /// [`CollectionEngine::run_forever`].
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn run_once(&self) -> ClResult<RunOutcome> {
        if self.state().await == StreamState::Terminated {
            return Ok(RunOutcome::Applied { count: 0 });
        }

        {
            let mut state = self.state.lock().await;
            match state.state() {
                StreamState::Idle => {
                    state.apply(StreamEvent::Start)?;
                }
                StreamState::Offline => {
                    state.apply(StreamEvent::NetworkUp)?;
                }
                _ => {}
            }
        }

        let checkpoint = self.checkpoints.load(&self.collection).await?;
        let now = Timestamp::now();
        {
            let mut state = self.state.lock().await;
            if state.state() == StreamState::Opening {
                state.apply(StreamEvent::CheckpointLoaded { checkpoint, now })?;
            }
        }

        if self.state().await == StreamState::GapProbe {
            self.run_gap_probe(checkpoint).await?;
        }

        if self.state().await == StreamState::Recovering {
            self.run_recovery().await?;
            return Ok(RunOutcome::Recovered);
        }

        self.pull_and_reconcile().await
    }

    /// Poll [`CollectionEngine::run_once`] forever, adapting the interval
    /// between active and idle cadence, and retrying transient failures with
    /// a backoff schedule rather than propagating them (a single polling
    /// failure must not kill the loop).
    pub async fn run_forever(&self) {
        loop {
            let outcome = with_retry(|| async {
                match self.run_once().await {
                    Err(e) if e.is_retryable() => {
                        warn!(collection = %self.collection, "reconciliation loop retrying after: {e}");
                        let mut state = self.state.lock().await;
                        if state.state() != StreamState::Offline {
                            if let Err(transition_err) = state.apply(StreamEvent::NetworkDown) {
                                warn!(
                                    collection = %self.collection,
                                    "could not record offline transition for retryable error: {transition_err}"
                                );
                            }
                        }
                        Err(e)
                    }
                    other => other,
                }
            })
            .await;

            match outcome {
                Ok(RunOutcome::Applied { count }) if count > 0 => {
                    tokio::time::sleep(ACTIVE_POLL_INTERVAL).await;
                }
                Ok(_) => {
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                }
                Err(e) => {
                    warn!(collection = %self.collection, "reconciliation loop stopping on fatal error: {e}");
                    return;
                }
            }
        }
    }

    async fn run_gap_probe(&self, checkpoint: Checkpoint) -> ClResult<()> {
        let probe = with_timeout(
            GAP_PROBE_TIMEOUT,
            self.backend.stream(
                &self.collection,
                StreamOptions {
                    checkpoint: Checkpoint::ZERO,
                    limit: Some(1),
                    order: StreamOrder::Asc,
                    snapshot_mode: false,
                },
            ),
        )
        .await;

        match probe {
            Ok(result) if !result.changes.is_empty() => {
                let oldest = result.changes[0].timestamp;
                let mut state = self.state.lock().await;
                state.resolve_gap_probe(checkpoint, oldest)?;
            }
            Ok(_) => {
                // No live delta at all: the log may simply be empty (a
                // genuinely fresh collection, no gap), or everything before
                // some point may have been folded into a snapshot (a real
                // gap). Use the snapshot's watermark as the effective
                // oldest-retained-point in the latter case.
                let snapshot_probe = with_timeout(
                    GAP_PROBE_TIMEOUT,
                    self.backend.stream(
                        &self.collection,
                        StreamOptions {
                            checkpoint: Checkpoint::ZERO,
                            limit: None,
                            order: StreamOrder::Asc,
                            snapshot_mode: true,
                        },
                    ),
                )
                .await;
                let oldest = match snapshot_probe {
                    Ok(snapshot_result) => {
                        snapshot_result.changes.first().map(|d| d.timestamp).unwrap_or(Timestamp::ZERO)
                    }
                    Err(_) => Timestamp::ZERO,
                };
                let mut state = self.state.lock().await;
                state.resolve_gap_probe(checkpoint, oldest)?;
            }
            Err(e) => {
                debug!(collection = %self.collection, "gap probe failed or timed out: {e}");
                let mut state = self.state.lock().await;
                state.apply(StreamEvent::OldestDeltaProbeFailed)?;
            }
        }
        Ok(())
    }

    async fn run_recovery(&self) -> ClResult<()> {
        let fetched = with_timeout(
            RECOVERY_BUDGET,
            self.backend.stream(
                &self.collection,
                StreamOptions {
                    checkpoint: Checkpoint::ZERO,
                    limit: None,
                    order: StreamOrder::Asc,
                    snapshot_mode: true,
                },
            ),
        )
        .await;

        let result = match fetched {
            Ok(result) => result,
            Err(e) => {
                let mut state = self.state.lock().await;
                state.apply(StreamEvent::NoSnapshotAvailable)?;
                return Err(e);
            }
        };

        let snapshot_delta = match result.changes.first() {
            Some(delta) => delta,
            None => {
                let mut state = self.state.lock().await;
                state.apply(StreamEvent::NoSnapshotAvailable)?;
                return Err(Error::no_snapshot().with_collection(self.collection.clone()));
            }
        };

        self.crdt.snapshot_to(&snapshot_delta.crdt_bytes).await?;
        let records = self.crdt.materialize().await;
        self.writer.replace(records.into_iter().collect()).await?;
        self.checkpoints
            .save(&self.collection, Checkpoint { last_modified: snapshot_delta.timestamp })
            .await?;
        self.crdt.flush(&self.collection).await?;

        let mut state = self.state.lock().await;
        state.apply(StreamEvent::SnapshotFetched)?;
        info!(collection = %self.collection, "recovered from gap via snapshot");
        Ok(())
    }

    /// Pull one delta batch and reconcile it into the CRDT store and the
    /// optimistic UI store: apply deltas to the CRDT document in received
    /// order, then push insert/update/delete into the optimistic
    /// store for every document whose materialized view changed.
    async fn pull_and_reconcile(&self) -> ClResult<RunOutcome> {
        let checkpoint = self.checkpoints.load(&self.collection).await?;
        let result = self.backend.pull_changes(&self.collection, checkpoint, None).await?;

        if result.changes.is_empty() {
            let mut state = self.state.lock().await;
            state.apply(StreamEvent::DeltaBatchApplied)?;
            return Ok(RunOutcome::Applied { count: 0 });
        }

        let store = self.writer.optimistic_store();
        store.begin().await?;
        for delta in &result.changes {
            if delta.is_snapshot_sentinel() {
                continue;
            }
            if delta.crdt_bytes.is_empty() {
                self.crdt.remove_record(&delta.document_id).await?;
                store.write(MutationOp::Delete(delta.document_id.clone())).await?;
            } else {
                let existed = self.crdt.contains(&delta.document_id).await;
                self.crdt.apply(&delta.crdt_bytes).await?;
                let op = if existed { MutationOp::Update } else { MutationOp::Insert };
                if let Some(value) = self.crdt.materialize().await.remove(&delta.document_id) {
                    store.write(op(value)).await?;
                }
            }
        }
        store.commit().await?;
        self.crdt.flush(&self.collection).await?;

        self.checkpoints.save(&self.collection, result.checkpoint).await?;
        {
            let mut state = self.state.lock().await;
            state.apply(StreamEvent::DeltaBatchApplied)?;
        }

        Ok(RunOutcome::Applied { count: result.changes.len() })
    }

    /// Close the collection: flush the CRDT document to local storage
    /// before in-flight awaits are abandoned.
    pub async fn close(&self) -> ClResult<()> {
        self.crdt.flush(&self.collection).await?;
        let mut state = self.state.lock().await;
        state.apply(StreamEvent::UserClose)?;
        Ok(())
    }
}

/// Result of one [`CollectionEngine::run_once`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Applied a (possibly empty) delta batch during normal streaming.
    Applied { count: usize },
    /// Recovered from a gap via snapshot; caller should re-poll immediately.
    Recovered,
}

// vim: ts=4
