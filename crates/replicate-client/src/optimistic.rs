//! Optimistic write path: the UI-facing primitive plus the typed
//! insert/update/delete/upsert/replace wrappers that also submit a CRDT
//! delta to the backend.

use replicate_backend::{BackendAdapter, InsertRequest, UpdateRequest};
use replicate_codec::CrdtDocument;
use replicate_types::error::OptimisticWriteErrorReason;
use replicate_types::prelude::*;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

/// One optimistic mutation, as the UI reactivity layer's store understands it.
#[derive(Clone, Debug)]
pub enum MutationOp {
    Insert(serde_json::Value),
    Update(serde_json::Value),
    Delete(DocumentId),
}

/// The host's optimistic UI store primitive: `begin`/`write`/`commit`
/// bracket a batch of optimistic writes; `truncate` clears the store
/// entirely and is used only during snapshot recovery.
#[async_trait::async_trait]
pub trait OptimisticStore: Send + Sync {
    async fn begin(&self) -> ClResult<()>;
    async fn write(&self, op: MutationOp) -> ClResult<()>;
    async fn commit(&self) -> ClResult<()>;
    async fn truncate(&self) -> ClResult<()>;
}

/// Wraps a [`BackendAdapter`] + [`OptimisticStore`] + [`CrdtDocument`] with
/// the insert/update/delete/upsert/replace operations. Mutations block on
/// `initializedPromise`; calling one before
/// [`OptimisticWritePath::initialize`] has completed returns
/// `OptimisticWriteError{NotInitialized}` rather than hanging forever.
pub struct OptimisticWritePath<S, B> {
    store: S,
    backend: Arc<B>,
    collection: CollectionId,
    crdt: Arc<RwLock<CrdtDocument>>,
    versions: RwLock<std::collections::HashMap<DocumentId, u64>>,
    initialized: Notify,
    ready: std::sync::atomic::AtomicBool,
}

impl<S: OptimisticStore, B: BackendAdapter> OptimisticWritePath<S, B> {
    /// Build a write path with its own, unshared CRDT document. Fine for a
    /// write path used in isolation (e.g. tests); a live collection should
    /// use [`OptimisticWritePath::with_shared_crdt`] so local writes and the
    /// reconciliation loop encode against the same document
    /// [`crate::local_store::CrdtStore::materialize`] reads back.
    pub fn new(store: S, backend: Arc<B>, collection: CollectionId) -> Self {
        Self::with_shared_crdt(store, backend, collection, Arc::new(RwLock::new(CrdtDocument::new())))
    }

    /// Build a write path that encodes its outgoing deltas against an
    /// externally-owned document, typically the one backing a collection's
    /// [`crate::local_store::CrdtStore`].
    pub fn with_shared_crdt(
        store: S,
        backend: Arc<B>,
        collection: CollectionId,
        crdt: Arc<RwLock<CrdtDocument>>,
    ) -> Self {
        Self {
            store,
            backend,
            collection,
            crdt,
            versions: RwLock::new(std::collections::HashMap::new()),
            initialized: Notify::new(),
            ready: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Mark the path ready for mutation. Idempotent: calling this more than
    /// once (e.g. after a reconnect re-hydration) is harmless.
    pub fn initialize(&self) {
        self.ready.store(true, std::sync::atomic::Ordering::SeqCst);
        self.initialized.notify_waiters();
    }

    /// The underlying UI optimistic store, exposed so the reconciliation
    /// loop can drive `begin`/`write`/`commit` for deltas it reconciles from
    /// the backend rather than from a local mutation.
    pub fn optimistic_store(&self) -> &S {
        &self.store
    }

    fn require_initialized(&self) -> ClResult<()> {
        if self.ready.load(std::sync::atomic::Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::optimistic_not_initialized())
        }
    }

    pub async fn insert(&self, items: Vec<(DocumentId, serde_json::Value)>) -> ClResult<()> {
        self.require_initialized()?;
        self.store.begin().await?;
        for (_, value) in &items {
            self.store.write(MutationOp::Insert(value.clone())).await?;
        }
        self.store.commit().await?;

        for (id, value) in items {
            let crdt_bytes = {
                let crdt = self.crdt.write().await;
                encode_record_delta(&crdt, &id, &value)
            };
            self.backend
                .insert(
                    &self.collection,
                    InsertRequest { id: id.clone(), crdt_bytes, materialized: value },
                )
                .await?;
            self.versions.write().await.insert(id, 1);
        }
        Ok(())
    }

    pub async fn update(&self, items: Vec<(DocumentId, serde_json::Value)>) -> ClResult<()> {
        self.require_initialized()?;
        self.store.begin().await?;
        for (_, value) in &items {
            self.store.write(MutationOp::Update(value.clone())).await?;
        }
        self.store.commit().await?;

        for (id, value) in items {
            let current = *self.versions.read().await.get(&id).unwrap_or(&0);
            let next_version = current + 1;
            let crdt_bytes = {
                let crdt = self.crdt.write().await;
                encode_record_delta(&crdt, &id, &value)
            };
            self.backend
                .update(
                    &self.collection,
                    UpdateRequest { id: id.clone(), crdt_bytes, materialized: value, version: next_version },
                )
                .await?;
            self.versions.write().await.insert(id, next_version);
        }
        Ok(())
    }

    pub async fn delete(&self, ids: Vec<DocumentId>) -> ClResult<()> {
        self.require_initialized()?;
        self.store.begin().await?;
        for id in &ids {
            self.store.write(MutationOp::Delete(id.clone())).await?;
        }
        self.store.commit().await?;

        for id in ids {
            self.backend.delete(&self.collection, &id).await?;
            self.versions.write().await.remove(&id);
            remove_record(&self.crdt, &id).await;
        }
        Ok(())
    }

    /// `upsert(items)`: optimistic `type=update`; server resolves to insert
    /// if absent, update if present.
    pub async fn upsert(&self, items: Vec<(DocumentId, serde_json::Value)>) -> ClResult<()> {
        self.require_initialized()?;
        self.store.begin().await?;
        for (_, value) in &items {
            self.store.write(MutationOp::Update(value.clone())).await?;
        }
        self.store.commit().await?;

        for (id, value) in items {
            let current = self.versions.read().await.get(&id).copied();
            let crdt_bytes = {
                let crdt = self.crdt.write().await;
                encode_record_delta(&crdt, &id, &value)
            };
            let delta = match current {
                Some(version) => {
                    self.backend
                        .update(
                            &self.collection,
                            UpdateRequest { id: id.clone(), crdt_bytes, materialized: value, version: version + 1 },
                        )
                        .await?
                }
                None => {
                    self.backend
                        .insert(&self.collection, InsertRequest { id: id.clone(), crdt_bytes, materialized: value })
                        .await?
                }
            };
            self.versions.write().await.insert(id, delta.version);
        }
        Ok(())
    }

    /// `replace(items)`: used only during snapshot recovery. Truncates the
    /// optimistic store and re-populates it without any corresponding
    /// backend call.
    pub async fn replace(&self, items: Vec<(DocumentId, serde_json::Value)>) -> ClResult<()> {
        self.require_initialized()?;
        self.store.truncate().await?;
        self.store.begin().await?;
        for (_, value) in &items {
            self.store.write(MutationOp::Insert(value.clone())).await?;
        }
        self.store.commit().await?;
        Ok(())
    }
}

fn encode_record_delta(crdt: &CrdtDocument, id: &str, value: &serde_json::Value) -> Vec<u8> {
    let record_json = value.to_string();
    crdt.mutate(|txn| {
        let map = crdt.doc().get_or_insert_map("records");
        use yrs::Map;
        map.insert(txn, id, record_json.as_str());
    })
}

/// Drop `id` from the shared document's record set so `materialize()`
/// reflects a local delete immediately, without waiting for the tombstone
/// delta to round-trip through the backend.
async fn remove_record(crdt: &RwLock<CrdtDocument>, id: &str) {
    let crdt = crdt.write().await;
    crdt.mutate(|txn| {
        let map = crdt.doc().get_or_insert_map("records");
        use yrs::Map;
        map.remove(txn, id);
    });
}


// vim: ts=4
