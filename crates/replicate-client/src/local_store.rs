//! Local persistent storage.
//!
//! The engine treats its local key-value store as the only resource shared
//! across collections and browser tabs; keys are namespaced
//! `checkpoint:<collection>` and `crdt:<collection>`.

use replicate_codec::CrdtDocument;
use replicate_types::error::LocalStoreOp;
use replicate_types::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Raw byte-oriented local key-value storage. A concrete implementation
/// (e.g. `replicate-local-store-redb`) backs this with an embedded database;
/// every higher-level store in this module is generic over it.
#[async_trait::async_trait]
pub trait LocalKv: Send + Sync {
    async fn get(&self, key: &str) -> ClResult<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8]) -> ClResult<()>;
    async fn delete(&self, key: &str) -> ClResult<()>;
}

/// Any `Arc<K>` is itself a valid [`LocalKv`]; lets the checkpoint store, the
/// CRDT store, and anything else that needs the same physical key-value
/// store share one instance instead of requiring `K: Clone`.
#[async_trait::async_trait]
impl<K: LocalKv> LocalKv for Arc<K> {
    async fn get(&self, key: &str) -> ClResult<Option<Vec<u8>>> {
        self.as_ref().get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> ClResult<()> {
        self.as_ref().set(key, value).await
    }

    async fn delete(&self, key: &str) -> ClResult<()> {
        self.as_ref().delete(key).await
    }
}

fn checkpoint_key(collection: &CollectionId) -> String {
    format!("checkpoint:{}", collection.as_str())
}

fn crdt_key(collection: &CollectionId) -> String {
    format!("crdt:{}", collection.as_str())
}

/// Per-collection `{lastModified}` cursor store.
pub struct CheckpointStore<K> {
    kv: K,
}

impl<K: LocalKv> CheckpointStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    pub async fn load(&self, collection: &CollectionId) -> ClResult<Checkpoint> {
        match self.kv.get(&checkpoint_key(collection)).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::local_store(LocalStoreOp::Get, checkpoint_key(collection)).with_cause(e)
            }),
            None => Ok(Checkpoint::ZERO),
        }
    }

    pub async fn save(&self, collection: &CollectionId, checkpoint: Checkpoint) -> ClResult<()> {
        let bytes = serde_json::to_vec(&checkpoint).map_err(|e| {
            Error::local_store(LocalStoreOp::Set, checkpoint_key(collection)).with_cause(e)
        })?;
        self.kv.set(&checkpoint_key(collection), &bytes).await
    }

    pub async fn clear(&self, collection: &CollectionId) -> ClResult<()> {
        self.kv.delete(&checkpoint_key(collection)).await
    }
}

/// One persistent CRDT document per collection, hydrated from local storage
/// on open and mutated in lockstep with remote deltas. This is the
/// authoritative local view: `materialize()` is what the optimistic store
/// and the rest of the UI ultimately reflect.
pub struct CrdtStore<K> {
    kv: K,
    doc: Arc<RwLock<CrdtDocument>>,
}

/// Name of the CRDT map that holds the current record set: `id -> record
/// JSON text`. `materialize()` derives the record set from this map,
/// treating a missing key as a tombstoned (deleted) id.
const RECORDS_MAP: &str = "records";

impl<K: LocalKv> CrdtStore<K> {
    /// Hydrate from whatever is persisted under `crdt:<collection>`, or start
    /// empty if nothing has been persisted yet.
    pub async fn open(kv: K, collection: &CollectionId) -> ClResult<Self> {
        let doc = match kv.get(&crdt_key(collection)).await? {
            Some(bytes) if !bytes.is_empty() => CrdtDocument::from_bytes(&bytes)?,
            _ => CrdtDocument::new(),
        };
        Ok(Self { kv, doc: Arc::new(RwLock::new(doc)) })
    }

    /// A clone of the shared document handle, so the optimistic write path
    /// can encode outgoing deltas against the very document
    /// [`CrdtStore::materialize`] reads back, giving local mutations
    /// read-your-own-writes without waiting on a round trip through the
    /// backend.
    pub fn doc_handle(&self) -> Arc<RwLock<CrdtDocument>> {
        Arc::clone(&self.doc)
    }

    /// `apply(bytes)`: merge a remote delta into the local doc.
    pub async fn apply(&self, update: &[u8]) -> ClResult<()> {
        self.doc.read().await.apply_update(update)
    }

    /// `snapshotTo(bytes)`: replace the local document's entire state, used
    /// after snapshot recovery.
    pub async fn snapshot_to(&self, snapshot_bytes: &[u8]) -> ClResult<()> {
        let replacement = CrdtDocument::from_bytes(snapshot_bytes)?;
        *self.doc.write().await = replacement;
        Ok(())
    }

    /// Persist the current document state under `crdt:<collection>`.
    pub async fn flush(&self, collection: &CollectionId) -> ClResult<()> {
        let bytes = self.doc.read().await.encode_snapshot();
        self.kv.set(&crdt_key(collection), &bytes).await
    }

    /// Encode an insert/update of `id` into the shared document, returning
    /// the delta bytes the backend's dual-write helpers expect.
    pub async fn upsert_record(&self, id: &str, value: &serde_json::Value) -> Vec<u8> {
        let record_json = value.to_string();
        let doc = self.doc.write().await;
        doc.mutate(|txn| {
            use yrs::Map;
            let map = doc.doc().get_or_insert_map(RECORDS_MAP);
            map.insert(txn, id, record_json.as_str());
        })
    }

    /// Remove `id` from the record set. Used both for locally-initiated
    /// deletes and for reconciling a remote tombstone delta: a delta whose
    /// `crdtBytes` is empty carries no forward state, so the only way to
    /// apply it is to drop the id from the materialized set.
    pub async fn remove_record(&self, id: &str) -> ClResult<()> {
        let doc = self.doc.write().await;
        doc.mutate(|txn| {
            use yrs::Map;
            let map = doc.doc().get_or_insert_map(RECORDS_MAP);
            map.remove(txn, id);
        });
        Ok(())
    }

    /// `materialize() -> Map<id, record>`: derives the current record set
    /// from the CRDT state, excluding tombstoned ids (i.e. ids absent from
    /// the `records` map).
    pub async fn materialize(&self) -> HashMap<DocumentId, serde_json::Value> {
        let doc = self.doc.read().await;
        let yrs_doc = doc.doc();
        let map = yrs_doc.get_or_insert_map(RECORDS_MAP);
        let txn = yrs_doc.transact();
        use yrs::Map;
        let mut out = HashMap::new();
        for (id, value) in map.iter(&txn) {
            let text = value.to_string(&txn);
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) {
                out.insert(DocumentId::from(id), json);
            }
        }
        out
    }

    pub async fn contains(&self, id: &str) -> bool {
        let doc = self.doc.read().await;
        let yrs_doc = doc.doc();
        let map = yrs_doc.get_or_insert_map(RECORDS_MAP);
        let txn = yrs_doc.transact();
        use yrs::Map;
        map.contains_key(&txn, id)
    }
}


// vim: ts=4
