//! Binary codec wrapping a single CRDT document.
//!
//! Every encode/decode operation here treats `crdt_bytes` as opaque: the
//! engine never inspects a document's internal shape, only its
//! Yjs-compatible update/state-vector wire format.

use replicate_types::error::{ClResult, CodecOp};
use replicate_types::prelude::Error;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

/// A live Yjs-compatible CRDT document plus the codec operations needed to
/// ship and replay its updates. Wraps a bare [`yrs::Doc`]; callers reach into it with
/// [`CrdtDocument::transact_mut`] to make edits, then capture the delta with
/// [`CrdtDocument::encode_update_since`].
pub struct CrdtDocument {
    doc: Doc,
}

impl Default for CrdtDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl CrdtDocument {
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Rehydrate a document from a previously captured snapshot or the
    /// concatenation of its full update history.
    pub fn from_bytes(bytes: &[u8]) -> ClResult<Self> {
        let doc = CrdtDocument::new();
        doc.apply_update(bytes)?;
        Ok(doc)
    }

    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Run `f` against a mutable transaction and return the delta it produced,
    /// encoded as an update (empty if `f` made no change). This is the
    /// "capture just this mutation" pattern: take the state vector before
    /// mutating, diff against it after.
    pub fn mutate(&self, f: impl FnOnce(&mut yrs::TransactionMut)) -> Vec<u8> {
        let sv_before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            f(&mut txn);
        }
        self.encode_diff_since(&sv_before.encode_v1())
            .expect("state vector just captured from this document always decodes")
    }

    /// `encodeUpdate`: the full document state as a single update, suitable
    /// for a fresh compaction snapshot.
    pub fn encode_snapshot(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// `encodeStateVector`: this document's current state vector, sent by a
    /// client probing for a diff.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// `encodeDiffSince`: the update needed to bring a peer at
    /// `remote_state_vector` up to this document's current state.
    pub fn encode_diff_since(&self, remote_state_vector: &[u8]) -> ClResult<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_state_vector).map_err(|e| {
            Error::codec(CodecOp::Decode, format!("malformed state vector: {e}"))
        })?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// `applyUpdate`: merge a remote update (or a stored delta replayed from
    /// the log) into this document. A no-op update decodes and applies
    /// cleanly, contributing nothing — this is what makes replay idempotent.
    pub fn apply_update(&self, update: &[u8]) -> ClResult<()> {
        let decoded = Update::decode_v1(update)
            .map_err(|e| Error::codec(CodecOp::Decode, format!("malformed update: {e}")))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded).map_err(|e| {
            Error::codec(CodecOp::Decode, format!("update rejected by document: {e}"))
        })?;
        Ok(())
    }

    /// Replay a sequence of stored deltas in log order, e.g. when
    /// reconstructing a document from its full history rather than a
    /// snapshot. Each update is applied independently, so gaps between
    /// updates that don't causally depend on one another are tolerated.
    pub fn apply_updates<'a>(&self, updates: impl IntoIterator<Item = &'a [u8]>) -> ClResult<()> {
        for update in updates {
            self.apply_update(update)?;
        }
        Ok(())
    }
}


// vim: ts=4
