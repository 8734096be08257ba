//! Quantified invariants checked against a real `redb` file: version/log
//! monotonicity for one document, and the prefix relation on `pull`.

use proptest::prelude::*;
use replicate_backend::{BackendAdapter, InsertRequest, UpdateRequest};
use replicate_backend_adapter_redb::{AdapterConfig, RedbBackendAdapter};
use replicate_types::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Update,
    Delete,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Update), Just(Op::Delete)]
}

async fn adapter() -> (tempfile::TempDir, RedbBackendAdapter) {
    let dir = tempfile::tempdir().unwrap();
    let adapter = RedbBackendAdapter::new(
        dir.path().join("backend.redb"),
        AdapterConfig { auto_evict: false, ..AdapterConfig::default() },
    )
    .await
    .unwrap();
    (dir, adapter)
}

proptest! {
    /// A sequence of insert, then update-or-delete-and-reinsert on one
    /// document: the log always has exactly as many entries as accepted
    /// mutations, strictly increasing in `(version, timestamp)`, and the
    /// final materialized row (if any) matches the last accepted version.
    #[test]
    fn log_grows_one_entry_per_accepted_mutation(ops in prop::collection::vec(op_strategy(), 0..20)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (_dir, adapter) = adapter().await;
            let collection = CollectionId::new("todos");

            adapter.insert(&collection, InsertRequest {
                id: "a".into(),
                crdt_bytes: Vec::new(),
                materialized: serde_json::json!({"id": "a"}),
            }).await.unwrap();

            let mut accepted = 1usize;
            let mut version = 1u64;
            let mut live = true;

            for op in ops {
                match op {
                    Op::Update if live => {
                        version += 1;
                        adapter.update(&collection, UpdateRequest {
                            id: "a".into(),
                            crdt_bytes: Vec::new(),
                            materialized: serde_json::json!({"id": "a"}),
                            version,
                        }).await.unwrap();
                        accepted += 1;
                    }
                    Op::Update => {
                        // Stale update against a deleted document is rejected
                        // (no materialized row to version-check against) and
                        // contributes no log entry.
                        let result = adapter.update(&collection, UpdateRequest {
                            id: "a".into(),
                            crdt_bytes: Vec::new(),
                            materialized: serde_json::json!({"id": "a"}),
                            version: version + 1,
                        }).await;
                        prop_assert!(result.is_err());
                    }
                    Op::Delete if live => {
                        version += 1;
                        adapter.delete(&collection, "a").await.unwrap();
                        accepted += 1;
                        live = false;
                    }
                    Op::Delete => {
                        // Deleting an already-deleted id still appends a
                        // tombstone (the backend does not require the id to
                        // currently exist), continuing the id's version
                        // lineage from the log rather than the (now absent)
                        // materialized row.
                        version += 1;
                        adapter.delete(&collection, "a").await.unwrap();
                        accepted += 1;
                    }
                }
            }

            let log = adapter.pull_changes(&collection, Checkpoint::ZERO, None).await.unwrap();
            prop_assert_eq!(log.changes.len(), accepted);

            let mut last = (0u64, Timestamp::ZERO);
            for delta in &log.changes {
                prop_assert!((delta.version, delta.timestamp) > last);
                last = (delta.version, delta.timestamp);
            }

            // The backend's own version lineage must match what this test
            // independently tracked, through any number of repeated deletes.
            prop_assert_eq!(log.changes.last().unwrap().version, version);

            if live {
                let rows = adapter.export_all(&collection).await.unwrap();
                prop_assert_eq!(rows.len(), 1);
                prop_assert_eq!(rows[0].version, version);
            } else {
                prop_assert!(adapter.export_all(&collection).await.unwrap().is_empty());
            }
        });
    }

    /// `pull(cp1) ⊇ pull(cp2) ⊇ pull(cp3)` for any three checkpoints drawn
    /// from a fixed sequence of deltas, in ascending order.
    #[test]
    fn pull_is_a_prefix_relation_across_checkpoints(
        count in 3usize..15,
        cut1 in 0usize..3,
        cut2 in 0usize..3,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (_dir, adapter) = adapter().await;
            let collection = CollectionId::new("todos");

            for i in 0..count {
                adapter.insert(&collection, InsertRequest {
                    id: format!("doc-{i}").into(),
                    crdt_bytes: Vec::new(),
                    materialized: serde_json::json!({"id": format!("doc-{i}")}),
                }).await.unwrap();
            }

            let all = adapter.pull_changes(&collection, Checkpoint::ZERO, None).await.unwrap().changes;
            let cp_at = |n: usize| all.get(n.saturating_sub(1)).map(|d| Checkpoint { last_modified: d.timestamp }).unwrap_or(Checkpoint::ZERO);

            let i1 = cut1.min(all.len());
            let i2 = (i1 + cut2).min(all.len());
            let cp1 = cp_at(i1);
            let cp2 = cp_at(i2);

            let pull1 = adapter.pull_changes(&collection, cp1, None).await.unwrap().changes;
            let pull2 = adapter.pull_changes(&collection, cp2, None).await.unwrap().changes;

            // cp1 <= cp2 (by construction, i1 <= i2), so pull1 must be a
            // superset-as-suffix: everything pull2 returns is also in pull1,
            // in the same relative order.
            prop_assert!(pull1.len() >= pull2.len());
            let offset = pull1.len() - pull2.len();
            for (a, b) in pull1[offset..].iter().zip(pull2.iter()) {
                prop_assert_eq!(&a.document_id, &b.document_id);
                prop_assert_eq!(a.version, b.version);
            }
        });
    }
}

// vim: ts=4
