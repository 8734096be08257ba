//! Two-client convergence: concurrent writers on different devices,
//! reconciling through the same backend, must converge on the same
//! materialized state once both have pulled every delta.

mod support;

use replicate_backend::CollectionConfig;
use replicate_client::engine::CollectionEngine;
use replicate_types::prelude::*;
use std::sync::Arc;
use support::{FakeBackend, MemoryKv, RecordingUiStore};

async fn open(
    backend: &Arc<FakeBackend>,
    collection: &CollectionId,
) -> CollectionEngine<FakeBackend, MemoryKv, RecordingUiStore> {
    let engine = CollectionEngine::open(
        Arc::clone(backend),
        Arc::new(MemoryKv::default()),
        RecordingUiStore::default(),
        CollectionConfig::new(collection.clone()),
    )
    .await
    .unwrap();
    engine.initialize();
    engine
}

#[tokio::test]
async fn two_devices_converge_on_each_others_writes() {
    let backend = Arc::new(FakeBackend::new());
    let collection = CollectionId::new("todos");

    let device_a = open(&backend, &collection).await;
    let device_b = open(&backend, &collection).await;

    // Bootstrap both streams against the empty log before either writes, so
    // neither treats checkpoint zero as a gap.
    device_a.run_once().await.unwrap();
    device_b.run_once().await.unwrap();

    device_a.insert(vec![("a".into(), serde_json::json!({"id": "a", "text": "from device a"}))]).await.unwrap();
    device_b.insert(vec![("b".into(), serde_json::json!({"id": "b", "text": "from device b"}))]).await.unwrap();

    // Each device's own write is visible locally before it ever reconciles.
    assert_eq!(device_a.materialize().await.len(), 1);
    assert_eq!(device_b.materialize().await.len(), 1);

    // Pull each device's writes into the other.
    device_a.run_once().await.unwrap();
    device_b.run_once().await.unwrap();
    device_a.run_once().await.unwrap();
    device_b.run_once().await.unwrap();

    let a_state = device_a.materialize().await;
    let b_state = device_b.materialize().await;
    assert_eq!(a_state.len(), 2);
    assert_eq!(b_state.len(), 2);
    assert_eq!(a_state.get("a" as &str).unwrap()["text"], "from device a");
    assert_eq!(a_state.get("b" as &str).unwrap()["text"], "from device b");
    assert_eq!(b_state.get("a" as &str).unwrap()["text"], "from device a");
    assert_eq!(b_state.get("b" as &str).unwrap()["text"], "from device b");
}

#[tokio::test]
async fn delete_on_one_device_reconciles_as_removal_on_the_other() {
    let backend = Arc::new(FakeBackend::new());
    let collection = CollectionId::new("todos");

    let device_a = open(&backend, &collection).await;
    let device_b = open(&backend, &collection).await;
    device_a.run_once().await.unwrap();
    device_b.run_once().await.unwrap();

    device_a.insert(vec![("a".into(), serde_json::json!({"id": "a", "text": "hi"}))]).await.unwrap();
    device_a.run_once().await.unwrap();
    device_b.run_once().await.unwrap();
    assert_eq!(device_b.materialize().await.len(), 1);

    device_a.delete(vec!["a".into()]).await.unwrap();
    device_a.run_once().await.unwrap();
    device_b.run_once().await.unwrap();

    assert!(device_b.materialize().await.is_empty());
    assert!(device_a.materialize().await.is_empty());
}

// vim: ts=4
