//! Singleton registry: one engine instance per `(databaseName,
//! collectionName)`. Concurrent callers for the same key await the same
//! in-flight construction rather than building duplicates.

use dashmap::DashMap;
use replicate_types::prelude::*;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct RegistryKey {
    database: String,
    collection: String,
}

/// Process-wide map of `(databaseName, collectionName) -> engine instance`:
/// a concurrency-safe map from `(db, collection)` to a state
/// `{constructing | ready(instance)}`. `OnceCell` gives us exactly that
/// state machine per key: the first caller's future becomes the one every
/// concurrent caller awaits.
pub struct SingletonRegistry<T> {
    cells: DashMap<RegistryKey, Arc<OnceCell<Arc<T>>>>,
}

impl<T> Default for SingletonRegistry<T> {
    fn default() -> Self {
        Self { cells: DashMap::new() }
    }
}

impl<T: Send + Sync + 'static> SingletonRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the instance for `(database, collection)`, constructing it via
    /// `build` if this is the first call for that key. Concurrent callers
    /// for the same key observe the same construction and receive the same
    /// `Arc`.
    pub async fn get_or_init<F, Fut>(
        &self,
        database: &str,
        collection: &CollectionId,
        build: F,
    ) -> ClResult<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClResult<T>>,
    {
        let key = RegistryKey { database: database.to_string(), collection: collection.as_str().to_string() };
        let cell = self.cells.entry(key).or_insert_with(|| Arc::new(OnceCell::new())).clone();

        cell.get_or_try_init(|| async { build().await.map(Arc::new) })
            .await
            .map(Arc::clone)
    }

    /// `remove(db, coll)`: evict one instance so the next `get_or_init`
    /// call constructs a fresh one.
    pub fn remove(&self, database: &str, collection: &CollectionId) {
        let key = RegistryKey { database: database.to_string(), collection: collection.as_str().to_string() };
        self.cells.remove(&key);
    }

    /// `clear()`: drop every cached instance. Testing only.
    pub fn clear(&self) {
        self.cells.clear();
    }
}


// vim: ts=4
