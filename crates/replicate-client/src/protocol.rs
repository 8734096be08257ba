//! Protocol-version coordinator.
//!
//! Negotiates a numeric protocol version on startup and runs ordered,
//! one-way migrations over locally persisted state. Startup blocks on this;
//! failure is fatal, since the rest of the engine assumes migrated state.

use crate::local_store::LocalKv;
use crate::retry::with_timeout;
use replicate_types::error::LocalStoreOp;
use replicate_types::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const PROTOCOL_VERSION_KEY: &str = "protocolVersion";
/// Per-call timeout for the server version fetch.
pub const SERVER_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// A single named, one-way migration from version `n-1` to version `n`.
#[async_trait::async_trait]
pub trait Migration: Send + Sync {
    fn name(&self) -> &str;
    /// The version this migration produces once applied.
    fn target_version(&self) -> u32;
    async fn run(&self) -> ClResult<()>;
}

/// Runs registered migrations in ascending `target_version` order and
/// persists the resulting local version.
pub struct ProtocolCoordinator<K, F> {
    kv: K,
    fetch_server_version: F,
    migrations: BTreeMap<u32, Arc<dyn Migration>>,
}

impl<K, F> ProtocolCoordinator<K, F>
where
    K: LocalKv,
    F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = ClResult<u32>> + Send>>,
{
    pub fn new(kv: K, fetch_server_version: F) -> Self {
        Self { kv, fetch_server_version, migrations: BTreeMap::new() }
    }

    /// Register a migration. Migrations are registered at construction time,
    /// run in `target_version` order regardless of registration order.
    pub fn register(mut self, migration: Arc<dyn Migration>) -> Self {
        self.migrations.insert(migration.target_version(), migration);
        self
    }

    async fn local_version(&self) -> ClResult<u32> {
        match self.kv.get(PROTOCOL_VERSION_KEY).await? {
            Some(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                text.parse::<u32>().map_err(|e| {
                    Error::local_store(LocalStoreOp::Get, PROTOCOL_VERSION_KEY).with_cause(e)
                })
            }
            None => Ok(1),
        }
    }

    async fn persist_version(&self, version: u32) -> ClResult<()> {
        self.kv.set(PROTOCOL_VERSION_KEY, version.to_string().as_bytes()).await
    }

    /// Run the startup protocol negotiation. Idempotent: calling this again
    /// after a successful run is a no-op.
    pub async fn startup(&self) -> ClResult<u32> {
        let local = self.local_version().await?;
        let server = with_timeout(SERVER_CALL_TIMEOUT, (self.fetch_server_version)()).await?;

        match server.cmp(&local) {
            std::cmp::Ordering::Equal => Ok(local),
            std::cmp::Ordering::Less => {
                warn!(server, local, "server protocol version is older than local; not downgrading");
                self.persist_version(server).await?;
                Ok(local)
            }
            std::cmp::Ordering::Greater => {
                for version in (local + 1)..=server {
                    let migration = self.migrations.get(&version).ok_or_else(|| {
                        Error::protocol_mismatch(format!(
                            "no migration registered to reach protocol version {version}"
                        ))
                    })?;
                    info!(name = migration.name(), version, "running protocol migration");
                    migration.run().await.map_err(|e| {
                        Error::protocol_mismatch(format!(
                            "migration {} to v{version} failed: {e}",
                            migration.name()
                        ))
                    })?;
                    self.persist_version(version).await?;
                }
                Ok(server)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct MemoryKv {
        data: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MemoryKv {
        fn new() -> Self {
            Self { data: Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait::async_trait]
    impl LocalKv for MemoryKv {
        async fn get(&self, key: &str) -> ClResult<Option<Vec<u8>>> {
            Ok(self.data.lock().await.get(key).cloned())
        }

        async fn set(&self, key: &str, value: &[u8]) -> ClResult<()> {
            self.data.lock().await.insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn delete(&self, key: &str) -> ClResult<()> {
            self.data.lock().await.remove(key);
            Ok(())
        }
    }

    struct CountingMigration {
        name: &'static str,
        target: u32,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Migration for CountingMigration {
        fn name(&self) -> &str {
            self.name
        }

        fn target_version(&self) -> u32 {
            self.target
        }

        async fn run(&self) -> ClResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fetcher(version: u32) -> impl Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = ClResult<u32>> + Send>> {
        move || Box::pin(async move { Ok(version) })
    }

    #[tokio::test]
    async fn equal_versions_are_a_no_op() {
        let coordinator = ProtocolCoordinator::new(MemoryKv::new(), fetcher(1));
        assert_eq!(coordinator.startup().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn newer_server_runs_migrations_in_order() {
        let runs = Arc::new(AtomicUsize::new(0));
        let coordinator = ProtocolCoordinator::new(MemoryKv::new(), fetcher(3))
            .register(Arc::new(CountingMigration { name: "v2", target: 2, runs: Arc::clone(&runs) }))
            .register(Arc::new(CountingMigration { name: "v3", target: 3, runs: Arc::clone(&runs) }));

        let version = coordinator.startup().await.unwrap();
        assert_eq!(version, 3);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeat_startup_after_migration_is_a_no_op() {
        let runs = Arc::new(AtomicUsize::new(0));
        let kv = MemoryKv::new();
        kv.set(PROTOCOL_VERSION_KEY, b"2").await.unwrap();
        let coordinator = ProtocolCoordinator::new(kv, fetcher(2))
            .register(Arc::new(CountingMigration { name: "v2", target: 2, runs: Arc::clone(&runs) }));

        coordinator.startup().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn older_server_warns_and_does_not_downgrade() {
        let kv = MemoryKv::new();
        kv.set(PROTOCOL_VERSION_KEY, b"3").await.unwrap();
        let coordinator = ProtocolCoordinator::new(kv, fetcher(1));
        let version = coordinator.startup().await.unwrap();
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn missing_migration_is_fatal() {
        let coordinator = ProtocolCoordinator::new(MemoryKv::new(), fetcher(2));
        let err = coordinator.startup().await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ProtocolMismatchError));
    }
}

// vim: ts=4
