//! Scheduled compaction and pruning jobs.

use crate::adapter::BackendAdapter;
use chrono::{DateTime, Utc};
use croner::Cron;
use replicate_types::prelude::*;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Cron schedule wrapper. Stores the source expression alongside the parsed
/// form so a schedule can be persisted and re-parsed without losing fidelity.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: Box<str>,
    cron: Cron,
}

impl CronSchedule {
    /// Parse a standard 5-field cron expression (minute hour day month weekday).
    pub fn parse(expr: &str) -> ClResult<Self> {
        let cron = Cron::from_str(expr)
            .map_err(|e| Error::new(ErrorKind::DualStorageError, format!("invalid cron expression {expr:?}: {e}")))?;
        Ok(Self { expr: expr.into(), cron })
    }

    pub fn next_execution(&self, after: Timestamp) -> ClResult<Timestamp> {
        let dt = DateTime::<Utc>::from_timestamp_millis(after.0).unwrap_or_else(Utc::now);
        self.cron
            .find_next_occurrence(&dt, false)
            .map(|next| Timestamp(next.timestamp_millis()))
            .map_err(|e| {
                Error::new(
                    ErrorKind::DualStorageError,
                    format!("cron next_execution failed for {:?}: {e}", self.expr),
                )
            })
    }

    pub fn to_cron_string(&self) -> String {
        self.expr.to_string()
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl Eq for CronSchedule {}

/// Spawn the compaction job for one collection: wakes on `schedule`, calls
/// `adapter.compact(collection, retention_days)`, logs and continues on
/// failure rather than aborting the loop (a single bad run must not stop all
/// future compactions).
pub fn spawn_compaction_job(
    adapter: Arc<dyn BackendAdapter>,
    collection: CollectionId,
    retention_days: u32,
    schedule: CronSchedule,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = match schedule.next_execution(Timestamp::now()) {
                Ok(next) => next,
                Err(e) => {
                    error!(%collection, "compaction schedule {:?} has no next occurrence: {e}", schedule.to_cron_string());
                    return;
                }
            };
            sleep_until(next).await;

            debug!(%collection, retention_days, "running scheduled compaction");
            if let Err(e) = adapter.compact(&collection, retention_days).await {
                warn!(%collection, "scheduled compaction failed: {e}");
            }
        }
    })
}

/// Spawn the pruning job for one collection, mirroring
/// [`spawn_compaction_job`].
pub fn spawn_pruning_job(
    adapter: Arc<dyn BackendAdapter>,
    collection: CollectionId,
    retention_days: u32,
    schedule: CronSchedule,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = match schedule.next_execution(Timestamp::now()) {
                Ok(next) => next,
                Err(e) => {
                    error!(%collection, "pruning schedule {:?} has no next occurrence: {e}", schedule.to_cron_string());
                    return;
                }
            };
            sleep_until(next).await;

            debug!(%collection, retention_days, "running scheduled pruning");
            if let Err(e) = adapter.prune(&collection, retention_days).await {
                warn!(%collection, "scheduled pruning failed: {e}");
            }
        }
    })
}

async fn sleep_until(target: Timestamp) {
    let now = Timestamp::now();
    let delay_ms = (target.0 - now.0).max(0) as u64;
    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
}


// vim: ts=4
