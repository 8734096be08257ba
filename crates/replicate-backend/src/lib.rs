//! Backend-side storage model: the dual-write mutation contract, pull/stream
//! queries, and scheduled compaction/pruning.
//!
//! This crate defines [`BackendAdapter`], the trait a concrete storage engine
//! implements; see `replicate-backend-adapter-redb` for a redb-backed one.

pub mod adapter;
pub mod scheduler;
pub mod types;

pub use adapter::BackendAdapter;
pub use scheduler::{spawn_compaction_job, spawn_pruning_job, CronSchedule};
pub use types::{
    ChangeStreamSummary, CollectionConfig, CollectionStats, InsertRequest, PullResult,
    StreamOptions, StreamOrder, UpdateRequest, DEFAULT_PULL_LIMIT,
};

// vim: ts=4
