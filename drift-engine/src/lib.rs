//! Sync engine for driftsync
//!
//! This crate provides the synchronization core:
//! - Conflict detection and resolution
//! - Table filtering
//! - Batching, rate limiting, and retry with backoff
//! - The push/pull/full-sync state machine and auto-sync scheduler

pub mod batch;
pub mod detect;
pub mod engine;
pub mod filter;
pub mod resolve;
pub mod retry;

pub use batch::{auto_batch_size, process_in_batches, process_with_rate_limit, BatchOptions};
pub use detect::{
    is_tombstone, key_projection, strip_meta, ConflictDetector, RemoteVersion,
    SYNC_DELETED_COLUMN, SYNC_META_PREFIX, SYNC_TIMESTAMP_COLUMN,
};
pub use engine::SyncEngine;
pub use filter::{MetadataFilter, TableFilter, TableMetadata};
pub use resolve::{
    merge_array_union, merge_prefer_non_null, ConflictResolver, Resolution, Winner,
};
pub use retry::{retry_with_backoff, RetryPolicy};
