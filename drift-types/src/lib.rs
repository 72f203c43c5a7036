//! Shared data model for the driftsync workspace
//!
//! This crate defines the types every other crate speaks in:
//! - Typed column values and rows with a stable JSON wire encoding
//! - Recorded changes and detected conflicts
//! - Engine and network state
//! - Sync configuration and the error taxonomy

pub mod change;
pub mod config;
pub mod error;
pub mod state;
pub mod value;

pub use change::{now_ms, Change, ChangeRequest, Conflict, Operation};
pub use config::{ConflictStrategy, Credential, MergeFn, SyncConfig, TableFilterConfig};
pub use error::{Result, SyncError, ValidationIssue};
pub use state::{
    EffectiveType, LinkType, NetworkState, PullResult, PushResult, SyncResult, SyncState,
};
pub use value::{canonical_row, row_from_json, row_to_json, Row, Value};
