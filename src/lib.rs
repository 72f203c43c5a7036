//! driftsync workspace root
//!
//! Offline-first bidirectional synchronization middleware between a local
//! embedded store and a remote managed store. This crate re-exports the
//! workspace members and hosts integration tests that exercise them
//! together.

pub use drift_changelog as changelog;
pub use drift_engine as engine;
pub use drift_local as local;
pub use drift_net as net;
pub use drift_remote as remote;
pub use drift_types as types;
