//! Engine state, network state, and per-operation result summaries

use serde::{Deserialize, Serialize};

use crate::change::Conflict;

/// State emitted by the sync engine.
///
/// Emissions are totally ordered; observers receive every transition
/// without coalescing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing { progress: u8 },
    Error { kind: String, message: String },
    Conflict { conflicts: Vec<Conflict> },
}

/// Physical link type reported by the network monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Wifi,
    Cellular,
    Ethernet,
    Unknown,
}

/// Effective connection speed class, when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectiveType {
    #[serde(rename = "4g")]
    G4,
    #[serde(rename = "3g")]
    G3,
    #[serde(rename = "2g")]
    G2,
    #[serde(rename = "slow-2g")]
    Slow2G,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    pub online: bool,
    pub link: LinkType,
    pub effective: Option<EffectiveType>,
}

impl NetworkState {
    pub fn online(link: LinkType) -> Self {
        Self {
            online: true,
            link,
            effective: None,
        }
    }

    pub fn offline() -> Self {
        Self {
            online: false,
            link: LinkType::Unknown,
            effective: None,
        }
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::offline()
    }
}

/// Outcome of a push cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushResult {
    pub uploaded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Outcome of a pull cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullResult {
    pub downloaded: usize,
    pub applied: usize,
    pub errors: Vec<String>,
}

/// Outcome of a full sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub pushed: usize,
    pub pulled: usize,
    pub conflicts: Vec<Conflict>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}
