//! Network state monitoring
//!
//! Publishes an online/offline + link-type stream the sync scheduler
//! consumes before every tick. Two implementations: a settable monitor
//! fed by the embedder (or tests), and an active prober that performs
//! bounded-timeout TCP connects against known endpoints.

pub mod probe;

use async_trait::async_trait;
use tokio::sync::watch;

use drift_types::{LinkType, NetworkState};

pub use probe::{classify_latency, ProbeConfig, ProbeNetworkMonitor};

/// Source of network state.
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// The most recent known state.
    async fn current(&self) -> NetworkState;

    /// Watch subsequent state updates; the receiver always holds the
    /// latest value.
    fn subscribe(&self) -> watch::Receiver<NetworkState>;
}

/// Monitor whose state is set from outside.
///
/// Embedders wire OS connectivity callbacks into `set_state`; tests flip
/// it directly.
pub struct StaticNetworkMonitor {
    tx: watch::Sender<NetworkState>,
}

impl StaticNetworkMonitor {
    pub fn new(initial: NetworkState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Start offline with an unknown link.
    pub fn offline() -> Self {
        Self::new(NetworkState::offline())
    }

    /// Start online on the given link.
    pub fn online(link: LinkType) -> Self {
        Self::new(NetworkState::online(link))
    }

    pub fn set_state(&self, state: NetworkState) {
        self.tx.send_replace(state);
    }

    pub fn set_online(&self, link: LinkType) {
        self.set_state(NetworkState::online(link));
    }

    pub fn set_offline(&self) {
        self.set_state(NetworkState::offline());
    }
}

#[async_trait]
impl NetworkMonitor for StaticNetworkMonitor {
    async fn current(&self) -> NetworkState {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }
}
