//! Active connectivity probing
//!
//! Periodically attempts bounded-timeout TCP connects against configured
//! endpoints and publishes online/offline transitions. A configurable
//! number of consecutive failures must accumulate before the monitor
//! flips offline, so a single dropped probe does not flap the scheduler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use drift_types::{EffectiveType, LinkType, NetworkState};

use crate::NetworkMonitor;

/// Classify link speed from a probe round trip.
///
/// Thresholds mirror the usual effective-connection-type buckets.
pub fn classify_latency(rtt: Duration) -> EffectiveType {
    let ms = rtt.as_millis();
    if ms < 150 {
        EffectiveType::G4
    } else if ms < 400 {
        EffectiveType::G3
    } else if ms < 1_000 {
        EffectiveType::G2
    } else {
        EffectiveType::Slow2G
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// `host:port` endpoints tried in order; the first success wins.
    pub endpoints: Vec<String>,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    /// Consecutive failed probe rounds before flipping offline.
    pub failure_threshold: u32,
    /// Link type reported while online.
    pub link: LinkType,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["1.1.1.1:443".to_string(), "8.8.8.8:443".to_string()],
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(3),
            failure_threshold: 2,
            link: LinkType::Unknown,
        }
    }
}

/// Monitor that derives state from active probes.
pub struct ProbeNetworkMonitor {
    config: ProbeConfig,
    tx: watch::Sender<NetworkState>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ProbeNetworkMonitor {
    pub fn new(config: ProbeConfig) -> Self {
        let (tx, _) = watch::channel(NetworkState::offline());
        Self {
            config,
            tx,
            task: Mutex::new(None),
        }
    }

    /// One probe round: try each endpoint until one connects, returning
    /// the measured round trip.
    pub async fn probe_once(&self) -> Option<Duration> {
        for endpoint in &self.config.endpoints {
            let started = Instant::now();
            match timeout(self.config.probe_timeout, TcpStream::connect(endpoint)).await {
                Ok(Ok(_)) => {
                    let rtt = started.elapsed();
                    debug!("connectivity probe succeeded via {endpoint} in {rtt:?}");
                    return Some(rtt);
                }
                Ok(Err(e)) => debug!("connectivity probe to {endpoint} failed: {e}"),
                Err(_) => debug!("connectivity probe to {endpoint} timed out"),
            }
        }
        None
    }

    /// Start the background probe loop. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let monitor = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(monitor.config.probe_interval);
            let mut consecutive_failures = 0u32;
            loop {
                ticker.tick().await;
                let probe = monitor.probe_once().await;
                let currently_online = monitor.tx.borrow().online;

                if let Some(rtt) = probe {
                    consecutive_failures = 0;
                    let effective = Some(classify_latency(rtt));
                    let changed = {
                        let current = monitor.tx.borrow();
                        !current.online || current.effective != effective
                    };
                    if changed {
                        if !currently_online {
                            info!("connectivity restored");
                        }
                        monitor.tx.send_replace(NetworkState {
                            online: true,
                            link: monitor.config.link,
                            effective,
                        });
                    }
                } else {
                    consecutive_failures += 1;
                    if currently_online && consecutive_failures >= monitor.config.failure_threshold
                    {
                        warn!("connectivity lost after {consecutive_failures} failed probes");
                        monitor.tx.send_replace(NetworkState::offline());
                    }
                }
            }
        }));
    }

    /// Stop probing. Idempotent; the last published state sticks.
    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl NetworkMonitor for ProbeNetworkMonitor {
    async fn current(&self) -> NetworkState {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }
}
