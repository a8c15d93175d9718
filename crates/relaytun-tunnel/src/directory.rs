//! In-memory directory of peer tunnel endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, info, warn};

use crate::dialer::{PeeredCluster, TunnelDialer};
use crate::peer::{DEFAULT_OFFLINE_THRESHOLD, PeerEndpoint, PeerStatus, sort_by_recency};

/// A heartbeat observed from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub cluster_name: String,
    pub proxy_address: String,
    pub at: SystemTime,
}

/// Thread-safe set of known peers keyed by cluster name.
///
/// Every read works on a copy taken under the read lock, so a caller never
/// sees a partially applied heartbeat.
#[derive(Clone)]
pub struct PeerDirectory {
    peers: Arc<RwLock<BTreeMap<String, PeerEndpoint>>>,
    offline_threshold: Duration,
}

impl PeerDirectory {
    pub fn new(offline_threshold: Duration) -> Self {
        Self {
            peers: Arc::new(RwLock::new(BTreeMap::new())),
            offline_threshold,
        }
    }

    pub const fn offline_threshold(&self) -> Duration {
        self.offline_threshold
    }

    /// Create or refresh a peer from a heartbeat. Returns `true` when the peer
    /// was not known before.
    ///
    /// A heartbeat older than the one already recorded only updates the proxy
    /// address; `last_heartbeat` never moves backwards.
    pub async fn record_heartbeat(&self, heartbeat: Heartbeat) -> bool {
        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.get_mut(&heartbeat.cluster_name) {
            peer.proxy_address = heartbeat.proxy_address;
            if heartbeat.at > peer.last_heartbeat {
                peer.last_heartbeat = heartbeat.at;
            }
            return false;
        }

        info!(
            cluster = %heartbeat.cluster_name,
            proxy = %heartbeat.proxy_address,
            "Peer registered"
        );
        let name = heartbeat.cluster_name.clone();
        peers.insert(
            name,
            PeerEndpoint::new(
                heartbeat.cluster_name,
                heartbeat.proxy_address,
                heartbeat.at,
            ),
        );
        true
    }

    /// Remove a peer.
    pub async fn deregister(&self, cluster_name: &str) -> Option<PeerEndpoint> {
        let peer = self.peers.write().await.remove(cluster_name);
        if peer.is_some() {
            info!(cluster = %cluster_name, "Peer deregistered");
        } else {
            warn!(cluster = %cluster_name, "Tried to deregister unknown peer");
        }
        peer
    }

    pub async fn get(&self, cluster_name: &str) -> Option<PeerEndpoint> {
        self.peers.read().await.get(cluster_name).cloned()
    }

    /// All peers, ordered by cluster name.
    pub async fn snapshot(&self) -> Vec<PeerEndpoint> {
        self.peers.read().await.values().cloned().collect()
    }

    /// All peers, most recent heartbeat first.
    pub async fn sorted_by_recency(&self) -> Vec<PeerEndpoint> {
        sort_by_recency(self.snapshot().await)
    }

    pub async fn status_of(&self, cluster_name: &str, now: SystemTime) -> Option<PeerStatus> {
        self.get(cluster_name)
            .await
            .map(|peer| peer.status(now, self.offline_threshold))
    }

    /// Online peers, most recent heartbeat first.
    pub async fn online_peers(&self, now: SystemTime) -> Vec<PeerEndpoint> {
        self.sorted_by_recency()
            .await
            .into_iter()
            .filter(|peer| peer.status(now, self.offline_threshold).is_online())
            .collect()
    }

    /// A dialable handle for a known peer, built from its current record.
    pub async fn cluster(
        &self,
        cluster_name: &str,
        dialer: Arc<TunnelDialer>,
    ) -> Option<PeeredCluster> {
        self.get(cluster_name)
            .await
            .map(|peer| PeeredCluster::new(peer, dialer, self.offline_threshold))
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new(DEFAULT_OFFLINE_THRESHOLD)
    }
}

/// Spawn a task that applies heartbeats from `heartbeats` to `directory`
/// until shutdown is signalled or every sender is dropped.
pub fn spawn_heartbeat_listener(
    directory: PeerDirectory,
    mut heartbeats: mpsc::Receiver<Heartbeat>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe = heartbeats.recv() => {
                    let Some(heartbeat) = maybe else {
                        debug!("Heartbeat channel closed");
                        return;
                    };
                    debug!(cluster = %heartbeat.cluster_name, "Heartbeat received");
                    directory.record_heartbeat(heartbeat).await;
                }
                _ = shutdown.changed() => {
                    info!("Heartbeat listener shutting down");
                    return;
                }
            }
        }
    })
}
