//! Peer tunnel endpoints and heartbeat-derived status.

use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, SystemTime};

/// How often peers are expected to heartbeat.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

/// Heartbeat age after which a peer counts as offline: five missed periods.
pub const DEFAULT_OFFLINE_THRESHOLD: Duration = HEARTBEAT_PERIOD.saturating_mul(5);

/// A remote cluster's tunnel endpoint as last observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    /// Unique key of the peer.
    pub cluster_name: String,
    /// Where to dial to reach the peer's proxy.
    pub proxy_address: String,
    /// Last time the peer was confirmed reachable.
    pub last_heartbeat: SystemTime,
}

impl PeerEndpoint {
    pub fn new(
        cluster_name: impl Into<String>,
        proxy_address: impl Into<String>,
        last_heartbeat: SystemTime,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            proxy_address: proxy_address.into(),
            last_heartbeat,
        }
    }

    /// Time since the last heartbeat. A heartbeat stamped in the future
    /// (clock skew) counts as zero.
    pub fn heartbeat_age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.last_heartbeat).unwrap_or(Duration::ZERO)
    }

    pub fn status(&self, now: SystemTime, offline_threshold: Duration) -> PeerStatus {
        peer_status(self, now, offline_threshold)
    }
}

/// Reachability of a peer, derived from its heartbeat age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Online,
    Offline,
}

impl PeerStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Offline` iff `now - last_heartbeat > offline_threshold`.
pub fn peer_status(
    peer: &PeerEndpoint,
    now: SystemTime,
    offline_threshold: Duration,
) -> PeerStatus {
    if peer.heartbeat_age(now) > offline_threshold {
        PeerStatus::Offline
    } else {
        PeerStatus::Online
    }
}

/// Comparator placing the most recently heartbeated peer first.
pub fn more_recent_first(a: &PeerEndpoint, b: &PeerEndpoint) -> Ordering {
    b.last_heartbeat.cmp(&a.last_heartbeat)
}

/// Order peers newest heartbeat first. Stable: equal heartbeats keep their
/// input order.
pub fn sort_by_recency(mut peers: Vec<PeerEndpoint>) -> Vec<PeerEndpoint> {
    peers.sort_by(more_recent_first);
    peers
}
