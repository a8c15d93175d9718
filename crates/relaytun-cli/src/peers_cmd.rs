//! `relaytun peers`: list peer tunnel endpoints with their heartbeat status.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use relaytun_core::Config;
use relaytun_tunnel::{Heartbeat, PeerDirectory, PeerEndpoint};

/// Arguments for `relaytun peers`.
#[derive(clap::Args, Debug)]
pub struct PeersArgs {
    /// JSON file of observed heartbeats.
    #[arg(long, env = "RELAYTUN_PEERS_FILE")]
    pub file: Option<PathBuf>,
}

/// One entry of a peers file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub cluster_name: String,
    pub proxy_address: String,
    /// Last heartbeat, seconds since the Unix epoch.
    pub last_heartbeat_unix: u64,
}

impl From<PeerRecord> for Heartbeat {
    fn from(record: PeerRecord) -> Self {
        Self {
            cluster_name: record.cluster_name,
            proxy_address: record.proxy_address,
            at: UNIX_EPOCH + Duration::from_secs(record.last_heartbeat_unix),
        }
    }
}

/// Execute `relaytun peers`.
pub async fn run(args: &PeersArgs, config: &Config) -> anyhow::Result<()> {
    let records = match &args.file {
        Some(path) => load_peers_file(path)?,
        None => Vec::new(),
    };
    let directory = build_directory(config, records).await;
    let peers = directory.sorted_by_recency().await;

    let mut out = io::stdout();
    write_table(
        &mut out,
        &peers,
        SystemTime::now(),
        directory.offline_threshold(),
    )
}

/// Read a JSON array of [`PeerRecord`]s.
pub fn load_peers_file(path: &Path) -> anyhow::Result<Vec<PeerRecord>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read peers file {}: {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse peers file {}: {}", path.display(), e))
}

/// Populate a directory from configured peers, then observed heartbeats.
///
/// Configured peers that never heartbeated are listed with a heartbeat at the
/// epoch, so they always show as offline.
pub async fn build_directory(config: &Config, records: Vec<PeerRecord>) -> PeerDirectory {
    let directory = PeerDirectory::new(config.peers.offline_threshold());
    for known in &config.peers.known {
        directory
            .record_heartbeat(Heartbeat {
                cluster_name: known.cluster_name.clone(),
                proxy_address: known.proxy_address.clone(),
                at: UNIX_EPOCH,
            })
            .await;
    }
    for record in records {
        directory.record_heartbeat(record.into()).await;
    }
    debug!(peers = directory.len().await, "Peer directory loaded");
    directory
}

fn write_table(
    out: &mut impl Write,
    peers: &[PeerEndpoint],
    now: SystemTime,
    threshold: Duration,
) -> anyhow::Result<()> {
    if peers.is_empty() {
        writeln!(out, "No peers known")?;
        return Ok(());
    }
    writeln!(
        out,
        "{:<20} {:<28} {:<8} {}",
        "CLUSTER", "PROXY", "STATUS", "LAST HEARTBEAT"
    )?;
    for peer in peers {
        writeln!(
            out,
            "{:<20} {:<28} {:<8} {}",
            peer.cluster_name,
            peer.proxy_address,
            peer.status(now, threshold),
            format_age(peer, now)
        )?;
    }
    Ok(())
}

fn format_age(peer: &PeerEndpoint, now: SystemTime) -> String {
    if peer.last_heartbeat == UNIX_EPOCH {
        return "never".to_string();
    }
    format!("{}s ago", peer.heartbeat_age(now).as_secs())
}
