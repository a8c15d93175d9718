//! Configuration resolution for relaytun.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/relaytun/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Config files are partial: a key that a file omits keeps the value from the
//! layer below it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Default interval at which peers report heartbeats.
pub const DEFAULT_HEARTBEAT_PERIOD_SECS: u64 = 5;

/// A peer is offline after missing this many heartbeat periods.
pub const OFFLINE_AFTER_MISSED_HEARTBEATS: u64 = 5;

/// Complete, resolved relaytun configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub dialer: DialerConfig,
    #[serde(default)]
    pub peers: PeersConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Tunnel dialer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerConfig {
    /// Handshake deadline in seconds. Zero leaves the dialer's own default.
    pub dial_timeout_secs: u64,
    /// User presented during tunnel authentication.
    pub user: Option<String>,
}

impl DialerConfig {
    /// The configured handshake deadline, if any.
    pub const fn dial_timeout(&self) -> Option<Duration> {
        if self.dial_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.dial_timeout_secs))
        }
    }
}

/// A statically configured peer tunnel endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownPeer {
    pub cluster_name: String,
    pub proxy_address: String,
}

/// Peer tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeersConfig {
    /// Expected heartbeat interval of peers.
    pub heartbeat_period_secs: u64,
    /// Heartbeat age after which a peer is reported offline. Derived from the
    /// heartbeat period when unset.
    pub offline_threshold_secs: Option<u64>,
    /// Peers known ahead of any heartbeat.
    pub known: Vec<KnownPeer>,
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            heartbeat_period_secs: DEFAULT_HEARTBEAT_PERIOD_SECS,
            offline_threshold_secs: None,
            known: Vec::new(),
        }
    }
}

impl PeersConfig {
    pub const fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat_period_secs)
    }

    /// Explicit threshold, or [`OFFLINE_AFTER_MISSED_HEARTBEATS`] periods.
    pub const fn offline_threshold(&self) -> Duration {
        match self.offline_threshold_secs {
            Some(secs) => Duration::from_secs(secs),
            None => Duration::from_secs(
                self.heartbeat_period_secs
                    .saturating_mul(OFFLINE_AFTER_MISSED_HEARTBEATS),
            ),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// One config file as written on disk. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub dialer: DialerFile,
    pub peers: PeersFile,
    pub log: LogFile,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DialerFile {
    pub dial_timeout_secs: Option<u64>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PeersFile {
    pub heartbeat_period_secs: Option<u64>,
    pub offline_threshold_secs: Option<u64>,
    pub known: Vec<KnownPeer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogFile {
    pub level: Option<String>,
    pub json: Option<bool>,
}

/// Load configuration with hierarchical resolution.
///
/// `explicit` is a config file named on the command line; unlike the global
/// file it must exist.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global);
        }
    }

    if let Some(path) = explicit {
        let file = load_config_file(path)?;
        merge_config(&mut config, file);
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("relaytun").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let file = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    debug!(path = %path.display(), "Loaded config file");
    Ok(file)
}

fn merge_config(base: &mut Config, overlay: ConfigFile) {
    // Merge dialer config
    if let Some(secs) = overlay.dialer.dial_timeout_secs {
        base.dialer.dial_timeout_secs = secs;
    }
    if overlay.dialer.user.is_some() {
        base.dialer.user = overlay.dialer.user;
    }

    // Merge peers config
    if let Some(secs) = overlay.peers.heartbeat_period_secs {
        base.peers.heartbeat_period_secs = secs;
    }
    if overlay.peers.offline_threshold_secs.is_some() {
        base.peers.offline_threshold_secs = overlay.peers.offline_threshold_secs;
    }
    for peer in overlay.peers.known {
        base.peers
            .known
            .retain(|p| p.cluster_name != peer.cluster_name);
        base.peers.known.push(peer);
    }

    // Merge log config
    if let Some(level) = overlay.log.level {
        base.log.level = level;
    }
    if let Some(json) = overlay.log.json {
        base.log.json = json;
    }
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(val) = var("RELAYTUN_DIAL_TIMEOUT_SECS") {
        if let Ok(n) = val.parse() {
            debug!(dial_timeout_secs = n, "Dial timeout set from environment");
            config.dialer.dial_timeout_secs = n;
        }
    }
    if let Some(val) = var("RELAYTUN_OFFLINE_THRESHOLD_SECS") {
        if let Ok(n) = val.parse() {
            debug!(offline_threshold_secs = n, "Offline threshold set from environment");
            config.peers.offline_threshold_secs = Some(n);
        }
    }
    if let Some(val) = var("RELAYTUN_USER") {
        debug!(user = %val, "Tunnel user set from environment");
        config.dialer.user = Some(val);
    }
    if let Some(val) = var("RELAYTUN_LOG_LEVEL") {
        config.log.level = val;
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.peers.heartbeat_period_secs == 0 {
        return Err(Error::Config(
            "peers.heartbeat_period_secs must be greater than zero".into(),
        ));
    }
    if config.peers.offline_threshold().is_zero() {
        return Err(Error::Config(
            "peers.offline_threshold_secs must be greater than zero".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn default_offline_threshold_is_five_heartbeats() {
        let config = Config::default();
        assert_eq!(config.peers.offline_threshold(), Duration::from_secs(25));
    }

    #[test]
    fn offline_threshold_follows_heartbeat_period() {
        let mut peers = PeersConfig {
            heartbeat_period_secs: 10,
            ..PeersConfig::default()
        };
        assert_eq!(peers.offline_threshold(), Duration::from_secs(50));

        peers.offline_threshold_secs = Some(12);
        assert_eq!(peers.offline_threshold(), Duration::from_secs(12));
    }

    #[test]
    fn zero_dial_timeout_leaves_dialer_default() {
        assert_eq!(DialerConfig::default().dial_timeout(), None);
        let dialer = DialerConfig {
            dial_timeout_secs: 7,
            user: None,
        };
        assert_eq!(dialer.dial_timeout(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "settings.json",
            r#"{
                "dialer": { "dial_timeout_secs": 5, "user": "proxy" },
                "peers": {
                    "offline_threshold_secs": 60,
                    "heartbeat_period_secs": 10,
                    "known": [{ "cluster_name": "prod", "proxy_address": "10.0.0.1:3023" }]
                }
            }"#,
        );

        let mut config = Config::default();
        merge_config(&mut config, load_config_file(&path).unwrap());
        assert_eq!(config.dialer.dial_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.dialer.user.as_deref(), Some("proxy"));
        assert_eq!(config.peers.offline_threshold(), Duration::from_secs(60));
        assert_eq!(config.peers.heartbeat_period(), Duration::from_secs(10));
        assert_eq!(config.peers.known.len(), 1);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn explicit_file_keeps_keys_it_omits() {
        let dir = tempfile::tempdir().unwrap();
        let global = write_file(
            dir.path(),
            "global.json",
            r#"{ "peers": { "offline_threshold_secs": 60 }, "dialer": { "dial_timeout_secs": 5 } }"#,
        );
        let explicit = write_file(dir.path(), "explicit.json", r#"{ "log": { "level": "debug" } }"#);

        let mut config = Config::default();
        merge_config(&mut config, load_config_file(&global).unwrap());
        merge_config(&mut config, load_config_file(&explicit).unwrap());

        assert_eq!(config.peers.offline_threshold_secs, Some(60));
        assert_eq!(config.dialer.dial_timeout_secs, 5);
        assert_eq!(config.log.level, "debug");
        assert!(!config.log.json);
    }

    #[test]
    fn malformed_file_error_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "settings.json", "{ not json");

        let Error::Config(msg) = load_config_file(&path).unwrap_err();
        assert!(msg.starts_with("Failed to parse config file"));
        assert!(msg.contains("settings.json"));
    }

    #[test]
    fn missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("absent.json"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn merge_replaces_known_peer_by_cluster_name() {
        let mut base = Config::default();
        base.peers.known.push(KnownPeer {
            cluster_name: "prod".into(),
            proxy_address: "old:3023".into(),
        });

        let mut overlay = ConfigFile::default();
        overlay.peers.known.push(KnownPeer {
            cluster_name: "prod".into(),
            proxy_address: "new:3023".into(),
        });
        merge_config(&mut base, overlay);

        assert_eq!(base.peers.known.len(), 1);
        assert_eq!(base.peers.known[0].proxy_address, "new:3023");
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("RELAYTUN_DIAL_TIMEOUT_SECS", "12"),
            ("RELAYTUN_OFFLINE_THRESHOLD_SECS", "90"),
            ("RELAYTUN_USER", "tunnel"),
            ("RELAYTUN_LOG_LEVEL", "debug"),
        ]);
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.dialer.dial_timeout_secs, 12);
        assert_eq!(config.peers.offline_threshold(), Duration::from_secs(90));
        assert_eq!(config.dialer.user.as_deref(), Some("tunnel"));
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn unparsable_env_value_is_ignored() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| {
            (k == "RELAYTUN_DIAL_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert_eq!(config.dialer.dial_timeout_secs, 0);
    }

    #[test]
    fn zero_thresholds_are_rejected() {
        let mut config = Config::default();
        config.peers.offline_threshold_secs = Some(0);
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.peers.heartbeat_period_secs = 0;
        assert!(validate(&config).is_err());

        assert!(validate(&Config::default()).is_ok());
    }
}
