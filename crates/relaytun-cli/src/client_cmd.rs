//! `relaytun client`: resolve and validate the tunnel client settings.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};
use std::path::PathBuf;

use relaytun_core::config::DialerConfig;
use relaytun_tunnel::{ClientIdentity, TunnelClientConfig};

/// Arguments for `relaytun client`.
#[derive(clap::Args, Debug)]
pub struct ClientArgs {
    /// Private key presented during the tunnel handshake.
    #[arg(long, env = "RELAYTUN_KEY_FILE")]
    pub key: PathBuf,
    /// Tunnel user, overriding the configured one.
    #[arg(long)]
    pub user: Option<String>,
}

/// Build the dialer's client settings from configuration.
///
/// A missing user yields a config without identity, which the dialer rejects
/// before any I/O.
pub fn tunnel_client_config(dialer: &DialerConfig, key_material: Vec<u8>) -> TunnelClientConfig {
    let mut cfg = TunnelClientConfig {
        identity: dialer
            .user
            .as_ref()
            .map(|user| ClientIdentity::new(user.as_str(), key_material)),
        timeout: None,
    };
    if let Some(timeout) = dialer.dial_timeout() {
        cfg = cfg.with_timeout(timeout);
    }
    cfg
}

/// Execute `relaytun client`.
pub fn run(args: &ClientArgs, dialer: &DialerConfig) -> anyhow::Result<()> {
    let key = std::fs::read(&args.key)
        .map_err(|e| anyhow::anyhow!("Failed to read key file {}: {}", args.key.display(), e))?;

    let mut dialer = dialer.clone();
    if args.user.is_some() {
        dialer.user.clone_from(&args.user);
    }

    let cfg = tunnel_client_config(&dialer, key);
    let mut out = io::stdout();
    write_summary(&mut out, cfg)
}

fn write_summary(out: &mut impl Write, mut cfg: TunnelClientConfig) -> anyhow::Result<()> {
    cfg.check_and_set_defaults()?;
    let identity = cfg.identity()?;
    writeln!(out, "user:              {}", identity.user())?;
    writeln!(out, "key:               {} bytes", identity.key_material().len())?;
    writeln!(
        out,
        "handshake timeout: {}s",
        cfg.effective_timeout().as_secs()
    )?;
    Ok(())
}
