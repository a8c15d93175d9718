//! Third hop: asking an authenticated session for the real destination.

use std::io;

use tracing::{debug, warn};

use crate::addr::NetAddr;
use crate::conn::{BoxConn, BoxReader, BoxWriter, PipeConn};
use crate::error::{DialError, Result};
use crate::layered::release;
use crate::session::{Session, SessionChannel};

/// Subsystem name a peer proxy parses to route a connection:
/// `proxy:<dest>@<cluster>`.
pub fn subsystem_request(dest: &NetAddr, cluster: &str) -> String {
    format!("proxy:{dest}@{cluster}")
}

/// How the end-to-end stream is requested from the session.
#[derive(Debug, Clone)]
pub enum DestinationRequest {
    /// Use the session's own dial primitive (auth-server path).
    Redial { network: String, addr: NetAddr },
    /// Request the `proxy:` subsystem on a fresh channel and use its
    /// stdin/stdout as the connection (peer-to-peer path).
    Subsystem {
        from: NetAddr,
        to: NetAddr,
        cluster: String,
    },
}

impl DestinationRequest {
    pub fn redial(network: impl Into<String>, addr: NetAddr) -> Self {
        Self::Redial {
            network: network.into(),
            addr,
        }
    }

    pub fn subsystem(from: NetAddr, to: NetAddr, cluster: impl Into<String>) -> Self {
        Self::Subsystem {
            from,
            to,
            cluster: cluster.into(),
        }
    }

    /// The destination as reported in errors and logs.
    pub fn target(&self) -> String {
        match self {
            Self::Redial { addr, .. } => addr.to_string(),
            Self::Subsystem { to, cluster, .. } => format!("{to}@{cluster}"),
        }
    }

    /// Issue the request over `session`.
    ///
    /// The session is left open on failure; the caller owns it and tears it
    /// down. A channel opened for a failed subsystem request is closed here.
    pub async fn send(&self, session: &dyn Session, via: &str) -> Result<BoxConn> {
        let outcome = match self {
            Self::Redial { network, addr } => {
                debug!(network = %network, addr = %addr, via = %via, "Re-dialing through tunnel session");
                session.dial(network, addr).await
            }
            Self::Subsystem { from, to, cluster } => {
                open_subsystem(session, from, to, cluster).await
            }
        };

        outcome.map_err(|source| {
            warn!(dest = %self.target(), via = %via, error = %source, "Destination request failed");
            DialError::Destination {
                dest: self.target(),
                via: via.to_string(),
                source,
            }
        })
    }
}

async fn open_subsystem(
    session: &dyn Session,
    from: &NetAddr,
    to: &NetAddr,
    cluster: &str,
) -> io::Result<BoxConn> {
    let name = subsystem_request(to, cluster);
    debug!(subsystem = %name, "Requesting proxy subsystem");

    let mut channel = session.open_channel().await?;
    match attach_pipes(channel.as_mut(), &name).await {
        Ok((reader, writer)) => Ok(Box::new(PipeConn::new(
            reader,
            writer,
            Box::new(channel),
            from.clone(),
            to.clone(),
        ))),
        Err(e) => {
            release(&mut channel, "channel").await;
            Err(e)
        }
    }
}

/// Pipes are taken before the request so no output is lost once the far end
/// starts streaming.
async fn attach_pipes(
    channel: &mut dyn SessionChannel,
    name: &str,
) -> io::Result<(BoxReader, BoxWriter)> {
    let writer = channel.stdin()?;
    let reader = channel.stdout()?;
    channel.request_subsystem(name).await?;
    Ok((reader, writer))
}
