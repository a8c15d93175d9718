//! Tunnel dialer error types.

use std::io;
use std::time::Duration;

/// Result type alias for dialer operations.
pub type Result<T> = std::result::Result<T, DialError>;

/// Errors that can occur while dialing through a tunnel.
///
/// Every variant names the stage that failed and the address or cluster it
/// was working on. Earlier stages are always torn down before one of these is
/// returned.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    /// Missing identity or collaborator, detected before any I/O.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The injected transport dial failed.
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The remote end rejected the handshake.
    #[error("Authentication with {addr} failed: {source}")]
    Auth {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The handshake did not finish within the configured deadline.
    #[error("Authentication with {addr} timed out after {timeout:?}")]
    AuthTimeout { addr: String, timeout: Duration },

    /// The second-stage dial or subsystem request failed.
    #[error("Failed to reach {dest} via {via}: {source}")]
    Destination {
        dest: String,
        via: String,
        #[source]
        source: io::Error,
    },
}

impl DialError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Configuration errors repeat on every candidate peer, so callers should
    /// not fall through to the next one.
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Short name of the failing stage, for logs and events.
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Connect { .. } => "connect",
            Self::Auth { .. } | Self::AuthTimeout { .. } => "auth",
            Self::Destination { .. } => "destination",
        }
    }
}
