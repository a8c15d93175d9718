//! Logical tunnel addresses.
//!
//! Addresses here are opaque tokens handed to the session layer. They are
//! never parsed or resolved by this crate.

use std::fmt;

/// Destination understood by the far end as "this cluster's auth service".
///
/// Not a resolvable host name: it only has meaning to the
/// remote tunnel endpoint, which routes it to its local auth server.
pub const REMOTE_AUTH_SERVER: &str = "@remote-auth-server";

/// Synthetic source reported to the far end for auth-server dials.
pub const PROXY_DIALER_SOURCE: &str = "reversetunnel.proxy-dialer";

/// A network/address pair. Never resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetAddr {
    network: String,
    addr: String,
}

impl NetAddr {
    pub fn new(network: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            addr: addr.into(),
        }
    }

    /// Shorthand for a `tcp` address.
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::new("tcp", addr)
    }

    /// The sentinel auth-server destination.
    pub fn remote_auth_server() -> Self {
        Self::tcp(REMOTE_AUTH_SERVER)
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_remote_auth_server(&self) -> bool {
        self.addr == REMOTE_AUTH_SERVER
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}
