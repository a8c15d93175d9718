//! First hop: the raw transport connection to a tunnel intermediary.

use std::future::Future;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::addr::NetAddr;
use crate::conn::BoxConn;
use crate::error::{DialError, Result};

/// Host-supplied physical dial.
///
/// `from` is the logical source kept for diagnostics on the far end; `to` is
/// an opaque destination that may be a sentinel rather than a host name, so
/// implementations route it and never resolve it themselves unless they know
/// it is a real address.
#[async_trait]
pub trait DialFn: Send + Sync {
    async fn dial(&self, from: &NetAddr, to: &NetAddr) -> io::Result<BoxConn>;
}

/// [`DialFn`] backed by an async closure.
pub struct FnDialer<F>(F);

/// Wrap an async closure as a [`DialFn`].
pub const fn dial_fn<F, Fut>(f: F) -> FnDialer<F>
where
    F: Fn(NetAddr, NetAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<BoxConn>> + Send + 'static,
{
    FnDialer(f)
}

#[async_trait]
impl<F, Fut> DialFn for FnDialer<F>
where
    F: Fn(NetAddr, NetAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<BoxConn>> + Send + 'static,
{
    async fn dial(&self, from: &NetAddr, to: &NetAddr) -> io::Result<BoxConn> {
        (self.0)(from.clone(), to.clone()).await
    }
}

/// Opens transport connections through the injected [`DialFn`].
///
/// No retries happen here; a failed dial is reported as
/// [`DialError::Connect`] and the caller picks the next candidate.
#[derive(Clone)]
pub struct TransportDialer {
    dial: Arc<dyn DialFn>,
}

impl TransportDialer {
    pub fn new(dial: Arc<dyn DialFn>) -> Self {
        Self { dial }
    }

    pub async fn dial(&self, from: &NetAddr, to: &NetAddr) -> Result<BoxConn> {
        debug!(from = %from, to = %to, "Dialing tunnel transport");
        self.dial.dial(from, to).await.map_err(|source| {
            warn!(to = %to, error = %source, "Tunnel transport dial failed");
            DialError::Connect {
                addr: to.to_string(),
                source,
            }
        })
    }
}
