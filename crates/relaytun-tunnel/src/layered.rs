//! Composite connection that owns every resource of a multi-hop dial.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::warn;

use crate::addr::NetAddr;
use crate::conn::{BoxConn, Close, Conn};

/// A connection that reads and writes through `primary` and, when closed,
/// releases `primary` followed by every extra resource in order.
///
/// The first close error is returned after all resources were attempted.
/// Later calls are no-ops. Dropping a `LayeredConn` without closing it still
/// drops every owned resource.
pub struct LayeredConn {
    primary: BoxConn,
    extras: Vec<Box<dyn Close>>,
    closed: bool,
}

impl LayeredConn {
    pub fn new(primary: BoxConn, extras: Vec<Box<dyn Close>>) -> Self {
        Self {
            primary,
            extras,
            closed: false,
        }
    }

    /// Number of owned resources, including the primary connection.
    pub fn layers(&self) -> usize {
        self.extras.len() + 1
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl Close for LayeredConn {
    async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_err = None;
        if let Err(e) = self.primary.close().await {
            warn!(error = %e, layer = 0, "Failed to close primary connection");
            first_err.get_or_insert(e);
        }
        for (i, extra) in self.extras.iter_mut().enumerate() {
            if let Err(e) = extra.close().await {
                warn!(error = %e, layer = i + 1, "Failed to close tunnel layer");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl AsyncRead for LayeredConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.primary).poll_read(cx, buf)
    }
}

impl AsyncWrite for LayeredConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.primary).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.primary).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.primary).poll_shutdown(cx)
    }
}

impl Conn for LayeredConn {
    fn local_addr(&self) -> Option<&NetAddr> {
        self.primary.local_addr()
    }

    fn remote_addr(&self) -> Option<&NetAddr> {
        self.primary.remote_addr()
    }
}

/// Close a resource on a failure path, logging instead of returning the close
/// error so the original failure is what reaches the caller.
pub(crate) async fn release<C: Close + ?Sized>(resource: &mut C, what: &'static str) {
    if let Err(e) = resource.close().await {
        warn!(error = %e, resource = what, "Failed to release after dial failure");
    }
}
