//! Connection and closer abstractions shared by every dial stage.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::addr::NetAddr;

/// A resource that must be released explicitly.
#[async_trait]
pub trait Close: Send {
    /// Release the resource. Implementations must tolerate repeated calls.
    async fn close(&mut self) -> io::Result<()>;
}

#[async_trait]
impl<T: Close + ?Sized> Close for Box<T> {
    async fn close(&mut self) -> io::Result<()> {
        (**self).close().await
    }
}

/// A bidirectional byte stream that can be closed and reports the logical
/// endpoints it was created for.
pub trait Conn: AsyncRead + AsyncWrite + Close + Unpin {
    fn local_addr(&self) -> Option<&NetAddr> {
        None
    }

    fn remote_addr(&self) -> Option<&NetAddr> {
        None
    }
}

impl<T: Conn + ?Sized> Conn for Box<T> {
    fn local_addr(&self) -> Option<&NetAddr> {
        (**self).local_addr()
    }

    fn remote_addr(&self) -> Option<&NetAddr> {
        (**self).remote_addr()
    }
}

/// Owned, type-erased connection.
pub type BoxConn = Box<dyn Conn>;

/// Type-erased read half.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Type-erased write half.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Adapts any tokio stream (e.g. a `TcpStream`) into a [`Conn`].
///
/// Closing shuts down the write side once; the stream itself is released when
/// the adapter is dropped.
pub struct StreamConn<S> {
    inner: S,
    local: Option<NetAddr>,
    remote: Option<NetAddr>,
    closed: bool,
}

impl<S> StreamConn<S> {
    pub const fn new(inner: S) -> Self {
        Self {
            inner,
            local: None,
            remote: None,
            closed: false,
        }
    }

    pub const fn with_addrs(inner: S, local: NetAddr, remote: NetAddr) -> Self {
        Self {
            inner,
            local: Some(local),
            remote: Some(remote),
            closed: false,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for StreamConn<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for StreamConn<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl<S: AsyncWrite + Unpin + Send> Close for StreamConn<S> {
    async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        shutdown_quietly(&mut self.inner).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Conn for StreamConn<S> {
    fn local_addr(&self) -> Option<&NetAddr> {
        self.local.as_ref()
    }

    fn remote_addr(&self) -> Option<&NetAddr> {
        self.remote.as_ref()
    }
}

/// A connection assembled from a separate reader and writer, such as the
/// stdout/stdin pipes of a session channel.
///
/// Writes go to `writer`, reads come from `reader`. Closing shuts the writer
/// down and then releases `owner`, which keeps the pipes alive.
pub struct PipeConn {
    reader: BoxReader,
    writer: BoxWriter,
    owner: Box<dyn Close>,
    local: NetAddr,
    remote: NetAddr,
    closed: bool,
}

impl PipeConn {
    pub fn new(
        reader: BoxReader,
        writer: BoxWriter,
        owner: Box<dyn Close>,
        local: NetAddr,
        remote: NetAddr,
    ) -> Self {
        Self {
            reader,
            writer,
            owner,
            local,
            remote,
            closed: false,
        }
    }
}

impl AsyncRead for PipeConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for PipeConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}

#[async_trait]
impl Close for PipeConn {
    async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let shutdown = shutdown_quietly(&mut self.writer).await;
        let released = self.owner.close().await;
        shutdown.and(released)
    }
}

impl Conn for PipeConn {
    fn local_addr(&self) -> Option<&NetAddr> {
        Some(&self.local)
    }

    fn remote_addr(&self) -> Option<&NetAddr> {
        Some(&self.remote)
    }
}

/// Shut down a writer, treating an already-disconnected peer as success.
async fn shutdown_quietly<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W) -> io::Result<()> {
    match writer.shutdown().await {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}
