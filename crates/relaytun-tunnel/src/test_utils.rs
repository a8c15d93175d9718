//! In-memory fakes for exercising dial paths without a network or a real
//! handshake.
//!
//! Every fake resource reports into a [`CloseTracker`] so tests can check
//! that each layer was closed exactly once, or at least released by drop.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

use crate::addr::NetAddr;
use crate::conn::{BoxConn, BoxReader, BoxWriter, Close, Conn};
use crate::session::{ClientIdentity, HandshakeFailure, Session, SessionChannel, SessionConnector};
use crate::transport::DialFn;

const PIPE_CAPACITY: usize = 64 * 1024;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts explicit closes and notes whether the resource was released at all.
#[derive(Debug, Default)]
pub struct CloseTracker {
    closes: AtomicUsize,
    released: AtomicBool,
}

impl CloseTracker {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// Number of explicit `close()` calls that did work.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Closed explicitly or dropped.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn mark_closed(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.released.store(true, Ordering::SeqCst);
    }

    fn mark_released(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// A duplex-backed connection whose far end echoes everything back.
pub struct FakeConn {
    stream: DuplexStream,
    tracker: Arc<CloseTracker>,
    closed: bool,
}

impl FakeConn {
    /// Create a connection and spawn an echo task on its far end.
    pub fn echo(tracker: Arc<CloseTracker>) -> Self {
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        spawn_echo(remote);
        Self {
            stream: local,
            tracker,
            closed: false,
        }
    }
}

fn spawn_echo(remote: DuplexStream) {
    tokio::spawn(async move {
        let (mut reader, mut writer) = tokio::io::split(remote);
        let _ = tokio::io::copy(&mut reader, &mut writer).await;
    });
}

impl AsyncRead for FakeConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for FakeConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[async_trait]
impl Close for FakeConn {
    async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.tracker.mark_closed();
        self.stream.shutdown().await
    }
}

impl Conn for FakeConn {}

impl Drop for FakeConn {
    fn drop(&mut self) {
        self.tracker.mark_released();
    }
}

/// [`DialFn`] that hands out tracked [`FakeConn`]s, or fails on demand.
#[derive(Default)]
pub struct FakeDialFn {
    fail: bool,
    dialed: Mutex<Vec<(NetAddr, NetAddr)>>,
    trackers: Mutex<Vec<Arc<CloseTracker>>>,
}

impl FakeDialFn {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        lock(&self.dialed).len()
    }

    /// `(from, to)` pairs in dial order.
    pub fn dialed(&self) -> Vec<(NetAddr, NetAddr)> {
        lock(&self.dialed).clone()
    }

    /// Tracker of the most recently dialed transport.
    pub fn last_transport(&self) -> Option<Arc<CloseTracker>> {
        lock(&self.trackers).last().cloned()
    }
}

#[async_trait]
impl DialFn for FakeDialFn {
    async fn dial(&self, from: &NetAddr, to: &NetAddr) -> io::Result<BoxConn> {
        lock(&self.dialed).push((from.clone(), to.clone()));
        if self.fail {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("connection to {to} refused"),
            ));
        }
        let tracker = CloseTracker::new();
        lock(&self.trackers).push(Arc::clone(&tracker));
        Ok(Box::new(FakeConn::echo(tracker)))
    }
}

/// How a [`FakeConnector`] handshake behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeBehavior {
    Accept,
    /// Fail and hand the transport back.
    Reject,
    /// Fail after dropping the transport.
    RejectConsumed,
    /// Never complete.
    Hang,
}

/// How the destination request on a fake session behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationBehavior {
    Accept,
    Reject,
}

/// Everything a fake session observed.
#[derive(Debug, Default)]
pub struct SessionLog {
    pub session: Arc<CloseTracker>,
    pub streams: Mutex<Vec<Arc<CloseTracker>>>,
    pub channels: Mutex<Vec<Arc<CloseTracker>>>,
    pub subsystems: Mutex<Vec<String>>,
    pub redials: Mutex<Vec<(String, NetAddr)>>,
}

impl SessionLog {
    pub fn last_stream(&self) -> Option<Arc<CloseTracker>> {
        lock(&self.streams).last().cloned()
    }

    pub fn last_channel(&self) -> Option<Arc<CloseTracker>> {
        lock(&self.channels).last().cloned()
    }

    pub fn subsystems(&self) -> Vec<String> {
        lock(&self.subsystems).clone()
    }

    pub fn redials(&self) -> Vec<(String, NetAddr)> {
        lock(&self.redials).clone()
    }
}

/// [`SessionConnector`] producing [`FakeSession`]s.
pub struct FakeConnector {
    handshake: HandshakeBehavior,
    destination: DestinationBehavior,
    connects: AtomicUsize,
    hints: Mutex<Vec<String>>,
    sessions: Mutex<Vec<Arc<SessionLog>>>,
}

impl FakeConnector {
    pub fn new(handshake: HandshakeBehavior, destination: DestinationBehavior) -> Arc<Self> {
        Arc::new(Self {
            handshake,
            destination,
            connects: AtomicUsize::new(0),
            hints: Mutex::default(),
            sessions: Mutex::default(),
        })
    }

    pub fn accepting() -> Arc<Self> {
        Self::new(HandshakeBehavior::Accept, DestinationBehavior::Accept)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Destination hints passed to the handshake.
    pub fn hints(&self) -> Vec<String> {
        lock(&self.hints).clone()
    }

    pub fn last_session(&self) -> Option<Arc<SessionLog>> {
        lock(&self.sessions).last().cloned()
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(
        &self,
        transport: BoxConn,
        dest_hint: &str,
        identity: &ClientIdentity,
    ) -> Result<Box<dyn Session>, HandshakeFailure> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        lock(&self.hints).push(dest_hint.to_string());

        match self.handshake {
            HandshakeBehavior::Accept => {}
            HandshakeBehavior::Reject => {
                return Err(HandshakeFailure::new(
                    io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        format!("user {} rejected", identity.user()),
                    ),
                    transport,
                ));
            }
            HandshakeBehavior::RejectConsumed => {
                drop(transport);
                return Err(HandshakeFailure::consumed(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "handshake aborted",
                )));
            }
            HandshakeBehavior::Hang => {
                // Hold the transport so a timeout has to drop it.
                let _held = transport;
                return std::future::pending().await;
            }
        }

        let log = Arc::new(SessionLog::default());
        lock(&self.sessions).push(Arc::clone(&log));
        Ok(Box::new(FakeSession {
            transport: tokio::sync::Mutex::new(transport),
            destination: self.destination,
            log,
            closed: false,
        }))
    }
}

/// A session that owns its transport and serves echoing streams.
pub struct FakeSession {
    transport: tokio::sync::Mutex<BoxConn>,
    destination: DestinationBehavior,
    log: Arc<SessionLog>,
    closed: bool,
}

#[async_trait]
impl Close for FakeSession {
    async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.log.session.mark_closed();
        self.transport.get_mut().close().await
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn dial(&self, network: &str, addr: &NetAddr) -> io::Result<BoxConn> {
        lock(&self.log.redials).push((network.to_string(), addr.clone()));
        if self.destination == DestinationBehavior::Reject {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("dial {addr} rejected"),
            ));
        }
        let tracker = CloseTracker::new();
        lock(&self.log.streams).push(Arc::clone(&tracker));
        Ok(Box::new(FakeConn::echo(tracker)))
    }

    async fn open_channel(&self) -> io::Result<Box<dyn SessionChannel>> {
        let tracker = CloseTracker::new();
        lock(&self.log.channels).push(Arc::clone(&tracker));

        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        spawn_echo(remote);
        let (stdout, stdin) = tokio::io::split(local);
        Ok(Box::new(FakeChannel {
            stdin: Some(Box::new(stdin)),
            stdout: Some(Box::new(stdout)),
            destination: self.destination,
            log: Arc::clone(&self.log),
            tracker,
            closed: false,
        }))
    }
}

/// A channel whose stdin is echoed back on its stdout.
pub struct FakeChannel {
    stdin: Option<BoxWriter>,
    stdout: Option<BoxReader>,
    destination: DestinationBehavior,
    log: Arc<SessionLog>,
    tracker: Arc<CloseTracker>,
    closed: bool,
}

#[async_trait]
impl Close for FakeChannel {
    async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.tracker.mark_closed();
        Ok(())
    }
}

impl Drop for FakeChannel {
    fn drop(&mut self) {
        self.tracker.mark_released();
    }
}

#[async_trait]
impl SessionChannel for FakeChannel {
    fn stdin(&mut self) -> io::Result<BoxWriter> {
        self.stdin
            .take()
            .ok_or_else(|| io::Error::other("stdin already taken"))
    }

    fn stdout(&mut self) -> io::Result<BoxReader> {
        self.stdout
            .take()
            .ok_or_else(|| io::Error::other("stdout already taken"))
    }

    async fn request_subsystem(&mut self, name: &str) -> io::Result<()> {
        lock(&self.log.subsystems).push(name.to_string());
        match self.destination {
            DestinationBehavior::Accept => Ok(()),
            DestinationBehavior::Reject => Err(io::Error::other(format!(
                "subsystem request {name} failed"
            ))),
        }
    }
}
