//! Second hop: authenticating over a raw transport to get a multiplexed
//! session.
//!
//! The handshake itself (SSH, TLS, ...) is provided by a [`SessionConnector`]
//! implementation. This module owns the policy around it: identity checks
//! before any I/O, the handshake deadline, and releasing the transport when
//! authentication fails.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::addr::NetAddr;
use crate::conn::{BoxConn, BoxReader, BoxWriter, Close, Conn};
use crate::error::{DialError, Result};
use crate::layered::release;

/// Handshake deadline used when none is configured.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials presented during the tunnel handshake.
///
/// The key material is opaque to this crate and never printed.
#[derive(Clone)]
pub struct ClientIdentity {
    user: String,
    key_material: Arc<[u8]>,
}

impl ClientIdentity {
    pub fn new(user: impl Into<String>, key_material: impl Into<Arc<[u8]>>) -> Self {
        Self {
            user: user.into(),
            key_material: key_material.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn key_material(&self) -> &[u8] {
        &self.key_material
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("user", &self.user)
            .field("key_material", &format_args!("<{} bytes>", self.key_material.len()))
            .finish()
    }
}

/// Client-side tunnel settings.
#[derive(Debug, Clone, Default)]
pub struct TunnelClientConfig {
    pub identity: Option<ClientIdentity>,
    /// Bound on the handshake only. `None` or zero means [`DEFAULT_DIAL_TIMEOUT`].
    pub timeout: Option<Duration>,
}

impl TunnelClientConfig {
    pub const fn new(identity: ClientIdentity) -> Self {
        Self {
            identity: Some(identity),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The identity, or a config error when it is missing or has no user.
    pub fn identity(&self) -> Result<&ClientIdentity> {
        match &self.identity {
            None => Err(DialError::config("missing client identity")),
            Some(id) if id.user.is_empty() => Err(DialError::config("missing identity user")),
            Some(id) => Ok(id),
        }
    }

    pub fn effective_timeout(&self) -> Duration {
        match self.timeout {
            Some(t) if !t.is_zero() => t,
            _ => DEFAULT_DIAL_TIMEOUT,
        }
    }

    /// Validate the identity and pin the timeout to its effective value.
    pub fn check_and_set_defaults(&mut self) -> Result<()> {
        self.identity()?;
        self.timeout = Some(self.effective_timeout());
        Ok(())
    }
}

/// An authenticated, multiplexed session. Owns its transport: closing the
/// session closes the transport too.
#[async_trait]
pub trait Session: Close + Sync {
    /// Ask the far end to dial `addr` and return the resulting stream.
    async fn dial(&self, network: &str, addr: &NetAddr) -> io::Result<BoxConn>;

    /// Open a new session-level channel.
    async fn open_channel(&self) -> io::Result<Box<dyn SessionChannel>>;
}

/// A single channel inside a [`Session`], used for subsystem requests.
#[async_trait]
pub trait SessionChannel: Close {
    /// Take the channel's standard-input pipe. Fails if already taken.
    fn stdin(&mut self) -> io::Result<BoxWriter>;

    /// Take the channel's standard-output pipe. Fails if already taken.
    fn stdout(&mut self) -> io::Result<BoxReader>;

    async fn request_subsystem(&mut self, name: &str) -> io::Result<()>;
}

/// A failed handshake. The connector hands the transport back when it still
/// owns it so the opener can close it explicitly.
pub struct HandshakeFailure {
    pub error: io::Error,
    pub transport: Option<BoxConn>,
}

impl HandshakeFailure {
    pub const fn new(error: io::Error, transport: BoxConn) -> Self {
        Self {
            error,
            transport: Some(transport),
        }
    }

    /// The connector no longer holds the transport. The opener still closes
    /// it through its own handle.
    pub const fn consumed(error: io::Error) -> Self {
        Self {
            error,
            transport: None,
        }
    }
}

impl fmt::Debug for HandshakeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeFailure")
            .field("error", &self.error)
            .field("transport_returned", &self.transport.is_some())
            .finish()
    }
}

/// Performs the protocol handshake over a raw transport.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        transport: BoxConn,
        dest_hint: &str,
        identity: &ClientIdentity,
    ) -> std::result::Result<Box<dyn Session>, HandshakeFailure>;
}

/// Applies identity checks and the handshake deadline around a
/// [`SessionConnector`].
#[derive(Clone)]
pub struct SessionOpener {
    connector: Arc<dyn SessionConnector>,
}

impl SessionOpener {
    pub fn new(connector: Arc<dyn SessionConnector>) -> Self {
        Self { connector }
    }

    /// Authenticate over `raw` and return the session.
    ///
    /// On any error `raw` has been closed before this returns, including when
    /// the handshake is abandoned at the deadline.
    pub async fn open(
        &self,
        mut raw: BoxConn,
        dest_hint: &str,
        cfg: &TunnelClientConfig,
    ) -> Result<Box<dyn Session>> {
        let identity = match cfg.identity() {
            Ok(identity) => identity,
            Err(e) => {
                release(&mut raw, "transport").await;
                return Err(e);
            }
        };

        let deadline = cfg.effective_timeout();
        debug!(dest = %dest_hint, user = %identity.user(), timeout_ms = deadline.as_millis(), "Authenticating tunnel session");

        let (transport, slot) = HandshakeTransport::wrap(raw);
        let outcome = timeout(
            deadline,
            self.connector
                .connect(Box::new(transport), dest_hint, identity),
        )
        .await;

        let err = match outcome {
            Ok(Ok(session)) => {
                debug!(dest = %dest_hint, "Tunnel session established");
                return Ok(session);
            }
            Ok(Err(HandshakeFailure { error, transport })) => {
                warn!(dest = %dest_hint, error = %error, "Tunnel authentication failed");
                if let Some(mut transport) = transport {
                    release(&mut transport, "transport").await;
                }
                DialError::Auth {
                    addr: dest_hint.to_string(),
                    source: error,
                }
            }
            Err(_) => {
                warn!(dest = %dest_hint, timeout_ms = deadline.as_millis(), "Tunnel authentication timed out");
                DialError::AuthTimeout {
                    addr: dest_hint.to_string(),
                    timeout: deadline,
                }
            }
        };

        // Covers a timed-out handshake and a connector that dropped the
        // transport instead of handing it back.
        if let Some(mut raw) = take_transport(&slot) {
            release(&mut raw, "transport").await;
        }
        Err(err)
    }
}

type TransportSlot = Arc<Mutex<Option<BoxConn>>>;

fn take_transport(slot: &TransportSlot) -> Option<BoxConn> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// The transport as seen by a [`SessionConnector`].
///
/// The opener keeps a second handle on the underlying connection so it can
/// still close it after the handshake future is dropped. Once closed through
/// either handle, reads and writes fail with `NotConnected`.
struct HandshakeTransport {
    slot: TransportSlot,
    local: Option<NetAddr>,
    remote: Option<NetAddr>,
}

impl HandshakeTransport {
    fn wrap(raw: BoxConn) -> (Self, TransportSlot) {
        let local = raw.local_addr().cloned();
        let remote = raw.remote_addr().cloned();
        let slot = Arc::new(Mutex::new(Some(raw)));
        let transport = Self {
            slot: Arc::clone(&slot),
            local,
            remote,
        };
        (transport, slot)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(Pin<&mut BoxConn>) -> Poll<io::Result<T>>,
    ) -> Poll<io::Result<T>> {
        let mut guard = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(conn) => f(Pin::new(conn)),
            None => Poll::Ready(Err(io::ErrorKind::NotConnected.into())),
        }
    }
}

impl AsyncRead for HandshakeTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.with_conn(|conn| conn.poll_read(cx, buf))
    }
}

impl AsyncWrite for HandshakeTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.with_conn(|conn| conn.poll_write(cx, data))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.with_conn(|conn| conn.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.with_conn(|conn| conn.poll_shutdown(cx))
    }
}

#[async_trait]
impl Close for HandshakeTransport {
    async fn close(&mut self) -> io::Result<()> {
        match take_transport(&self.slot) {
            Some(mut raw) => raw.close().await,
            None => Ok(()),
        }
    }
}

impl Conn for HandshakeTransport {
    fn local_addr(&self) -> Option<&NetAddr> {
        self.local.as_ref()
    }

    fn remote_addr(&self) -> Option<&NetAddr> {
        self.remote.as_ref()
    }
}
