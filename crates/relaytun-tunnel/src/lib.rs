//! `relaytun` Tunnel Library
//!
//! Reaches services behind reverse tunnels by chaining three hops:
//! - **transport**: a raw connection to the tunnel intermediary, opened by a
//!   host-supplied [`DialFn`]
//! - **session**: an authenticated, multiplexed session over that transport,
//!   bounded by the handshake timeout
//! - **destination**: a re-dial or `proxy:<dest>@<cluster>` subsystem request
//!   inside the session
//!
//! The resulting resources are owned by a single [`LayeredConn`]. A
//! [`PeerDirectory`] tracks peer endpoints and their heartbeat status.

pub mod addr;
pub mod conn;
pub mod destination;
pub mod dialer;
pub mod directory;
pub mod error;
pub mod events;
pub mod layered;
pub mod peer;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;

pub use addr::{NetAddr, PROXY_DIALER_SOURCE, REMOTE_AUTH_SERVER};
pub use conn::{BoxConn, Close, Conn, PipeConn, StreamConn};
pub use destination::{DestinationRequest, subsystem_request};
pub use dialer::{PeeredCluster, TunnelDialer, TunnelDialerConfig};
pub use directory::{Heartbeat, PeerDirectory, spawn_heartbeat_listener};
pub use error::{DialError, Result};
pub use events::{DialEvent, DialEventKind, EventRecorder, record_event};
pub use layered::LayeredConn;
pub use peer::{
    DEFAULT_OFFLINE_THRESHOLD, HEARTBEAT_PERIOD, PeerEndpoint, PeerStatus, more_recent_first,
    peer_status, sort_by_recency,
};
pub use session::{
    ClientIdentity, DEFAULT_DIAL_TIMEOUT, HandshakeFailure, Session, SessionChannel,
    SessionConnector, SessionOpener, TunnelClientConfig,
};
pub use transport::{DialFn, FnDialer, TransportDialer, dial_fn};
