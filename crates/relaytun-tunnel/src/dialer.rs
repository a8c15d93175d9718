//! Multi-hop dialer: transport, then authenticated session, then the
//! destination request, all owned by one [`LayeredConn`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::info;

use crate::addr::{NetAddr, PROXY_DIALER_SOURCE, REMOTE_AUTH_SERVER};
use crate::conn::Close;
use crate::destination::DestinationRequest;
use crate::error::{DialError, Result};
use crate::events::{DialEvent, EventRecorder, record_event};
use crate::layered::{LayeredConn, release};
use crate::peer::{PeerEndpoint, PeerStatus};
use crate::session::{SessionConnector, SessionOpener, TunnelClientConfig};
use crate::transport::{DialFn, TransportDialer};

/// Collaborators and settings for a [`TunnelDialer`].
#[derive(Default)]
pub struct TunnelDialerConfig {
    /// Client identity and handshake timeout.
    pub client: TunnelClientConfig,
    /// Physical dial to the tunnel intermediary.
    pub dial: Option<Arc<dyn DialFn>>,
    /// Handshake implementation.
    pub connector: Option<Arc<dyn SessionConnector>>,
    /// Optional sink for dial outcome events.
    pub recorder: Option<Arc<dyn EventRecorder>>,
}

impl TunnelDialerConfig {
    /// Checks required collaborators and the identity, and sets the default
    /// handshake timeout.
    pub fn check_and_set_defaults(&mut self) -> Result<()> {
        if self.dial.is_none() {
            return Err(DialError::config("missing parameter dial"));
        }
        if self.connector.is_none() {
            return Err(DialError::config("missing parameter connector"));
        }
        self.client.check_and_set_defaults()
    }
}

/// Dials destinations through reverse tunnels.
///
/// Each call is independent; a `TunnelDialer` can be shared between tasks.
pub struct TunnelDialer {
    transport: TransportDialer,
    opener: SessionOpener,
    client: TunnelClientConfig,
    recorder: Option<Arc<dyn EventRecorder>>,
}

impl TunnelDialer {
    /// Validate `cfg` and build the dialer. Nothing is dialed here.
    pub fn new(mut cfg: TunnelDialerConfig) -> Result<Self> {
        cfg.check_and_set_defaults()?;
        let (Some(dial), Some(connector)) = (cfg.dial, cfg.connector) else {
            return Err(DialError::config("missing dial or connector"));
        };
        Ok(Self {
            transport: TransportDialer::new(dial),
            opener: SessionOpener::new(connector),
            client: cfg.client,
            recorder: cfg.recorder,
        })
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.client.effective_timeout()
    }

    /// Reach the remote cluster's auth server and re-dial `(network, addr)`
    /// inside the authenticated session.
    ///
    /// The transport is opened towards the non-resolvable
    /// [`REMOTE_AUTH_SERVER`] destination; the far end routes it to its auth
    /// service.
    pub async fn dial_auth_server(&self, network: &str, addr: &str) -> Result<LayeredConn> {
        let from = NetAddr::tcp(PROXY_DIALER_SOURCE);
        let to = NetAddr::remote_auth_server();
        let request = DestinationRequest::redial(network, NetAddr::new(network, addr));

        info!(network = %network, addr = %addr, "Dialing remote auth server through tunnel");
        let result = self
            .dial_through(&from, &to, REMOTE_AUTH_SERVER, &request)
            .await;
        self.record(REMOTE_AUTH_SERVER, &result);
        result
    }

    /// Forward `from -> to` through the peer's proxy using the
    /// `proxy:<to>@<cluster>` subsystem.
    pub async fn dial_peer(
        &self,
        peer: &PeerEndpoint,
        from: &NetAddr,
        to: &NetAddr,
    ) -> Result<LayeredConn> {
        info!(
            to = %to,
            cluster = %peer.cluster_name,
            proxy = %peer.proxy_address,
            "Forwarding through peer tunnel"
        );
        let proxy = NetAddr::tcp(peer.proxy_address.clone());
        let request = DestinationRequest::subsystem(from.clone(), to.clone(), &peer.cluster_name);

        let result = self
            .dial_through(from, &proxy, &peer.proxy_address, &request)
            .await;
        self.record(&request.target(), &result);
        result
    }

    /// Run the three stages. A failure at any stage releases every resource
    /// opened by earlier stages before returning.
    async fn dial_through(
        &self,
        from: &NetAddr,
        hop: &NetAddr,
        dest_hint: &str,
        request: &DestinationRequest,
    ) -> Result<LayeredConn> {
        let transport = self.transport.dial(from, hop).await?;
        let mut session = self.opener.open(transport, dest_hint, &self.client).await?;

        match request.send(session.as_ref(), dest_hint).await {
            Ok(stream) => Ok(LayeredConn::new(
                stream,
                vec![Box::new(session) as Box<dyn Close>],
            )),
            Err(e) => {
                release(&mut session, "session").await;
                Err(e)
            }
        }
    }

    fn record(&self, target: &str, result: &Result<LayeredConn>) {
        let event = match result {
            Ok(_) => DialEvent::succeeded(target),
            Err(e) => DialEvent::failed(target, e.stage()),
        };
        record_event(self.recorder.as_deref(), event);
    }
}

/// A remote cluster reachable through its peer proxy.
///
/// Holds a snapshot of the peer's endpoint; build a fresh one from the
/// directory before each attempt so status reflects the latest heartbeat.
#[derive(Clone)]
pub struct PeeredCluster {
    endpoint: PeerEndpoint,
    dialer: Arc<TunnelDialer>,
    offline_threshold: Duration,
}

impl PeeredCluster {
    pub const fn new(
        endpoint: PeerEndpoint,
        dialer: Arc<TunnelDialer>,
        offline_threshold: Duration,
    ) -> Self {
        Self {
            endpoint,
            dialer,
            offline_threshold,
        }
    }

    pub fn name(&self) -> &str {
        &self.endpoint.cluster_name
    }

    pub fn proxy_address(&self) -> &str {
        &self.endpoint.proxy_address
    }

    pub const fn last_connected(&self) -> SystemTime {
        self.endpoint.last_heartbeat
    }

    pub fn status(&self) -> PeerStatus {
        self.status_at(SystemTime::now())
    }

    pub fn status_at(&self, now: SystemTime) -> PeerStatus {
        self.endpoint.status(now, self.offline_threshold)
    }

    /// Connect a requesting client to `to`, a host inside this cluster.
    pub async fn dial(&self, from: &NetAddr, to: &NetAddr) -> Result<LayeredConn> {
        self.dialer.dial_peer(&self.endpoint, from, to).await
    }
}

impl fmt::Display for PeeredCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peeredCluster({})", self.endpoint.cluster_name)
    }
}
