#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! End-to-end dial tests over in-memory transports and fake sessions.
//!
//! Covers both dial paths (auth server re-dial and peer subsystem) and checks
//! that every layer is released on success and on each failure stage.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use relaytun_tunnel::test_utils::{
    DestinationBehavior, FakeConnector, FakeDialFn, HandshakeBehavior,
};
use relaytun_tunnel::{
    ClientIdentity, Close, Conn, DEFAULT_OFFLINE_THRESHOLD, DialError, DialEvent, DialEventKind,
    EventRecorder, Heartbeat, NetAddr, PeerDirectory, PeerEndpoint, PeerStatus, PeeredCluster,
    SessionOpener, TunnelClientConfig, TunnelDialer, TunnelDialerConfig,
};

fn identity() -> ClientIdentity {
    ClientIdentity::new("proxy", b"test-key".to_vec())
}

fn dialer(dial: &Arc<FakeDialFn>, connector: &Arc<FakeConnector>) -> TunnelDialer {
    TunnelDialer::new(TunnelDialerConfig {
        client: TunnelClientConfig::new(identity()),
        dial: Some(Arc::clone(dial) as _),
        connector: Some(Arc::clone(connector) as _),
        recorder: None,
    })
    .unwrap()
}

async fn assert_echo<C: Conn>(conn: &mut C, payload: &[u8]) {
    conn.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, payload);
}

// =========================================================================
// Auth server path
// =========================================================================

#[tokio::test]
async fn auth_server_dial_targets_sentinel_and_redials() {
    let dial = FakeDialFn::new();
    let connector = FakeConnector::accepting();
    let dialer = dialer(&dial, &connector);

    let mut conn = dialer
        .dial_auth_server("tcp", "127.0.0.1:3025")
        .await
        .unwrap();
    assert_echo(&mut conn, b"GET /v1/ping").await;

    let dialed = dial.dialed();
    assert_eq!(dialed.len(), 1);
    assert_eq!(dialed[0].0.addr(), "reversetunnel.proxy-dialer");
    assert_eq!(dialed[0].1.addr(), "@remote-auth-server");
    assert_eq!(connector.hints(), vec!["@remote-auth-server"]);

    let session = connector.last_session().unwrap();
    assert_eq!(
        session.redials(),
        vec![("tcp".to_string(), NetAddr::tcp("127.0.0.1:3025"))]
    );
    assert_eq!(conn.layers(), 2);
}

#[tokio::test]
async fn closing_composite_closes_every_layer_once() {
    let dial = FakeDialFn::new();
    let connector = FakeConnector::accepting();
    let dialer = dialer(&dial, &connector);

    let mut conn = dialer.dial_auth_server("tcp", "auth:3025").await.unwrap();
    let transport = dial.last_transport().unwrap();
    let session = connector.last_session().unwrap();
    let stream = session.last_stream().unwrap();

    assert_eq!(transport.close_count(), 0);
    conn.close().await.unwrap();
    assert_eq!(stream.close_count(), 1);
    assert_eq!(session.session.close_count(), 1);
    assert_eq!(transport.close_count(), 1);

    conn.close().await.unwrap();
    assert_eq!(stream.close_count(), 1);
    assert_eq!(session.session.close_count(), 1);
    assert_eq!(transport.close_count(), 1);
}

#[tokio::test]
async fn connect_failure_skips_handshake() {
    let dial = FakeDialFn::failing();
    let connector = FakeConnector::accepting();
    let dialer = dialer(&dial, &connector);

    let err = dialer.dial_auth_server("tcp", "auth:3025").await.err().unwrap();
    assert!(matches!(err, DialError::Connect { ref addr, .. } if addr == "@remote-auth-server"));
    assert_eq!(dial.calls(), 1);
    assert_eq!(connector.connects(), 0);
}

#[tokio::test]
async fn auth_failure_closes_transport() {
    let dial = FakeDialFn::new();
    let connector = FakeConnector::new(HandshakeBehavior::Reject, DestinationBehavior::Accept);
    let dialer = dialer(&dial, &connector);

    let err = dialer.dial_auth_server("tcp", "auth:3025").await.err().unwrap();
    assert!(matches!(err, DialError::Auth { .. }));
    assert_eq!(err.stage(), "auth");

    let transport = dial.last_transport().unwrap();
    assert_eq!(transport.close_count(), 1);
    assert!(connector.last_session().is_none());
}

#[tokio::test]
async fn handshake_timeout_closes_transport() {
    let dial = FakeDialFn::new();
    let connector = FakeConnector::new(HandshakeBehavior::Hang, DestinationBehavior::Accept);
    let dialer = TunnelDialer::new(TunnelDialerConfig {
        client: TunnelClientConfig::new(identity()).with_timeout(Duration::from_millis(50)),
        dial: Some(Arc::clone(&dial) as _),
        connector: Some(Arc::clone(&connector) as _),
        recorder: None,
    })
    .unwrap();
    assert_eq!(dialer.handshake_timeout(), Duration::from_millis(50));

    let err = dialer.dial_auth_server("tcp", "auth:3025").await.err().unwrap();
    assert!(
        matches!(err, DialError::AuthTimeout { timeout, .. } if timeout == Duration::from_millis(50))
    );
    let transport = dial.last_transport().unwrap();
    assert_eq!(transport.close_count(), 1);
    assert!(transport.is_released());
}

#[tokio::test]
async fn transport_dropped_by_connector_is_still_closed() {
    let dial = FakeDialFn::new();
    let connector =
        FakeConnector::new(HandshakeBehavior::RejectConsumed, DestinationBehavior::Accept);
    let dialer = dialer(&dial, &connector);

    let err = dialer.dial_auth_server("tcp", "auth:3025").await.err().unwrap();
    assert!(matches!(err, DialError::Auth { .. }));
    assert_eq!(dial.last_transport().unwrap().close_count(), 1);
}

#[tokio::test]
async fn redial_failure_closes_session_and_transport() {
    let dial = FakeDialFn::new();
    let connector = FakeConnector::new(HandshakeBehavior::Accept, DestinationBehavior::Reject);
    let dialer = dialer(&dial, &connector);

    let err = dialer.dial_auth_server("tcp", "auth:3025").await.err().unwrap();
    assert!(matches!(err, DialError::Destination { ref dest, .. } if dest == "auth:3025"));

    let session = connector.last_session().unwrap();
    assert_eq!(session.session.close_count(), 1);
    assert_eq!(dial.last_transport().unwrap().close_count(), 1);
}

// =========================================================================
// Configuration
// =========================================================================

#[tokio::test]
async fn unset_identity_fails_before_any_io() {
    let dial = FakeDialFn::new();
    let connector = FakeConnector::accepting();

    let err = TunnelDialer::new(TunnelDialerConfig {
        client: TunnelClientConfig::default(),
        dial: Some(Arc::clone(&dial) as _),
        connector: Some(Arc::clone(&connector) as _),
        recorder: None,
    })
    .err()
    .unwrap();

    assert!(err.is_config());
    assert_eq!(dial.calls(), 0);
    assert_eq!(connector.connects(), 0);
}

#[tokio::test]
async fn missing_dial_function_is_config_error() {
    let err = TunnelDialer::new(TunnelDialerConfig {
        client: TunnelClientConfig::new(identity()),
        connector: Some(FakeConnector::accepting() as _),
        ..TunnelDialerConfig::default()
    })
    .err()
    .unwrap();
    assert!(err.is_config());
}

#[tokio::test]
async fn opener_rejects_missing_identity_and_closes_transport() {
    let dial = FakeDialFn::new();
    let connector = FakeConnector::accepting();
    let opener = SessionOpener::new(Arc::clone(&connector) as _);

    let raw = relaytun_tunnel::DialFn::dial(
        dial.as_ref(),
        &NetAddr::tcp("a:1"),
        &NetAddr::tcp("b:2"),
    )
    .await
    .unwrap();
    let err = opener
        .open(raw, "b:2", &TunnelClientConfig::default())
        .await
        .err()
        .unwrap();

    assert!(err.is_config());
    assert_eq!(connector.connects(), 0);
    assert_eq!(dial.last_transport().unwrap().close_count(), 1);
}

// =========================================================================
// Peer path
// =========================================================================

#[tokio::test]
async fn peer_dial_requests_proxy_subsystem() {
    let dial = FakeDialFn::new();
    let connector = FakeConnector::accepting();
    let peer = PeerEndpoint::new("prod", "prod.proxy:3023", SystemTime::now());
    let cluster = PeeredCluster::new(
        peer,
        Arc::new(dialer(&dial, &connector)),
        DEFAULT_OFFLINE_THRESHOLD,
    );
    assert_eq!(cluster.to_string(), "peeredCluster(prod)");
    assert_eq!(cluster.status(), PeerStatus::Online);

    let from = NetAddr::tcp("client:50000");
    let to = NetAddr::tcp("host:22");
    let mut conn = cluster.dial(&from, &to).await.unwrap();

    let session = connector.last_session().unwrap();
    assert_eq!(session.subsystems(), vec!["proxy:host:22@prod"]);
    assert_eq!(dial.dialed()[0].1.addr(), "prod.proxy:3023");
    assert_eq!(connector.hints(), vec!["prod.proxy:3023"]);
    assert_eq!(conn.local_addr(), Some(&from));
    assert_eq!(conn.remote_addr(), Some(&to));

    assert_echo(&mut conn, b"SSH-2.0-OpenSSH_9.6\r\n").await;

    let channel = session.last_channel().unwrap();
    conn.close().await.unwrap();
    assert_eq!(channel.close_count(), 1);
    assert_eq!(session.session.close_count(), 1);
    assert_eq!(dial.last_transport().unwrap().close_count(), 1);
}

#[tokio::test]
async fn subsystem_failure_closes_channel_session_and_transport() {
    let dial = FakeDialFn::new();
    let connector = FakeConnector::new(HandshakeBehavior::Accept, DestinationBehavior::Reject);
    let dialer = dialer(&dial, &connector);
    let peer = PeerEndpoint::new("prod", "prod.proxy:3023", SystemTime::now());

    let err = dialer
        .dial_peer(&peer, &NetAddr::tcp("client:1"), &NetAddr::tcp("db:5432"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DialError::Destination { ref dest, .. } if dest == "db:5432@prod"));

    let session = connector.last_session().unwrap();
    assert_eq!(session.subsystems(), vec!["proxy:db:5432@prod"]);
    assert_eq!(session.last_channel().unwrap().close_count(), 1);
    assert_eq!(session.session.close_count(), 1);
    assert_eq!(dial.last_transport().unwrap().close_count(), 1);
}

#[tokio::test]
async fn parallel_peer_dials_are_independent() {
    let dial = FakeDialFn::new();
    let connector = FakeConnector::accepting();
    let dialer = Arc::new(dialer(&dial, &connector));

    let mut handles = Vec::new();
    for i in 0..4 {
        let dialer = Arc::clone(&dialer);
        handles.push(tokio::spawn(async move {
            let peer = PeerEndpoint::new(format!("c{i}"), format!("c{i}.proxy:3023"), SystemTime::now());
            let mut conn = dialer
                .dial_peer(&peer, &NetAddr::tcp("client:1"), &NetAddr::tcp("host:22"))
                .await
                .unwrap();
            conn.close().await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(dial.calls(), 4);
    assert_eq!(connector.connects(), 4);
}

#[tokio::test]
async fn directory_builds_dialable_cluster() {
    let dial = FakeDialFn::new();
    let connector = FakeConnector::accepting();
    let dialer = Arc::new(dialer(&dial, &connector));
    let directory = PeerDirectory::new(Duration::from_secs(25));
    directory
        .record_heartbeat(Heartbeat {
            cluster_name: "east".into(),
            proxy_address: "east.proxy:3023".into(),
            at: SystemTime::now() - Duration::from_secs(60),
        })
        .await;

    let cluster = directory.cluster("east", Arc::clone(&dialer)).await.unwrap();
    assert_eq!(cluster.status(), PeerStatus::Offline);
    assert_eq!(cluster.proxy_address(), "east.proxy:3023");
    assert!(directory.cluster("west", dialer).await.is_none());
}

// =========================================================================
// Events
// =========================================================================

#[derive(Default)]
struct Collect(Mutex<Vec<DialEvent>>);

impl EventRecorder for Collect {
    fn record(&self, event: DialEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[tokio::test]
async fn dial_outcomes_are_recorded() {
    let events = Arc::new(Collect::default());
    let dial = FakeDialFn::new();
    let dialer = TunnelDialer::new(TunnelDialerConfig {
        client: TunnelClientConfig::new(identity()),
        dial: Some(Arc::clone(&dial) as _),
        connector: Some(FakeConnector::new(
            HandshakeBehavior::Accept,
            DestinationBehavior::Reject,
        ) as _),
        recorder: Some(Arc::clone(&events) as _),
    })
    .unwrap();

    let peer = PeerEndpoint::new("prod", "prod.proxy:3023", SystemTime::now());
    let _ = dialer
        .dial_peer(&peer, &NetAddr::tcp("client:1"), &NetAddr::tcp("host:22"))
        .await;

    let recorded = events.0.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].kind, DialEventKind::Failed);
    assert_eq!(recorded[0].target, "host:22@prod");
    assert_eq!(recorded[0].stage, Some("destination"));
    assert!(recorded[0].timestamp.is_some());
}
