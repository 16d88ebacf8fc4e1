//! End-to-end table sessions over the in-process and TCP transports.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use table_session::config::{NetworkSettings, SessionConfig};
use table_session::error::{ProtocolError, SessionFailure};
use table_session::protocol::message::{Envelope, Message};
use table_session::{
    ConnectionState, LocalTransport, NetworkEvent, NodeController, NodeRole, Password,
    TcpTransport, Transport,
};

const TABLE: &str = "table";

struct Recorder {
    events: Arc<Mutex<Vec<NetworkEvent>>>,
}

impl Recorder {
    fn attach(node: &NodeController) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        node.add_listener(move |event| sink.lock().unwrap().push(event.clone()));
        Self { events }
    }

    fn events(&self) -> Vec<NetworkEvent> {
        self.events.lock().unwrap().clone()
    }

    fn disconnects(&self) -> Vec<Option<SessionFailure>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                NetworkEvent::Disconnected { error } => Some(error),
                _ => None,
            })
            .collect()
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

fn names(node: &NodeController) -> Vec<String> {
    node.players().into_iter().map(|p| p.name).collect()
}

fn node(transport: &LocalTransport) -> NodeController {
    NodeController::new(Arc::new(transport.clone()), NetworkSettings::default())
}

async fn hosted(transport: &LocalTransport, password: &str) -> (NodeController, u16) {
    let host = node(transport);
    host.host(SessionConfig::new(TABLE, 0, Password::new(password), "alice"))
        .await
        .unwrap();
    let addr = host.local_addr().unwrap();
    let port = addr.rsplit(':').next().unwrap().parse().unwrap();
    (host, port)
}

#[tokio::test]
async fn test_join_admits_player_on_both_sides() {
    let transport = LocalTransport::new();
    let (host, port) = hosted(&transport, "felt").await;
    let host_events = Recorder::attach(&host);

    let client = node(&transport);
    let client_events = Recorder::attach(&client);
    client
        .join(SessionConfig::new(TABLE, port, Password::new("felt"), "bob"))
        .await
        .unwrap();

    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.role(), Some(NodeRole::Client));
    eventually("host roster", || names(&host) == ["alice", "bob"]).await;
    eventually("client roster", || names(&client) == ["alice", "bob"]).await;

    assert_eq!(
        client_events.events().first(),
        Some(&NetworkEvent::Connected {
            role: NodeRole::Client
        })
    );
    assert!(host_events
        .events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::PlayersUpdated { players } if players.len() == 2)));
    assert_eq!(host.metrics().handshakes_success, 1);
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let transport = LocalTransport::new();
    let (host, port) = hosted(&transport, "felt").await;

    let client = node(&transport);
    let client_events = Recorder::attach(&client);
    let err = client
        .join(SessionConfig::new(TABLE, port, Password::new("baize"), "bob"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProtocolError::Session(SessionFailure::AuthenticationFailed)
    ));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(
        client_events.disconnects(),
        vec![Some(SessionFailure::AuthenticationFailed)]
    );
    assert!(!client_events
        .events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::Connected { .. })));

    eventually("host drops the connection", || {
        host.metrics().connections_active == 0
    })
    .await;
    assert_eq!(names(&host), ["alice"]);
    assert_eq!(host.metrics().handshakes_failed, 1);
}

#[tokio::test]
async fn test_duplicate_player_name_is_rejected() {
    let transport = LocalTransport::new();
    let (host, port) = hosted(&transport, "felt").await;

    let first = node(&transport);
    first
        .join(SessionConfig::new(TABLE, port, Password::new("felt"), "bob"))
        .await
        .unwrap();

    let second = node(&transport);
    let err = second
        .join(SessionConfig::new(TABLE, port, Password::new("felt"), "bob"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Session(SessionFailure::PlayerAlreadyConnected(ref name)) if name == "bob"
    ));

    let impostor = node(&transport);
    let err = impostor
        .join(SessionConfig::new(TABLE, port, Password::new("felt"), "alice"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Session(SessionFailure::PlayerAlreadyConnected(_))
    ));

    assert_eq!(names(&host), ["alice", "bob"]);
    assert!(first.is_connected());
}

#[tokio::test]
async fn test_join_while_connected_is_illegal() {
    let transport = LocalTransport::new();
    let (_host, port) = hosted(&transport, "felt").await;

    let client = node(&transport);
    client
        .join(SessionConfig::new(TABLE, port, Password::new("felt"), "bob"))
        .await
        .unwrap();
    let err = client
        .join(SessionConfig::new(TABLE, port, Password::new("felt"), "bob"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::IllegalConnectionState(ConnectionState::Connected)
    ));
}

#[tokio::test]
async fn test_client_disconnect_updates_host_roster() {
    let transport = LocalTransport::new();
    let (host, port) = hosted(&transport, "felt").await;

    let client = node(&transport);
    let client_events = Recorder::attach(&client);
    client
        .join(SessionConfig::new(TABLE, port, Password::new("felt"), "bob"))
        .await
        .unwrap();
    eventually("bob seated", || names(&host).len() == 2).await;

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.players().is_empty());
    assert_eq!(client_events.disconnects(), vec![None]);

    eventually("bob released", || names(&host) == ["alice"]).await;
    assert!(host.is_connected());

    // A second disconnect is a no-op.
    client.disconnect();
    assert_eq!(client_events.disconnects().len(), 1);
}

#[tokio::test]
async fn test_host_disconnect_stops_clients() {
    let transport = LocalTransport::new();
    let (host, port) = hosted(&transport, "felt").await;

    let client = node(&transport);
    let client_events = Recorder::attach(&client);
    client
        .join(SessionConfig::new(TABLE, port, Password::new("felt"), "bob"))
        .await
        .unwrap();
    eventually("bob seated", || names(&host).len() == 2).await;

    let host_events = Recorder::attach(&host);
    host.disconnect();
    assert_eq!(host_events.disconnects(), vec![None]);

    eventually("client notices", || !client.is_connected()).await;
    assert_eq!(
        client_events.disconnects(),
        vec![Some(SessionFailure::PeerStopped)]
    );
    assert!(client.players().is_empty());

    // No roster events once disconnected.
    let after = host_events.events().len();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(host_events.events().len(), after);
}

#[tokio::test]
async fn test_silent_peer_is_timed_out() {
    let transport = LocalTransport::new();
    let settings = NetworkSettings {
        handshake_timeout: Duration::from_millis(200),
        ..NetworkSettings::default()
    };
    let host = NodeController::new(Arc::new(transport.clone()), settings);
    host.host(SessionConfig::new(TABLE, 9, Password::new("felt"), "alice"))
        .await
        .unwrap();

    let connection = transport.connect(TABLE, 9).await.unwrap();
    let (_sender, mut inbound) = connection.split();
    let frame = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .expect("host should answer")
        .expect("frame");
    let envelope = Envelope::decode(&frame).unwrap();
    assert!(matches!(
        envelope.message,
        Message::Stop(ref stop) if stop.error == Some(SessionFailure::HandshakeTimeout)
    ));
    assert_eq!(names(&host), ["alice"]);
}

#[tokio::test]
async fn test_garbage_frames_do_not_close_connection() {
    let transport = LocalTransport::new();
    let (host, port) = hosted(&transport, "felt").await;

    let connection = transport.connect(TABLE, port).await.unwrap();
    let (sender, _inbound) = connection.split();
    assert!(sender.send(bytes::Bytes::from_static(b"\x00\x01 not a frame")));

    eventually("frame dropped", || host.metrics().messages_dropped == 1).await;
    assert_eq!(host.metrics().connections_active, 1);
}

#[tokio::test]
async fn test_session_over_tcp() {
    let settings = NetworkSettings::default();
    let transport = TcpTransport::from_settings(&settings);
    let host = NodeController::new(Arc::new(transport.clone()), settings.clone());
    host.host(SessionConfig::new("127.0.0.1", 0, Password::new("felt"), "alice"))
        .await
        .unwrap();
    let port: u16 = host
        .local_addr()
        .unwrap()
        .rsplit(':')
        .next()
        .unwrap()
        .parse()
        .unwrap();

    let client = NodeController::new(Arc::new(transport), settings);
    client
        .join(SessionConfig::new("127.0.0.1", port, Password::new("felt"), "bob"))
        .await
        .unwrap();

    eventually("tcp roster", || names(&client) == ["alice", "bob"]).await;
    client.disconnect();
    eventually("bob released", || names(&host) == ["alice"]).await;
    host.disconnect();
}
