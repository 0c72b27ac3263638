//! End-to-end tests: a real client control against running server
//! controls over the loopback transport.
//!
//! The approval policy throughout is "a `Knock` gets in, anything else is
//! denied", so every flow here exercises the full handshake path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hopline::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// =========================================================================
// Actions and fixtures
// =========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Knock {
    name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Impostor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ping {
    n: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Chat {
    text: String,
}

const APP: &str = "hopline-test";

fn knock() -> Knock {
    Knock { name: "ada".into() }
}

fn codec() -> Arc<dyn Codec> {
    let mut registry = ActionRegistry::new();
    registry
        .register::<Knock>("Knock")
        .register::<Impostor>("Impostor")
        .register::<Ping>("Ping")
        .register::<Chat>("Chat");
    Arc::new(JsonCodec::new(Arc::new(registry)))
}

/// Binds a server in approval mode that admits `Knock` hails only.
fn start_server(net: &MemoryNetwork, port: u16) -> ServerControl<MemoryListener> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let listener = MemoryListener::bind(net, port, APP, true).expect("bind");
    let server = ServerControl::new(
        listener,
        ServerConfig::new(codec())
            .with_approval(|_, action| action.downcast_ref::<Knock>().is_some()),
    );
    server.start().expect("start");
    server
}

fn client(net: &MemoryNetwork) -> ClientControl<MemoryConnector> {
    ClientControl::new(
        MemoryConnector::new(net, APP),
        ClientConfig::new(codec()),
    )
}

async fn next_event<E>(rx: &mut mpsc::UnboundedReceiver<E>) -> E {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("event within 1s")
        .expect("event stream open")
}

/// Asserts that no further events arrive within a grace window.
async fn assert_quiet<E>(rx: &mut mpsc::UnboundedReceiver<E>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "expected no further events");
}

// =========================================================================
// Approval handshake
// =========================================================================

#[tokio::test]
async fn test_approved_hail_connects_exactly_once_per_side() {
    let net = MemoryNetwork::new();
    let server = start_server(&net, 9000);
    let mut server_events = server.subscribe();

    let client = client(&net);
    let mut client_events = client.subscribe();

    let success = client
        .connect("localhost", 9000, Some(&knock()))
        .await
        .expect("no precondition failure");

    assert!(success);
    assert!(client.is_connected());

    assert!(matches!(
        next_event(&mut server_events).await,
        ServerEvent::ApprovalGranted(_)
    ));
    assert!(matches!(
        next_event(&mut server_events).await,
        ServerEvent::Connected(_)
    ));
    assert_quiet(&mut server_events).await;

    assert!(matches!(
        next_event(&mut client_events).await,
        ClientEvent::Connected
    ));
    assert_quiet(&mut client_events).await;

    assert_eq!(server.registry().len(), 1);
}

#[tokio::test]
async fn test_denied_hail_fails_connect_without_connected_events() {
    let net = MemoryNetwork::new();
    let server = start_server(&net, 9001);
    let mut server_events = server.subscribe();

    let client = client(&net);
    let mut client_events = client.subscribe();

    let success = client
        .connect("localhost", 9001, Some(&Impostor))
        .await
        .expect("no precondition failure");

    assert!(!success);
    assert!(!client.is_connected());

    assert!(matches!(
        next_event(&mut server_events).await,
        ServerEvent::ApprovalDenied(_)
    ));
    assert_quiet(&mut server_events).await;
    assert_quiet(&mut client_events).await;

    assert!(server.registry().is_empty());
}

#[tokio::test]
async fn test_missing_hail_is_denied() {
    let net = MemoryNetwork::new();
    let server = start_server(&net, 9002);
    let mut server_events = server.subscribe();

    let client = client(&net);
    let success = client
        .connect("localhost", 9002, None)
        .await
        .expect("no precondition failure");

    assert!(!success);
    assert!(matches!(
        next_event(&mut server_events).await,
        ServerEvent::ApprovalDenied(_)
    ));
    assert!(server.registry().is_empty());
}

// =========================================================================
// Data flow and dispatch
// =========================================================================

#[tokio::test]
async fn test_client_action_dispatches_exactly_once_by_type() {
    let net = MemoryNetwork::new();
    let server = start_server(&net, 9003);
    let mut server_events = server.subscribe();

    let client = client(&net);
    assert!(client
        .connect("localhost", 9003, Some(&knock()))
        .await
        .unwrap());

    let remote = match next_event(&mut server_events).await {
        ServerEvent::ApprovalGranted(remote) => remote,
        other => panic!("expected ApprovalGranted, got {other:?}"),
    };
    let _ = next_event(&mut server_events).await; // Connected

    let pings = Arc::new(AtomicUsize::new(0));
    let chats = Arc::new(AtomicUsize::new(0));
    {
        let pings = Arc::clone(&pings);
        let _ = remote.dispatcher().subscribe::<Ping, _>(move |ping| {
            assert_eq!(ping.n, 7);
            pings.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let chats = Arc::clone(&chats);
        let _ = remote.dispatcher().subscribe::<Chat, _>(move |_| {
            chats.fetch_add(1, Ordering::SeqCst);
        });
    }
    let mut remote_messages = remote.subscribe();

    client.send(&Ping { n: 7 }, Delivery::default()).await.unwrap();

    // The control-level event carries the same decoded action...
    match next_event(&mut server_events).await {
        ServerEvent::Message { action, .. } => {
            assert_eq!(action.downcast_ref::<Ping>(), Some(&Ping { n: 7 }));
        }
        other => panic!("expected Message, got {other:?}"),
    }
    // ...and the per-connection channel saw it exactly once.
    let received = next_event(&mut remote_messages).await;
    assert_eq!(received.downcast_ref::<Ping>(), Some(&Ping { n: 7 }));
    assert_quiet(&mut remote_messages).await;

    assert_eq!(pings.load(Ordering::SeqCst), 1);
    assert_eq!(chats.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_server_send_and_broadcast_reach_client() {
    let net = MemoryNetwork::new();
    let server = start_server(&net, 9004);
    let mut server_events = server.subscribe();

    let client = client(&net);
    let mut client_events = client.subscribe();
    assert!(client
        .connect("localhost", 9004, Some(&knock()))
        .await
        .unwrap());
    let _ = next_event(&mut client_events).await; // Connected

    let remote = match next_event(&mut server_events).await {
        ServerEvent::ApprovalGranted(remote) => remote,
        other => panic!("expected ApprovalGranted, got {other:?}"),
    };
    let _ = next_event(&mut server_events).await; // Connected

    // Targeted send through the connection handle.
    remote
        .send(&Chat { text: "direct".into() }, Delivery::default())
        .await
        .unwrap();
    match next_event(&mut client_events).await {
        ClientEvent::Message(action) => {
            assert_eq!(
                action.downcast_ref::<Chat>(),
                Some(&Chat { text: "direct".into() })
            );
        }
        other => panic!("expected Message, got {other:?}"),
    }

    // Targeted send through the control.
    server
        .send(remote.id(), &Chat { text: "again".into() }, Delivery::default())
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut client_events).await,
        ClientEvent::Message(_)
    ));

    // Broadcast.
    server
        .broadcast(&Chat { text: "everyone".into() }, Delivery::default())
        .await
        .unwrap();
    match next_event(&mut client_events).await {
        ClientEvent::Message(action) => {
            assert_eq!(
                action.downcast_ref::<Chat>(),
                Some(&Chat { text: "everyone".into() })
            );
        }
        other => panic!("expected Message, got {other:?}"),
    }
}

#[tokio::test]
async fn test_broadcast_reaches_every_connected_client() {
    let net = MemoryNetwork::new();
    let server = start_server(&net, 9005);

    let first = client(&net);
    let second = client(&net);
    let mut first_events = first.subscribe();
    let mut second_events = second.subscribe();

    assert!(first
        .connect("localhost", 9005, Some(&knock()))
        .await
        .unwrap());
    assert!(second
        .connect("localhost", 9005, Some(&knock()))
        .await
        .unwrap());
    let _ = next_event(&mut first_events).await; // Connected
    let _ = next_event(&mut second_events).await; // Connected

    server
        .broadcast(&Ping { n: 3 }, Delivery::default())
        .await
        .unwrap();

    assert!(matches!(
        next_event(&mut first_events).await,
        ClientEvent::Message(_)
    ));
    assert!(matches!(
        next_event(&mut second_events).await,
        ClientEvent::Message(_)
    ));
}

// =========================================================================
// Disconnect flows
// =========================================================================

#[tokio::test]
async fn test_client_disconnect_notifies_server_and_is_idempotent() {
    let net = MemoryNetwork::new();
    let server = start_server(&net, 9006);
    let mut server_events = server.subscribe();

    let client = client(&net);
    let mut client_events = client.subscribe();
    assert!(client
        .connect("localhost", 9006, Some(&knock()))
        .await
        .unwrap());
    let _ = next_event(&mut client_events).await; // Connected
    let _ = next_event(&mut server_events).await; // ApprovalGranted
    let _ = next_event(&mut server_events).await; // Connected

    client.disconnect().await;
    client.disconnect().await;

    assert!(matches!(
        next_event(&mut client_events).await,
        ClientEvent::Disconnected
    ));
    assert_quiet(&mut client_events).await;

    assert!(matches!(
        next_event(&mut server_events).await,
        ServerEvent::Disconnected(_)
    ));
    assert!(server.registry().is_empty());
}

#[tokio::test]
async fn test_server_disconnect_notifies_client() {
    let net = MemoryNetwork::new();
    let server = start_server(&net, 9007);
    let mut server_events = server.subscribe();

    let client = client(&net);
    let mut client_events = client.subscribe();
    assert!(client
        .connect("localhost", 9007, Some(&knock()))
        .await
        .unwrap());
    let _ = next_event(&mut client_events).await; // Connected

    let remote = match next_event(&mut server_events).await {
        ServerEvent::ApprovalGranted(remote) => remote,
        other => panic!("expected ApprovalGranted, got {other:?}"),
    };
    let _ = next_event(&mut server_events).await; // Connected

    server.disconnect(remote.id(), "maintenance").await.unwrap();

    assert!(matches!(
        next_event(&mut server_events).await,
        ServerEvent::Disconnected(_)
    ));
    assert!(matches!(
        next_event(&mut client_events).await,
        ClientEvent::Disconnected
    ));
    assert!(!client.is_connected());
    assert!(server.registry().is_empty());
}

// =========================================================================
// The hop protocol
// =========================================================================

#[tokio::test]
async fn test_hop_migrates_connection_between_servers() {
    let net = MemoryNetwork::new();
    let first = start_server(&net, 9010);
    let second = start_server(&net, 9011);
    let mut first_events = first.subscribe();
    let mut second_events = second.subscribe();

    let client = client(&net);
    let mut client_events = client.subscribe();

    assert!(client
        .connect("localhost", 9010, Some(&knock()))
        .await
        .unwrap());
    let _ = next_event(&mut client_events).await; // Connected
    let _ = next_event(&mut first_events).await; // ApprovalGranted
    let _ = next_event(&mut first_events).await; // Connected
    assert_eq!(first.registry().len(), 1);
    assert!(second.registry().is_empty());

    let success = client
        .hop("localhost", 9011, Some(&knock()))
        .await
        .expect("no precondition failure");
    assert!(success);

    // The client saw exactly one Hopped, and neither Connected nor
    // Disconnected for the transition.
    assert!(matches!(
        next_event(&mut client_events).await,
        ClientEvent::Hopped
    ));
    assert_quiet(&mut client_events).await;
    assert!(client.is_connected());

    // The first server saw the old session leave; the second approved and
    // registered the new one.
    assert!(matches!(
        next_event(&mut first_events).await,
        ServerEvent::Disconnected(_)
    ));
    assert!(first.registry().is_empty());

    assert!(matches!(
        next_event(&mut second_events).await,
        ServerEvent::ApprovalGranted(_)
    ));
    assert!(matches!(
        next_event(&mut second_events).await,
        ServerEvent::Connected(_)
    ));
    assert_eq!(second.registry().len(), 1);

    // Traffic flows over the new session only.
    client.send(&Ping { n: 1 }, Delivery::default()).await.unwrap();
    assert!(matches!(
        next_event(&mut second_events).await,
        ServerEvent::Message { .. }
    ));
    assert_quiet(&mut first_events).await;
}

#[tokio::test]
async fn test_hop_denied_by_target_leaves_original_connected() {
    let net = MemoryNetwork::new();
    let first = start_server(&net, 9012);
    let second = start_server(&net, 9013);
    let mut first_events = first.subscribe();
    let mut second_events = second.subscribe();

    let client = client(&net);
    let mut client_events = client.subscribe();
    assert!(client
        .connect("localhost", 9012, Some(&knock()))
        .await
        .unwrap());
    let _ = next_event(&mut client_events).await; // Connected
    let _ = next_event(&mut first_events).await; // ApprovalGranted
    let _ = next_event(&mut first_events).await; // Connected

    // The target denies the Impostor hail.
    let success = client
        .hop("localhost", 9013, Some(&Impostor))
        .await
        .expect("no precondition failure");
    assert!(!success);

    assert!(matches!(
        next_event(&mut client_events).await,
        ClientEvent::HopFailed
    ));
    assert_quiet(&mut client_events).await;
    assert!(client.is_connected());
    assert!(!client.is_hopping());

    assert!(matches!(
        next_event(&mut second_events).await,
        ServerEvent::ApprovalDenied(_)
    ));
    assert!(second.registry().is_empty());

    // The original session never noticed and still carries traffic.
    assert_eq!(first.registry().len(), 1);
    client.send(&Ping { n: 2 }, Delivery::default()).await.unwrap();
    assert!(matches!(
        next_event(&mut first_events).await,
        ServerEvent::Message { .. }
    ));
}

#[tokio::test]
async fn test_hop_to_dead_endpoint_leaves_original_connected() {
    let net = MemoryNetwork::new();
    let first = start_server(&net, 9014);
    let mut first_events = first.subscribe();

    let client = client(&net);
    let mut client_events = client.subscribe();
    assert!(client
        .connect("localhost", 9014, Some(&knock()))
        .await
        .unwrap());
    let _ = next_event(&mut client_events).await; // Connected
    let _ = next_event(&mut first_events).await; // ApprovalGranted
    let _ = next_event(&mut first_events).await; // Connected

    let success = client
        .hop("localhost", 9999, Some(&knock()))
        .await
        .expect("no precondition failure");
    assert!(!success);

    assert!(matches!(
        next_event(&mut client_events).await,
        ClientEvent::HopFailed
    ));
    assert_quiet(&mut client_events).await;
    assert!(client.is_connected());
    assert_eq!(first.registry().len(), 1);

    client.send(&Ping { n: 3 }, Delivery::default()).await.unwrap();
    assert!(matches!(
        next_event(&mut first_events).await,
        ServerEvent::Message { .. }
    ));
}

#[tokio::test]
async fn test_hop_without_connection_is_a_precondition_failure() {
    let net = MemoryNetwork::new();
    let _server = start_server(&net, 9015);

    let client = client(&net);
    let result = client.hop("localhost", 9015, Some(&knock())).await;

    assert!(matches!(result, Err(ClientError::NotConnected)));
}

// =========================================================================
// Preconditions
// =========================================================================

#[tokio::test]
async fn test_send_without_connection_is_a_precondition_failure() {
    let net = MemoryNetwork::new();
    let client = client(&net);

    let result = client.send(&Ping { n: 0 }, Delivery::default()).await;

    assert!(matches!(result, Err(ClientError::NotConnected)));
}

#[tokio::test]
async fn test_double_start_fails_fast() {
    let net = MemoryNetwork::new();
    let server = start_server(&net, 9016);

    assert!(matches!(server.start(), Err(ServerError::AlreadyStarted)));
}
