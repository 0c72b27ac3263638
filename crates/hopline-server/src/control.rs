//! The server control: approval handshake, registry bookkeeping, and data
//! dispatch on one processing task.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use hopline_dispatch::EventBus;
use hopline_protocol::{Action, Codec};
use hopline_transport::{
    ConnectionId, Delivery, Listener, ListenerEvent, PeerStatus,
};

use crate::config::ApprovalCheck;
use crate::{
    RemoteConnection, RemoteConnectionRegistry, ServerConfig, ServerError,
};

/// Notifications raised by a [`ServerControl`].
pub enum ServerEvent<L: Listener> {
    /// A peer completed the connection handshake and was registered.
    Connected(Arc<RemoteConnection<L>>),
    /// A registered peer disconnected and was removed.
    Disconnected(Arc<RemoteConnection<L>>),
    /// The approval policy accepted a pending peer.
    ApprovalGranted(Arc<RemoteConnection<L>>),
    /// The approval policy rejected a pending peer, or its hail payload
    /// was missing or undecodable.
    ApprovalDenied(Arc<RemoteConnection<L>>),
    /// A registered peer sent an action.
    Message {
        /// The sending peer.
        conn: Arc<RemoteConnection<L>>,
        /// The decoded action.
        action: Action,
    },
}

impl<L: Listener> Clone for ServerEvent<L> {
    fn clone(&self) -> Self {
        match self {
            Self::Connected(c) => Self::Connected(Arc::clone(c)),
            Self::Disconnected(c) => Self::Disconnected(Arc::clone(c)),
            Self::ApprovalGranted(c) => Self::ApprovalGranted(Arc::clone(c)),
            Self::ApprovalDenied(c) => Self::ApprovalDenied(Arc::clone(c)),
            Self::Message { conn, action } => Self::Message {
                conn: Arc::clone(conn),
                action: Arc::clone(action),
            },
        }
    }
}

impl<L: Listener> fmt::Debug for ServerEvent<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(c) => write!(f, "Connected({})", c.id()),
            Self::Disconnected(c) => write!(f, "Disconnected({})", c.id()),
            Self::ApprovalGranted(c) => {
                write!(f, "ApprovalGranted({})", c.id())
            }
            Self::ApprovalDenied(c) => {
                write!(f, "ApprovalDenied({})", c.id())
            }
            Self::Message { conn, .. } => {
                write!(f, "Message({}, ..)", conn.id())
            }
        }
    }
}

/// State shared between the control and its processing task.
struct ServerShared<L: Listener> {
    listener: Arc<L>,
    codec: Arc<dyn Codec>,
    approval: Option<ApprovalCheck<L>>,
    registry: RemoteConnectionRegistry<L>,
    events: EventBus<ServerEvent<L>>,
}

/// Accepts inbound connections, runs the approval handshake, and fans out
/// per-connection traffic.
///
/// All registry mutation happens on the single processing task spawned by
/// [`start`](Self::start), so approval decisions, connect/disconnect
/// bookkeeping, and data dispatch never race each other.
pub struct ServerControl<L: Listener> {
    shared: Arc<ServerShared<L>>,
    cancel: watch::Sender<bool>,
    process: Mutex<Option<JoinHandle<()>>>,
}

impl<L: Listener> ServerControl<L> {
    /// Creates a control over a bound listener.
    ///
    /// The listener decides whether approval requests are delivered at
    /// all; bind it in approval mode when the config carries an
    /// [`ApprovalCheck`](crate::ApprovalCheck).
    pub fn new(listener: L, config: ServerConfig<L>) -> Self {
        let ServerConfig { codec, approval } = config;
        let shared = Arc::new(ServerShared {
            listener: Arc::new(listener),
            codec,
            approval,
            registry: RemoteConnectionRegistry::new(),
            events: EventBus::new(),
        });
        let (cancel, _) = watch::channel(false);
        Self {
            shared,
            cancel,
            process: Mutex::new(None),
        }
    }

    /// Starts the processing loop.
    ///
    /// # Errors
    /// [`ServerError::AlreadyStarted`] if the loop is already running.
    pub fn start(&self) -> Result<(), ServerError> {
        let mut process = self.process.lock().unwrap();
        if process.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.subscribe();
        *process = Some(tokio::spawn(process_loop(shared, cancel)));
        tracing::info!("server control started");
        Ok(())
    }

    /// Signals the processing loop to stop.
    ///
    /// The event being processed drains; events still queued behind it are
    /// abandoned. Idempotent.
    pub fn stop(&self) {
        self.cancel.send_replace(true);
    }

    /// Registers a subscriber for this control's events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ServerEvent<L>> {
        self.shared.events.subscribe()
    }

    /// Returns the connection registry, for lookups from application
    /// threads.
    pub fn registry(&self) -> &RemoteConnectionRegistry<L> {
        &self.shared.registry
    }

    /// Returns a snapshot of all registered connections.
    pub fn connections(&self) -> Vec<Arc<RemoteConnection<L>>> {
        self.shared.registry.all()
    }

    /// Encodes and transmits an action to one registered connection.
    ///
    /// # Errors
    /// [`ServerError::UnknownConnection`] if the connection is not
    /// registered; transport or encode failures otherwise.
    pub async fn send(
        &self,
        conn: ConnectionId,
        action: &(dyn Any + Send + Sync),
        delivery: Delivery,
    ) -> Result<(), ServerError> {
        if self.shared.registry.get(conn).is_none() {
            return Err(ServerError::UnknownConnection(conn));
        }
        let bytes = self.shared.codec.encode(action)?;
        self.shared
            .listener
            .send(conn, &bytes, delivery)
            .await
            .map_err(|e| ServerError::Transport(Box::new(e)))
    }

    /// Encodes an action once and transmits it to every registered
    /// connection.
    pub async fn broadcast(
        &self,
        action: &(dyn Any + Send + Sync),
        delivery: Delivery,
    ) -> Result<(), ServerError> {
        let bytes = self.shared.codec.encode(action)?;
        self.shared
            .listener
            .broadcast(&bytes, delivery)
            .await
            .map_err(|e| ServerError::Transport(Box::new(e)))
    }

    /// Disconnects a registered connection. Removal from the registry and
    /// the `Disconnected` event follow through the processing loop.
    ///
    /// # Errors
    /// [`ServerError::UnknownConnection`] if the connection is not
    /// registered.
    pub async fn disconnect(
        &self,
        conn: ConnectionId,
        reason: &str,
    ) -> Result<(), ServerError> {
        if self.shared.registry.get(conn).is_none() {
            return Err(ServerError::UnknownConnection(conn));
        }
        self.shared
            .listener
            .disconnect(conn, reason)
            .await
            .map_err(|e| ServerError::Transport(Box::new(e)))
    }
}

impl<L: Listener> Drop for ServerControl<L> {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
    }
}

async fn process_loop<L: Listener>(
    shared: Arc<ServerShared<L>>,
    mut cancel: watch::Receiver<bool>,
) {
    if *cancel.borrow() {
        return;
    }
    loop {
        tokio::select! {
            _ = cancel.changed() => break,
            event = shared.listener.recv() => match event {
                Some(event) => shared.handle_event(event).await,
                None => break,
            },
        }
    }
    tracing::debug!("server processing loop stopped");
}

impl<L: Listener> ServerShared<L> {
    async fn handle_event(&self, event: ListenerEvent) {
        match event {
            ListenerEvent::ApprovalRequested { conn, hail } => {
                self.on_approval(conn, hail).await;
            }
            ListenerEvent::StatusChanged { conn, status } => {
                match status {
                    PeerStatus::Connected => self.on_connected(conn),
                    PeerStatus::Disconnected => self.on_disconnected(conn),
                }
            }
            ListenerEvent::Data { conn, payload } => {
                self.on_data(conn, &payload);
            }
        }
    }

    fn remote(&self, conn: ConnectionId) -> Arc<RemoteConnection<L>> {
        self.registry.get_or_insert_with(conn, || {
            RemoteConnection::new(
                conn,
                Arc::clone(&self.listener),
                Arc::clone(&self.codec),
            )
        })
    }

    async fn on_approval(&self, conn: ConnectionId, hail: Option<Vec<u8>>) {
        let Some(check) = self.approval.as_ref() else {
            // No policy configured: accept, as a listener without approval
            // mode would have.
            if let Err(e) = self.listener.approve(conn).await {
                tracing::debug!(%conn, error = %e, "approve failed");
            }
            return;
        };

        let decoded = hail.as_deref().map(|bytes| self.codec.decode(bytes));
        let remote = self.remote(conn);

        let granted = match &decoded {
            Some(Ok(action)) => check(&remote, action.as_ref()),
            Some(Err(e)) => {
                tracing::warn!(
                    %conn,
                    error = %e,
                    "approval hail failed to decode; denying"
                );
                false
            }
            None => {
                tracing::warn!(%conn, "approval requested without hail; denying");
                false
            }
        };

        if granted {
            if let Err(e) = self.listener.approve(conn).await {
                tracing::warn!(%conn, error = %e, "approve failed");
            }
            tracing::info!(%conn, "approval granted");
            self.events.emit(ServerEvent::ApprovalGranted(remote));
        } else {
            if matches!(decoded, Some(Ok(_))) {
                tracing::info!(%conn, "approval denied by policy");
            }
            if let Err(e) = self.listener.deny(conn).await {
                tracing::debug!(%conn, error = %e, "deny failed");
            }
            // The provisional registration must not outlive the denial.
            self.registry.remove(conn);
            self.events.emit(ServerEvent::ApprovalDenied(remote));
        }
    }

    fn on_connected(&self, conn: ConnectionId) {
        let remote = self.remote(conn);
        tracing::info!(%conn, "peer connected");
        self.events.emit(ServerEvent::Connected(remote));
    }

    fn on_disconnected(&self, conn: ConnectionId) {
        match self.registry.remove(conn) {
            Some(remote) => {
                tracing::info!(%conn, "peer disconnected");
                self.events.emit(ServerEvent::Disconnected(remote));
            }
            None => {
                // Duplicate or post-denial notification.
                tracing::debug!(%conn, "disconnect for unknown connection");
            }
        }
    }

    fn on_data(&self, conn: ConnectionId, payload: &[u8]) {
        let Some(remote) = self.registry.get(conn) else {
            tracing::debug!(%conn, "dropping payload from unknown connection");
            return;
        };
        match self.codec.decode(payload) {
            Ok(action) => {
                remote.deliver(&action);
                self.events.emit(ServerEvent::Message {
                    conn: remote,
                    action,
                });
            }
            Err(e) => {
                tracing::warn!(
                    %conn,
                    error = %e,
                    "dropping undecodable payload"
                );
            }
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use hopline_protocol::{ActionRegistry, JsonCodec};
    use hopline_transport::{
        Connector, Link, MemoryConnector, MemoryListener, MemoryNetwork,
    };
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Knock {
        name: String,
    }

    const APP: &str = "server-test";

    fn codec() -> Arc<dyn Codec> {
        let mut registry = ActionRegistry::new();
        registry.register::<Knock>("Knock");
        Arc::new(JsonCodec::new(Arc::new(registry)))
    }

    fn server(
        net: &MemoryNetwork,
        port: u16,
    ) -> ServerControl<MemoryListener> {
        let listener = MemoryListener::bind(net, port, APP, false).unwrap();
        ServerControl::new(listener, ServerConfig::new(codec()))
    }

    async fn next_event(
        rx: &mut mpsc::UnboundedReceiver<ServerEvent<MemoryListener>>,
    ) -> ServerEvent<MemoryListener> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event within 1s")
            .expect("event stream open")
    }

    #[tokio::test]
    async fn test_start_twice_fails_fast() {
        let net = MemoryNetwork::new();
        let server = server(&net, 8000);

        server.start().unwrap();
        assert!(matches!(
            server.start(),
            Err(ServerError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_inbound_connection_registers_and_emits_connected() {
        let net = MemoryNetwork::new();
        let server = server(&net, 8001);
        server.start().unwrap();
        let mut events = server.subscribe();

        let connector = MemoryConnector::new(&net, APP);
        let link = connector.connect("localhost", 8001, None).await.unwrap();

        match next_event(&mut events).await {
            ServerEvent::Connected(remote) => {
                assert_eq!(remote.id(), link.id());
            }
            other => panic!("expected Connected, got {other:?}"),
        }
        assert_eq!(server.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_peer_disconnect_removes_and_emits_disconnected() {
        let net = MemoryNetwork::new();
        let server = server(&net, 8002);
        server.start().unwrap();
        let mut events = server.subscribe();

        let connector = MemoryConnector::new(&net, APP);
        let link = connector.connect("localhost", 8002, None).await.unwrap();
        let _ = next_event(&mut events).await; // Connected

        link.disconnect("leaving").await.unwrap();

        match next_event(&mut events).await {
            ServerEvent::Disconnected(remote) => {
                assert_eq!(remote.id(), link.id());
            }
            other => panic!("expected Disconnected, got {other:?}"),
        }
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn test_data_emits_message_and_undecodable_is_dropped() {
        let net = MemoryNetwork::new();
        let server = server(&net, 8003);
        server.start().unwrap();
        let mut events = server.subscribe();

        let connector = MemoryConnector::new(&net, APP);
        let link = connector.connect("localhost", 8003, None).await.unwrap();
        let _ = next_event(&mut events).await; // Connected

        link.send(b"garbage", Delivery::ReliableOrdered).await.unwrap();
        link.send(
            &codec().encode(&Knock { name: "bob".into() }).unwrap(),
            Delivery::ReliableOrdered,
        )
        .await
        .unwrap();

        // Only the decodable payload surfaces.
        match next_event(&mut events).await {
            ServerEvent::Message { action, .. } => {
                assert_eq!(
                    action.downcast_ref::<Knock>(),
                    Some(&Knock { name: "bob".into() })
                );
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection_errors() {
        let net = MemoryNetwork::new();
        let server = server(&net, 8004);
        server.start().unwrap();

        let result = server
            .send(
                ConnectionId::new(404),
                &Knock { name: "x".into() },
                Delivery::ReliableOrdered,
            )
            .await;

        assert!(matches!(
            result,
            Err(ServerError::UnknownConnection(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_halts_processing() {
        let net = MemoryNetwork::new();
        let server = server(&net, 8005);
        server.start().unwrap();
        let mut events = server.subscribe();

        server.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Connections after stop are no longer processed.
        let connector = MemoryConnector::new(&net, APP);
        let _link = connector.connect("localhost", 8005, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(events.try_recv().is_err());
        assert!(server.registry().is_empty());
    }
}
