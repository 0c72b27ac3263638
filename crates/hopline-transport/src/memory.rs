//! In-process loopback transport.
//!
//! A [`MemoryNetwork`] is a hub of listeners keyed by port. Connectors dial
//! by port; the host string is accepted for signature parity and ignored.
//! Everything is delivered over unbounded channels, reliably and in order,
//! whatever [`Delivery`] tag the caller passes.
//!
//! Semantics follow a datagram peer library: `connect` always yields a link,
//! and failure (dead port, application-identifier mismatch, denial) arrives
//! as a `Status(Disconnected)` event on that link. A listener bound in
//! approval mode parks dialing peers as pending and surfaces
//! [`ListenerEvent::ApprovalRequested`]; without approval mode, peers go
//! live immediately and both sides observe `Connected`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use rand::Rng;
use tokio::sync::mpsc;

use crate::{
    ConnectionId, Connector, Delivery, Link, LinkEvent, Listener,
    ListenerEvent, PeerStatus, TransportError,
};

type LinkSender = mpsc::UnboundedSender<LinkEvent>;

/// Shared state of one bound listener, reachable from connectors through
/// the network hub.
struct ListenerShared {
    port: u16,
    app_id: String,
    approval: bool,
    /// Sender half of the listener's merged event stream.
    events: mpsc::UnboundedSender<ListenerEvent>,
    /// Live connections: payloads and status events flow to these senders.
    links: Mutex<HashMap<ConnectionId, LinkSender>>,
    /// Connections parked for an approval decision.
    pending: Mutex<HashMap<ConnectionId, LinkSender>>,
}

/// An in-process network hub. Cheap to clone; all clones share the same
/// port table.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    ports: Arc<Mutex<HashMap<u16, Arc<ListenerShared>>>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, port: u16) -> Option<Arc<ListenerShared>> {
        self.ports.lock().unwrap().get(&port).cloned()
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// A loopback [`Listener`] bound to one port of a [`MemoryNetwork`].
///
/// Dropping the listener unbinds the port and disconnects every live and
/// pending peer.
pub struct MemoryListener {
    shared: Arc<ListenerShared>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<ListenerEvent>>,
    network: MemoryNetwork,
}

impl MemoryListener {
    /// Binds a listener to `port`.
    ///
    /// `app_id` is the application identifier peers must share to connect
    /// (mismatched dials are refused at the transport level). `approval`
    /// parks dialing peers for an explicit [`approve`](Listener::approve) /
    /// [`deny`](Listener::deny) decision instead of accepting them
    /// immediately.
    pub fn bind(
        network: &MemoryNetwork,
        port: u16,
        app_id: &str,
        approval: bool,
    ) -> Result<Self, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ListenerShared {
            port,
            app_id: app_id.to_string(),
            approval,
            events: tx,
            links: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        });

        let mut ports = network.ports.lock().unwrap();
        if ports.contains_key(&port) {
            return Err(TransportError::AddrInUse(port));
        }
        ports.insert(port, Arc::clone(&shared));
        drop(ports);

        tracing::info!(port, app_id, approval, "loopback listener bound");
        Ok(Self {
            shared,
            events: tokio::sync::Mutex::new(rx),
            network: network.clone(),
        })
    }

    /// Returns the port this listener is bound to.
    pub fn port(&self) -> u16 {
        self.shared.port
    }

    /// Returns the number of live connections.
    pub fn connection_count(&self) -> usize {
        self.shared.links.lock().unwrap().len()
    }
}

impl Listener for MemoryListener {
    type Error = TransportError;

    async fn recv(&self) -> Option<ListenerEvent> {
        self.events.lock().await.recv().await
    }

    async fn send(
        &self,
        conn: ConnectionId,
        data: &[u8],
        _delivery: Delivery,
    ) -> Result<(), Self::Error> {
        let tx = self
            .shared
            .links
            .lock()
            .unwrap()
            .get(&conn)
            .cloned()
            .ok_or(TransportError::UnknownConnection(conn))?;
        tx.send(LinkEvent::Data(data.to_vec()))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn broadcast(
        &self,
        data: &[u8],
        _delivery: Delivery,
    ) -> Result<(), Self::Error> {
        let targets: Vec<LinkSender> = {
            let links = self.shared.links.lock().unwrap();
            links.values().cloned().collect()
        };
        for tx in targets {
            let _ = tx.send(LinkEvent::Data(data.to_vec()));
        }
        Ok(())
    }

    async fn approve(&self, conn: ConnectionId) -> Result<(), Self::Error> {
        let tx = self
            .shared
            .pending
            .lock()
            .unwrap()
            .remove(&conn)
            .ok_or(TransportError::UnknownConnection(conn))?;
        self.shared.links.lock().unwrap().insert(conn, tx.clone());

        let _ = tx.send(LinkEvent::Status(PeerStatus::Connected));
        let _ = self.shared.events.send(ListenerEvent::StatusChanged {
            conn,
            status: PeerStatus::Connected,
        });
        tracing::debug!(%conn, "pending connection approved");
        Ok(())
    }

    async fn deny(&self, conn: ConnectionId) -> Result<(), Self::Error> {
        let tx = self
            .shared
            .pending
            .lock()
            .unwrap()
            .remove(&conn)
            .ok_or(TransportError::UnknownConnection(conn))?;
        let _ = tx.send(LinkEvent::Status(PeerStatus::Disconnected));
        tracing::debug!(%conn, "pending connection denied");
        Ok(())
    }

    async fn disconnect(
        &self,
        conn: ConnectionId,
        reason: &str,
    ) -> Result<(), Self::Error> {
        let tx = self
            .shared
            .links
            .lock()
            .unwrap()
            .remove(&conn)
            .ok_or(TransportError::UnknownConnection(conn))?;
        let _ = tx.send(LinkEvent::Status(PeerStatus::Disconnected));
        let _ = self.shared.events.send(ListenerEvent::StatusChanged {
            conn,
            status: PeerStatus::Disconnected,
        });
        tracing::debug!(%conn, reason, "connection disconnected by listener");
        Ok(())
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.network.ports.lock().unwrap().remove(&self.shared.port);

        // Tear down everything still attached so dialing peers observe the
        // listener going away.
        let live: Vec<LinkSender> = {
            let mut links = self.shared.links.lock().unwrap();
            links.drain().map(|(_, tx)| tx).collect()
        };
        let parked: Vec<LinkSender> = {
            let mut pending = self.shared.pending.lock().unwrap();
            pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in live.into_iter().chain(parked) {
            let _ = tx.send(LinkEvent::Status(PeerStatus::Disconnected));
        }
    }
}

// ---------------------------------------------------------------------------
// Connector & Link
// ---------------------------------------------------------------------------

/// A loopback [`Connector`] dialing listeners on a [`MemoryNetwork`].
pub struct MemoryConnector {
    network: MemoryNetwork,
    app_id: String,
}

impl MemoryConnector {
    /// Creates a connector carrying the given application identifier.
    pub fn new(network: &MemoryNetwork, app_id: &str) -> Self {
        Self {
            network: network.clone(),
            app_id: app_id.to_string(),
        }
    }
}

impl Connector for MemoryConnector {
    type Link = MemoryLink;
    type Error = TransportError;

    async fn connect(
        &self,
        host: &str,
        port: u16,
        hail: Option<Vec<u8>>,
    ) -> Result<MemoryLink, Self::Error> {
        let _ = host; // loopback hub addresses by port only
        let conn = ConnectionId::new(rand::rng().random());
        let (tx, rx) = mpsc::unbounded_channel();

        let remote = match self.network.lookup(port) {
            Some(shared) if shared.app_id == self.app_id => {
                if shared.approval {
                    shared
                        .pending
                        .lock()
                        .unwrap()
                        .insert(conn, tx.clone());
                    let _ = shared.events.send(
                        ListenerEvent::ApprovalRequested { conn, hail },
                    );
                } else {
                    shared.links.lock().unwrap().insert(conn, tx.clone());
                    let _ = tx.send(LinkEvent::Status(PeerStatus::Connected));
                    let _ = shared.events.send(ListenerEvent::StatusChanged {
                        conn,
                        status: PeerStatus::Connected,
                    });
                }
                Some(Arc::downgrade(&shared))
            }
            Some(shared) => {
                tracing::debug!(
                    port,
                    theirs = %shared.app_id,
                    ours = %self.app_id,
                    "refusing dial: application identifier mismatch"
                );
                let _ = tx.send(LinkEvent::Status(PeerStatus::Disconnected));
                None
            }
            None => {
                tracing::debug!(port, "refusing dial: no listener");
                let _ = tx.send(LinkEvent::Status(PeerStatus::Disconnected));
                None
            }
        };

        Ok(MemoryLink {
            conn,
            tx,
            events: tokio::sync::Mutex::new(rx),
            remote: Mutex::new(remote),
        })
    }
}

/// The dialing side of one loopback connection.
pub struct MemoryLink {
    conn: ConnectionId,
    /// Sender into our own event stream, for local status injection.
    tx: LinkSender,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<LinkEvent>>,
    /// The listener we are attached to, if the dial found one.
    remote: Mutex<Option<Weak<ListenerShared>>>,
}

impl Link for MemoryLink {
    type Error = TransportError;

    fn id(&self) -> ConnectionId {
        self.conn
    }

    async fn send(
        &self,
        data: &[u8],
        _delivery: Delivery,
    ) -> Result<(), Self::Error> {
        let shared = self
            .remote
            .lock()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(TransportError::NotConnected)?;

        if !shared.links.lock().unwrap().contains_key(&self.conn) {
            return Err(TransportError::NotConnected);
        }
        shared
            .events
            .send(ListenerEvent::Data {
                conn: self.conn,
                payload: data.to_vec(),
            })
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Option<LinkEvent> {
        self.events.lock().await.recv().await
    }

    async fn disconnect(&self, reason: &str) -> Result<(), Self::Error> {
        let shared = self.remote.lock().unwrap().take();
        let Some(shared) = shared.and_then(|weak| weak.upgrade()) else {
            return Ok(());
        };

        let was_live =
            shared.links.lock().unwrap().remove(&self.conn).is_some();
        let was_pending =
            shared.pending.lock().unwrap().remove(&self.conn).is_some();

        if was_live {
            let _ = shared.events.send(ListenerEvent::StatusChanged {
                conn: self.conn,
                status: PeerStatus::Disconnected,
            });
        }
        if was_live || was_pending {
            let _ = self.tx.send(LinkEvent::Status(PeerStatus::Disconnected));
            tracing::debug!(conn = %self.conn, reason, "link disconnected");
        }
        Ok(())
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        // A link dropped without an explicit disconnect still detaches, so
        // the listener observes the peer going away.
        let remote = self.remote.lock().unwrap().take();
        let Some(shared) = remote.and_then(|weak| weak.upgrade()) else {
            return;
        };
        let was_live =
            shared.links.lock().unwrap().remove(&self.conn).is_some();
        shared.pending.lock().unwrap().remove(&self.conn);
        if was_live {
            let _ = shared.events.send(ListenerEvent::StatusChanged {
                conn: self.conn,
                status: PeerStatus::Disconnected,
            });
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
