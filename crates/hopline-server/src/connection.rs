//! The server's handle for one accepted peer.

use std::any::Any;
use std::sync::Arc;

use tokio::sync::mpsc;

use hopline_dispatch::{ActionDispatcher, EventBus};
use hopline_protocol::{Action, Codec};
use hopline_transport::{ConnectionId, Delivery, Listener};

use crate::ServerError;

/// One accepted client, from the server's point of view.
///
/// Handed out as `Arc` clones by the registry; the registry's entry is the
/// owning reference, and a handle must not be kept as a send path past the
/// connection's removal.
pub struct RemoteConnection<L: Listener> {
    conn: ConnectionId,
    listener: Arc<L>,
    codec: Arc<dyn Codec>,
    dispatcher: ActionDispatcher,
    messages: EventBus<Action>,
}

impl<L: Listener> RemoteConnection<L> {
    pub(crate) fn new(
        conn: ConnectionId,
        listener: Arc<L>,
        codec: Arc<dyn Codec>,
    ) -> Arc<Self> {
        Arc::new(Self {
            conn,
            listener,
            codec,
            dispatcher: ActionDispatcher::new(),
            messages: EventBus::new(),
        })
    }

    /// Returns the transport identity of this connection.
    pub fn id(&self) -> ConnectionId {
        self.conn
    }

    /// Returns this connection's dispatcher, for connection-scoped
    /// subscriptions by action type.
    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    /// Registers a subscriber for every action this peer sends.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Action> {
        self.messages.subscribe()
    }

    /// Encodes and transmits an action to this peer.
    ///
    /// # Errors
    /// Fails if encoding fails or the connection is no longer live.
    pub async fn send(
        &self,
        action: &(dyn Any + Send + Sync),
        delivery: Delivery,
    ) -> Result<(), ServerError> {
        let bytes = self.codec.encode(action)?;
        self.listener
            .send(self.conn, &bytes, delivery)
            .await
            .map_err(|e| ServerError::Transport(Box::new(e)))
    }

    /// Raises the message event and feeds the per-connection dispatcher.
    pub(crate) fn deliver(&self, action: &Action) {
        self.messages.emit(Arc::clone(action));
        self.dispatcher.dispatch(action.as_ref());
    }
}
