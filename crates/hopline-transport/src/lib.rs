//! Transport abstraction layer for Hopline.
//!
//! The session layer above this crate never touches sockets. It consumes
//! three traits:
//!
//! - [`Connector`] — the client-side endpoint that dials a remote listener
//!   and yields a [`Link`].
//! - [`Link`] — one physical connection attempt: send bytes, drain the
//!   inbound event stream, disconnect.
//! - [`Listener`] — the server-side endpoint owning every accepted
//!   connection: one merged event stream plus send / broadcast / approve /
//!   deny / disconnect primitives keyed by [`ConnectionId`].
//!
//! `connect` returns a *pending* link: the transport reports success or
//! failure later, as a [`PeerStatus`] event on the link. The same shape
//! covers listeners that run an approval handshake: a dialing peer first
//! surfaces as [`ListenerEvent::ApprovalRequested`] and only becomes
//! connected once the listener approves it.
//!
//! # Feature Flags
//!
//! - `memory` (default) — in-process loopback transport via channels

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "memory")]
mod memory;

pub use error::TransportError;
#[cfg(feature = "memory")]
pub use memory::{MemoryConnector, MemoryLink, MemoryListener, MemoryNetwork};

use std::fmt;
use std::future::Future;

/// Opaque identifier for a physical connection.
///
/// Assigned by the transport per connection attempt and never reused while
/// that connection is registered anywhere. The session layer uses it as the
/// registry key on the server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The delivery guarantee requested for a message.
///
/// Forwarded to the transport with every send. Transports that cannot
/// distinguish (the loopback delivers everything reliably, in order) accept
/// the tag and ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Delivered in order, no loss. The default for session traffic.
    #[default]
    ReliableOrdered,

    /// Delivered without loss, possibly out of order.
    ReliableUnordered,

    /// May be lost or reordered. For frequent state updates where the
    /// latest value matters more than every value.
    Unreliable,
}

/// Connection status as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    /// The connection is established and live.
    Connected,
    /// The connection was refused, denied, or torn down.
    Disconnected,
}

/// An inbound event on a client-side [`Link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The connection's status changed.
    Status(PeerStatus),
    /// A data payload arrived from the remote peer.
    Data(Vec<u8>),
}

/// An inbound event on a server-side [`Listener`], tagged with the
/// originating connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// A connection's status changed.
    StatusChanged {
        /// The connection whose status changed.
        conn: ConnectionId,
        /// The new status.
        status: PeerStatus,
    },

    /// A data payload arrived.
    Data {
        /// The sending connection.
        conn: ConnectionId,
        /// The raw payload bytes.
        payload: Vec<u8>,
    },

    /// A dialing peer awaits an approval decision. Only emitted by
    /// listeners running in approval mode; the connection stays pending
    /// until [`Listener::approve`] or [`Listener::deny`] is called.
    ApprovalRequested {
        /// The pending connection.
        conn: ConnectionId,
        /// The hail payload attached to the connect, if any.
        hail: Option<Vec<u8>>,
    },
}

/// Client-side endpoint: dials remote listeners.
pub trait Connector: Send + Sync + 'static {
    /// The link type produced by this connector.
    type Link: Link;
    /// The error type for connect operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Initiates a connection to `host:port`, attaching an optional hail
    /// payload for the remote approval handshake.
    ///
    /// The returned link is pending: resolution arrives later as a
    /// [`LinkEvent::Status`] event. A refused or denied dial surfaces as
    /// `Status(Disconnected)` without ever reaching `Connected`.
    fn connect(
        &self,
        host: &str,
        port: u16,
        hail: Option<Vec<u8>>,
    ) -> impl Future<Output = Result<Self::Link, Self::Error>> + Send;
}

/// One physical connection from the dialing side.
pub trait Link: Send + Sync + 'static {
    /// The error type for link operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the transport-assigned identity of this connection.
    fn id(&self) -> ConnectionId;

    /// Sends a payload to the remote peer.
    fn send(
        &self,
        data: &[u8],
        delivery: Delivery,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next inbound event for this connection.
    ///
    /// Returns `None` once the link is torn down and the event stream is
    /// exhausted.
    fn recv(&self) -> impl Future<Output = Option<LinkEvent>> + Send;

    /// Requests disconnection, passing a reason to the remote peer.
    ///
    /// Fire-and-forget: completion is observed through the subsequent
    /// `Status(Disconnected)` event. Safe to call more than once.
    fn disconnect(&self, reason: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Server-side endpoint owning the listening socket and all accepted
/// connections.
pub trait Listener: Send + Sync + 'static {
    /// The error type for listener operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Receives the next inbound event across all connections.
    ///
    /// Returns `None` when the listener is shut down.
    fn recv(&self) -> impl Future<Output = Option<ListenerEvent>> + Send;

    /// Sends a payload to one connection.
    fn send(
        &self,
        conn: ConnectionId,
        data: &[u8],
        delivery: Delivery,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Sends a payload to every live connection.
    fn broadcast(
        &self,
        data: &[u8],
        delivery: Delivery,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Approves a pending connection, promoting it to live. Both sides
    /// then observe a `Connected` status event.
    fn approve(&self, conn: ConnectionId) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Denies a pending connection. The dialing side observes
    /// `Status(Disconnected)`; the listener hears nothing further.
    fn deny(&self, conn: ConnectionId) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Disconnects a live connection.
    fn disconnect(
        &self,
        conn: ConnectionId,
        reason: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
