use crate::ConnectionId;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Another listener is already bound to the port.
    #[error("port {0} is already in use")]
    AddrInUse(u16),

    /// The named connection is not registered with this endpoint.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The link is not (or no longer) connected to a live peer.
    #[error("link is not connected")]
    NotConnected,

    /// The remote endpoint is gone and the payload could not be delivered.
    #[error("connection closed")]
    ConnectionClosed,
}
