//! Error types for the server layer.

use hopline_protocol::ProtocolError;
use hopline_transport::ConnectionId;

/// Errors that can occur in the server layer.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// `start()` was called on a control that is already running.
    #[error("server control already started")]
    AlreadyStarted,

    /// The named connection is not registered (never connected, or already
    /// removed).
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// An action failed to encode or decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The transport reported a failure.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}
