//! Unified error type for the Hopline meta-crate.

use hopline_client::ClientError;
use hopline_protocol::ProtocolError;
use hopline_server::ServerError;
use hopline_transport::TransportError;

/// Top-level error that wraps all layer-specific errors.
///
/// When using the `hopline` meta-crate, the `?` operator converts any
/// layer error into this single type through the `#[from]` impls.
#[derive(Debug, thiserror::Error)]
pub enum HoplineError {
    /// A transport-level error (bind, send, unknown connection).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, unknown action).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A client-level error (precondition or caught transport failure).
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A server-level error (double start, unknown connection).
    #[error(transparent)]
    Server(#[from] ServerError),
}
