//! Error types for the client layer.

use hopline_protocol::ProtocolError;

/// Errors that can occur in the client layer.
///
/// `AlreadyInProgress` and `NotConnected` are precondition failures
/// reported synchronously by the call that hit them. Failures inside an
/// in-flight connect or hop are caught, surfaced through the `Errored`
/// event, and resolve the operation as `false` instead.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A connect or hop was requested while another one is pending.
    #[error("a connect or hop is already in progress")]
    AlreadyInProgress,

    /// The operation needs an active, connected session.
    #[error("not connected")]
    NotConnected,

    /// An action failed to encode or decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The transport reported a failure.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}
