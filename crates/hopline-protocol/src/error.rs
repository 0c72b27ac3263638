//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding actions.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning an action into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed bytes, a missing envelope field,
    /// or a payload that doesn't match the registered type.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The value passed for encoding is of a type that was never
    /// registered, so no wire name exists for it.
    #[error("action type is not registered")]
    UnregisteredAction,

    /// An inbound payload names an action this registry doesn't know.
    #[error("unknown action name \"{0}\"")]
    UnknownAction(String),
}
