//! Codec trait and the JSON implementation.
//!
//! A codec converts registered actions to and from raw bytes. The session
//! layer holds an `Arc<dyn Codec>` and never cares which strategy is
//! behind it; [`JsonCodec`] is the shipped strategy.

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Action, ActionRegistry, ProtocolError};

/// Encodes registered actions to bytes and decodes bytes back.
///
/// Object-safe so controls can hold it as `Arc<dyn Codec>` and share one
/// strategy between client and server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a registered value into bytes.
    ///
    /// # Errors
    /// Fails if the value's type is not registered or serialization fails.
    fn encode(
        &self,
        action: &(dyn Any + Send + Sync),
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into an [`Action`].
    ///
    /// # Errors
    /// Fails if the bytes are malformed, the named action is unknown, or
    /// the payload doesn't match the registered type.
    fn decode(&self, data: &[u8]) -> Result<Action, ProtocolError>;
}

/// The name-tagged wire shape: `{"action": "<name>", "data": <payload>}`.
#[derive(Serialize, Deserialize)]
struct ActionEnvelope {
    action: String,
    data: serde_json::Value,
}

/// A [`Codec`] writing name-tagged JSON envelopes over an
/// [`ActionRegistry`].
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
/// use hopline_protocol::{ActionRegistry, Codec, JsonCodec};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct Chat { text: String }
///
/// let mut registry = ActionRegistry::new();
/// registry.register::<Chat>("Chat");
/// let codec = JsonCodec::new(Arc::new(registry));
///
/// let bytes = codec.encode(&Chat { text: "hi".into() }).unwrap();
/// let action = codec.decode(&bytes).unwrap();
/// assert_eq!(action.downcast_ref::<Chat>(), Some(&Chat { text: "hi".into() }));
/// ```
#[derive(Clone)]
pub struct JsonCodec {
    registry: Arc<ActionRegistry>,
}

impl JsonCodec {
    /// Creates a codec over the given registry.
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self { registry }
    }
}

impl Codec for JsonCodec {
    fn encode(
        &self,
        action: &(dyn Any + Send + Sync),
    ) -> Result<Vec<u8>, ProtocolError> {
        let (name, data) = self.registry.encode_value(action)?;
        let envelope = ActionEnvelope {
            action: name.to_string(),
            data,
        };
        serde_json::to_vec(&envelope).map_err(ProtocolError::Encode)
    }

    fn decode(&self, data: &[u8]) -> Result<Action, ProtocolError> {
        let envelope: ActionEnvelope =
            serde_json::from_slice(data).map_err(ProtocolError::Decode)?;
        self.registry.decode_value(&envelope.action, envelope.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Move {
        x: i32,
        y: i32,
    }

    fn codec() -> JsonCodec {
        let mut registry = ActionRegistry::new();
        registry.register::<Move>("Move");
        JsonCodec::new(Arc::new(registry))
    }

    #[test]
    fn test_encode_produces_name_tagged_envelope() {
        let codec = codec();

        let bytes = codec.encode(&Move { x: 1, y: -2 }).expect("encode");
        let json: serde_json::Value =
            serde_json::from_slice(&bytes).expect("valid json");

        assert_eq!(json["action"], "Move");
        assert_eq!(json["data"]["x"], 1);
        assert_eq!(json["data"]["y"], -2);
    }

    #[test]
    fn test_encode_then_decode_round_trips() {
        let codec = codec();

        let bytes = codec.encode(&Move { x: 3, y: 4 }).expect("encode");
        let action = codec.decode(&bytes).expect("decode");

        assert_eq!(action.downcast_ref::<Move>(), Some(&Move { x: 3, y: 4 }));
    }

    #[test]
    fn test_decode_garbage_returns_decode_error() {
        let codec = codec();
        let result = codec.decode(b"not json at all");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_unknown_action_name_returns_error() {
        let codec = codec();
        let bytes = br#"{"action": "Teleport", "data": {}}"#;
        let result = codec.decode(bytes);
        assert!(matches!(result, Err(ProtocolError::UnknownAction(_))));
    }

    #[test]
    fn test_encode_unregistered_type_returns_error() {
        let codec = codec();
        let result = codec.encode(&12u64);
        assert!(matches!(result, Err(ProtocolError::UnregisteredAction)));
    }
}
