//! The action registry: declared wire names mapped to concrete types.
//!
//! Registration erases the concrete type behind a pair of closures: one
//! serializing a `&dyn Any` it can downcast, one deserializing into an
//! [`Action`]. The registry is populated once at startup and then frozen
//! behind an `Arc`; codecs only read it.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::{Action, ProtocolError};

type EncodeFn = Box<
    dyn Fn(&(dyn Any + Send + Sync)) -> Result<serde_json::Value, ProtocolError>
        + Send
        + Sync,
>;
type DecodeFn =
    Box<dyn Fn(serde_json::Value) -> Result<Action, ProtocolError> + Send + Sync>;

struct NamedEncoder {
    name: String,
    encode: EncodeFn,
}

/// Maps declared action names to concrete Rust types, in both directions.
///
/// ## Example
///
/// ```rust
/// use hopline_protocol::ActionRegistry;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Chat { text: String }
///
/// let mut registry = ActionRegistry::new();
/// registry.register::<Chat>("Chat");
/// ```
#[derive(Default)]
pub struct ActionRegistry {
    by_type: HashMap<TypeId, NamedEncoder>,
    by_name: HashMap<String, DecodeFn>,
}

impl ActionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under the given wire name.
    ///
    /// Registering the same name or type again replaces the earlier entry.
    pub fn register<T>(&mut self, name: &str) -> &mut Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let encode: EncodeFn = Box::new(|action| {
            let value = action
                .downcast_ref::<T>()
                .ok_or(ProtocolError::UnregisteredAction)?;
            serde_json::to_value(value).map_err(ProtocolError::Encode)
        });
        let decode: DecodeFn = Box::new(|data| {
            let value: T =
                serde_json::from_value(data).map_err(ProtocolError::Decode)?;
            Ok(Arc::new(value) as Action)
        });

        self.by_type.insert(
            TypeId::of::<T>(),
            NamedEncoder {
                name: name.to_string(),
                encode,
            },
        );
        self.by_name.insert(name.to_string(), decode);
        self
    }

    /// Returns the wire name registered for the value's runtime type.
    pub fn name_of(&self, action: &(dyn Any + Send + Sync)) -> Option<&str> {
        self.by_type
            .get(&action.type_id())
            .map(|entry| entry.name.as_str())
    }

    /// Serializes a registered value, returning its wire name and payload.
    ///
    /// # Errors
    /// [`ProtocolError::UnregisteredAction`] if the value's type was never
    /// registered, [`ProtocolError::Encode`] if serialization fails.
    pub fn encode_value(
        &self,
        action: &(dyn Any + Send + Sync),
    ) -> Result<(&str, serde_json::Value), ProtocolError> {
        let entry = self
            .by_type
            .get(&action.type_id())
            .ok_or(ProtocolError::UnregisteredAction)?;
        let value = (entry.encode)(action)?;
        Ok((entry.name.as_str(), value))
    }

    /// Deserializes a payload under the given wire name.
    ///
    /// # Errors
    /// [`ProtocolError::UnknownAction`] if no type is registered under the
    /// name, [`ProtocolError::Decode`] if the payload doesn't fit it.
    pub fn decode_value(
        &self,
        name: &str,
        data: serde_json::Value,
    ) -> Result<Action, ProtocolError> {
        let decode = self
            .by_name
            .get(name)
            .ok_or_else(|| ProtocolError::UnknownAction(name.to_string()))?;
        decode(data)
    }

    /// Returns the number of registered action types.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Chat {
        text: String,
    }

    fn registry() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry.register::<Ping>("Ping").register::<Chat>("Chat");
        registry
    }

    #[test]
    fn test_register_tracks_count() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_name_of_registered_type_returns_name() {
        let registry = registry();
        assert_eq!(registry.name_of(&Ping { n: 1 }), Some("Ping"));
        assert_eq!(
            registry.name_of(&Chat {
                text: "hi".into()
            }),
            Some("Chat")
        );
    }

    #[test]
    fn test_name_of_unregistered_type_returns_none() {
        let registry = registry();
        assert_eq!(registry.name_of(&42u32), None);
    }

    #[test]
    fn test_encode_then_decode_recovers_value() {
        let registry = registry();

        let (name, value) =
            registry.encode_value(&Ping { n: 7 }).expect("encode");
        assert_eq!(name, "Ping");

        let action = registry.decode_value(name, value).expect("decode");
        assert_eq!(action.downcast_ref::<Ping>(), Some(&Ping { n: 7 }));
    }

    #[test]
    fn test_encode_unregistered_type_returns_error() {
        let registry = registry();
        let result = registry.encode_value(&"loose string".to_string());
        assert!(matches!(result, Err(ProtocolError::UnregisteredAction)));
    }

    #[test]
    fn test_decode_unknown_name_returns_error() {
        let registry = registry();
        let result =
            registry.decode_value("FlyToMoon", serde_json::json!({}));
        assert!(
            matches!(result, Err(ProtocolError::UnknownAction(name)) if name == "FlyToMoon")
        );
    }

    #[test]
    fn test_decode_mismatched_payload_returns_error() {
        let registry = registry();
        let result =
            registry.decode_value("Ping", serde_json::json!({"n": "NaN"}));
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_register_same_name_replaces_entry() {
        let mut registry = registry();
        registry.register::<Chat>("Ping");
        assert_eq!(registry.len(), 2);

        let action = registry
            .decode_value("Ping", serde_json::json!({"text": "hello"}))
            .expect("decode with replaced type");
        assert!(action.downcast_ref::<Chat>().is_some());
    }
}
