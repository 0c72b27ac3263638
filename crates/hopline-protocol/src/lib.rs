//! Polymorphic action encoding for Hopline.
//!
//! An "action" is an application-defined message identified by a declared
//! name. Applications register their action types in an [`ActionRegistry`];
//! the [`Codec`] then encodes any registered value to bytes and decodes
//! bytes back into an [`Action`], a type-erased value whose runtime type
//! drives dispatch on the receiving side.
//!
//! The protocol layer knows nothing about connections or sessions. It sits
//! between the transport (raw bytes) and the session layer (lifecycle,
//! dispatch):
//!
//! ```text
//! Transport (bytes) → Protocol (Action) → Session (events, dispatch)
//! ```

mod codec;
mod error;
mod registry;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use registry::ActionRegistry;

use std::any::Any;
use std::sync::Arc;

/// A decoded application action.
///
/// Shared rather than boxed so one decoded value can fan out to several
/// subscribers; the concrete type is recovered with `downcast_ref`.
pub type Action = Arc<dyn Any + Send + Sync>;
