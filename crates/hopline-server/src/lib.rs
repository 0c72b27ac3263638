//! Server-side session layer for Hopline.
//!
//! [`ServerControl`] owns the listening transport and a single processing
//! task that serializes everything touching the
//! [`RemoteConnectionRegistry`]: approval decisions, connect/disconnect
//! bookkeeping, and data dispatch. Each accepted peer is represented by a
//! [`RemoteConnection`] with its own send path, `MessageReceived` channel,
//! and per-connection [`ActionDispatcher`](hopline_dispatch::ActionDispatcher).
//!
//! The approval handshake is opt-in: configure an [`ApprovalCheck`] on the
//! [`ServerConfig`] and dialing peers stay pending until the predicate
//! rules on their decoded hail payload.

mod config;
mod connection;
mod control;
mod error;
mod registry;

pub use config::{ApprovalCheck, ServerConfig};
pub use connection::RemoteConnection;
pub use control::{ServerControl, ServerEvent};
pub use error::ServerError;
pub use registry::RemoteConnectionRegistry;
