//! # Hopline
//!
//! A session layer over unreliable, connection-oriented message
//! transports. Hopline gives applications three things the raw transport
//! doesn't:
//!
//! - a **connection lifecycle** with an application-level approval
//!   handshake, where the server decides on each pending peer from a decoded
//!   hail payload;
//! - a client-driven **hop** that migrates a live client to another
//!   server endpoint, connecting to the new one before releasing the old
//!   one, reported as a single `Hopped` event;
//! - **typed action dispatch** — decoded messages routed to subscribers
//!   by their concrete Rust type.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hopline::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Knock { name: String }
//!
//! # async fn run() -> Result<(), hopline::HoplineError> {
//! let mut registry = ActionRegistry::new();
//! registry.register::<Knock>("Knock");
//! let codec: Arc<dyn Codec> = Arc::new(JsonCodec::new(Arc::new(registry)));
//!
//! let net = MemoryNetwork::new();
//! let listener = MemoryListener::bind(&net, 4000, "demo", true)?;
//! let server = ServerControl::new(
//!     listener,
//!     ServerConfig::new(Arc::clone(&codec))
//!         .with_approval(|_, action| action.downcast_ref::<Knock>().is_some()),
//! );
//! server.start()?;
//!
//! let client = ClientControl::new(
//!     MemoryConnector::new(&net, "demo"),
//!     ClientConfig::new(codec),
//! );
//! let connected = client
//!     .connect("localhost", 4000, Some(&Knock { name: "ada".into() }))
//!     .await?;
//! assert!(connected);
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::HoplineError;

pub use hopline_client::{
    ClientConfig, ClientControl, ClientError, ClientEvent,
    ConnectionSession, SessionState,
};
pub use hopline_dispatch::{ActionDispatcher, EventBus, Subscription};
pub use hopline_protocol::{
    Action, ActionRegistry, Codec, JsonCodec, ProtocolError,
};
pub use hopline_server::{
    ApprovalCheck, RemoteConnection, RemoteConnectionRegistry, ServerConfig,
    ServerControl, ServerError, ServerEvent,
};
pub use hopline_transport::{
    ConnectionId, Connector, Delivery, Link, LinkEvent, Listener,
    ListenerEvent, PeerStatus, TransportError,
};
#[cfg(feature = "memory")]
pub use hopline_transport::{
    MemoryConnector, MemoryLink, MemoryListener, MemoryNetwork,
};

/// The common imports, in one place.
pub mod prelude {
    pub use crate::{
        Action, ActionDispatcher, ActionRegistry, ClientConfig,
        ClientControl, ClientError, ClientEvent, Codec, ConnectionId,
        Connector, Delivery, HoplineError, JsonCodec, Link, Listener,
        RemoteConnection, ServerConfig, ServerControl, ServerError,
        ServerEvent, SessionState,
    };
    #[cfg(feature = "memory")]
    pub use crate::{MemoryConnector, MemoryListener, MemoryNetwork};
}
