use std::sync::Arc;

use hopline_protocol::Codec;

/// Configuration for a [`ClientControl`](crate::ClientControl).
#[derive(Clone)]
pub struct ClientConfig {
    /// The codec used for every action this client sends or receives,
    /// including the connect hail.
    pub codec: Arc<dyn Codec>,
}

impl ClientConfig {
    /// Creates a config around the given codec.
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self { codec }
    }
}
