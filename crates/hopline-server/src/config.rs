use std::any::Any;
use std::sync::Arc;

use hopline_protocol::Codec;
use hopline_transport::Listener;

use crate::RemoteConnection;

/// Application policy deciding whether a pending connection is accepted.
///
/// Invoked synchronously on the server's processing task with the
/// connection's provisional handle and its decoded hail payload.
pub type ApprovalCheck<L> = Box<
    dyn Fn(&RemoteConnection<L>, &(dyn Any + Send + Sync)) -> bool
        + Send
        + Sync,
>;

/// Configuration for a [`ServerControl`](crate::ServerControl).
pub struct ServerConfig<L: Listener> {
    /// The codec used for every action this server sends or receives,
    /// including approval hails.
    pub codec: Arc<dyn Codec>,
    pub(crate) approval: Option<ApprovalCheck<L>>,
}

impl<L: Listener> ServerConfig<L> {
    /// Creates a config around the given codec, with no approval policy.
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self {
            codec,
            approval: None,
        }
    }

    /// Enables the approval handshake with the given policy.
    ///
    /// The listener must be bound in approval mode for the transport to
    /// deliver approval requests; without a policy those requests are
    /// granted unconditionally.
    pub fn with_approval<F>(mut self, check: F) -> Self
    where
        F: Fn(&RemoteConnection<L>, &(dyn Any + Send + Sync)) -> bool
            + Send
            + Sync
            + 'static,
    {
        self.approval = Some(Box::new(check));
        self
    }
}
