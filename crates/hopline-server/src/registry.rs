//! The registry owning every accepted connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hopline_transport::{ConnectionId, Listener};

use crate::RemoteConnection;

/// Maps transport identities to [`RemoteConnection`] handles.
///
/// Mutated only from the server's processing task, but internally
/// synchronized because lookups are exposed to application threads.
/// Iteration is only available as a snapshot copy.
pub struct RemoteConnectionRegistry<L: Listener> {
    connections: Mutex<HashMap<ConnectionId, Arc<RemoteConnection<L>>>>,
}

impl<L: Listener> Default for RemoteConnectionRegistry<L> {
    fn default() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }
}

impl<L: Listener> RemoteConnectionRegistry<L> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a connection by identity.
    pub fn get(
        &self,
        conn: ConnectionId,
    ) -> Option<Arc<RemoteConnection<L>>> {
        self.connections.lock().unwrap().get(&conn).cloned()
    }

    /// Returns the registered handle for `conn`, creating and registering
    /// one if none exists.
    pub(crate) fn get_or_insert_with(
        &self,
        conn: ConnectionId,
        create: impl FnOnce() -> Arc<RemoteConnection<L>>,
    ) -> Arc<RemoteConnection<L>> {
        Arc::clone(
            self.connections
                .lock()
                .unwrap()
                .entry(conn)
                .or_insert_with(create),
        )
    }

    /// Removes and returns a connection, if registered.
    pub(crate) fn remove(
        &self,
        conn: ConnectionId,
    ) -> Option<Arc<RemoteConnection<L>>> {
        self.connections.lock().unwrap().remove(&conn)
    }

    /// Returns a snapshot of all registered connections.
    pub fn all(&self) -> Vec<Arc<RemoteConnection<L>>> {
        self.connections.lock().unwrap().values().cloned().collect()
    }

    /// Returns the number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Returns `true` if no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.lock().unwrap().is_empty()
    }
}
