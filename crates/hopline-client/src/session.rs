//! One physical connection attempt and its lifetime.
//!
//! A `ConnectionSession` wraps a single transport [`Link`] from dial to
//! teardown. It is created per connect or hop request and never reused: a
//! session that reaches `Disconnected` stays there, and a new connection
//! means a new session.
//!
//! Two receive paths drive the state machine:
//!
//! - [`connect_until_resolved`](ConnectionSession::connect_until_resolved)
//!   drains the link until the pending connect succeeds or fails and
//!   reports which. The hop protocol relies on getting this answer before
//!   anything else happens to the previous session.
//! - [`start`](ConnectionSession::start) spawns the continuous loop that
//!   drains status and data events for the rest of the session's life.
//!
//! The session itself raises `Disconnected`, `Message`, and `Errored`
//! events; announcing a successful connect is the control's job.

use std::any::Any;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use hopline_dispatch::EventBus;
use hopline_protocol::{Action, Codec};
use hopline_transport::{
    ConnectionId, Delivery, Link, LinkEvent, PeerStatus,
};

use crate::ClientError;

/// Lifecycle state of one connection attempt.
///
/// ```text
///   Idle ──→ Connecting ──→ Connected ──→ Disconnected (terminal)
///                 │                            ▲
///                 └────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, dial not yet resolved or even started.
    Idle,
    /// Waiting for the transport to report the dial's outcome.
    Connecting,
    /// Live: eligible to send and receive.
    Connected,
    /// Torn down. Terminal for this session instance.
    Disconnected,
}

/// Events a session raises to its owning control.
#[derive(Clone)]
pub(crate) enum SessionEvent {
    /// The transport reported the live connection as gone.
    Disconnected,
    /// A data payload decoded into an action.
    Message(Action),
    /// A failure worth reporting that did not end the session
    /// (an undecodable payload, for instance).
    Errored(Arc<ClientError>),
}

/// One attempt to establish and hold a connection to a single remote
/// endpoint.
pub struct ConnectionSession<L: Link> {
    link: L,
    codec: Arc<dyn Codec>,
    state: Mutex<SessionState>,
    events: EventBus<SessionEvent>,
    cancel: watch::Sender<bool>,
}

impl<L: Link> ConnectionSession<L> {
    /// Wraps a freshly dialed link.
    pub(crate) fn new(link: L, codec: Arc<dyn Codec>) -> Arc<Self> {
        let (cancel, _) = watch::channel(false);
        Arc::new(Self {
            link,
            codec,
            state: Mutex::new(SessionState::Idle),
            events: EventBus::new(),
            cancel,
        })
    }

    /// Returns the transport identity of this connection.
    pub fn identity(&self) -> ConnectionId {
        self.link.id()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Returns `true` while the session is live.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    /// Registers a subscriber for this session's events.
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Drains link events until the pending connect resolves, returning
    /// whether it succeeded.
    ///
    /// Only the first status transition resolves the attempt; data frames
    /// arriving before resolution are decoded and raised as messages. The
    /// continuous loop is NOT started here; the control starts it once it
    /// has decided what to do with the outcome.
    pub(crate) async fn connect_until_resolved(&self) -> bool {
        self.set_state(SessionState::Connecting);

        while let Some(event) = self.link.recv().await {
            match event {
                LinkEvent::Status(PeerStatus::Connected) => {
                    self.set_state(SessionState::Connected);
                    tracing::debug!(conn = %self.identity(), "connect resolved: connected");
                    return true;
                }
                LinkEvent::Status(PeerStatus::Disconnected) => {
                    self.set_state(SessionState::Disconnected);
                    tracing::debug!(conn = %self.identity(), "connect resolved: refused or denied");
                    return false;
                }
                LinkEvent::Data(payload) => self.handle_data(&payload),
            }
        }

        self.set_state(SessionState::Disconnected);
        false
    }

    /// Spawns the continuous receive loop for an established session.
    pub(crate) fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.process().await })
    }

    /// Drains status and data events until cancelled or the link closes.
    async fn process(&self) {
        let mut cancel = self.cancel.subscribe();
        if *cancel.borrow() {
            return;
        }
        loop {
            tokio::select! {
                _ = cancel.changed() => break,
                event = self.link.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
        tracing::debug!(conn = %self.identity(), "receive loop stopped");
    }

    fn handle_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Status(status) => self.handle_status(status),
            LinkEvent::Data(payload) => self.handle_data(&payload),
        }
    }

    /// Status oscillations after resolution update the state machine; only
    /// the transition out of `Connected` is surfaced as an event.
    fn handle_status(&self, status: PeerStatus) {
        let mut state = self.state.lock().unwrap();
        if *state == SessionState::Connected {
            if status != PeerStatus::Connected {
                *state = SessionState::Disconnected;
                drop(state);
                self.events.emit(SessionEvent::Disconnected);
            }
        } else if status == PeerStatus::Connected {
            *state = SessionState::Connected;
        }
    }

    /// Decodes a data payload and raises it. An undecodable payload is
    /// dropped and reported; it never stops the receive path.
    fn handle_data(&self, payload: &[u8]) {
        match self.codec.decode(payload) {
            Ok(action) => self.events.emit(SessionEvent::Message(action)),
            Err(e) => {
                tracing::warn!(
                    conn = %self.identity(),
                    error = %e,
                    "dropping undecodable payload"
                );
                self.events.emit(SessionEvent::Errored(Arc::new(
                    ClientError::Protocol(e),
                )));
            }
        }
    }

    /// Encodes and transmits an action over the live link.
    pub(crate) async fn send(
        &self,
        action: &(dyn Any + Send + Sync),
        delivery: Delivery,
    ) -> Result<(), ClientError> {
        let bytes = self.codec.encode(action)?;
        self.link
            .send(&bytes, delivery)
            .await
            .map_err(|e| ClientError::Transport(Box::new(e)))
    }

    /// Requests transport-level disconnect if still connected.
    pub(crate) async fn disconnect(&self) {
        if self.is_connected() {
            if let Err(e) = self.link.disconnect("session released").await {
                tracing::debug!(
                    conn = %self.identity(),
                    error = %e,
                    "disconnect request failed"
                );
            }
        }
    }

    /// Disconnects and asks the receive loop to stop. Safe to call when
    /// the loop never started or has already exited.
    pub(crate) async fn dispose(&self) {
        self.disconnect().await;
        self.cancel.send_replace(true);
    }
}

// =========================================================================
// Tests
// =========================================================================
