//! The client control: connect, send, disconnect, and server hopping.
//!
//! `ClientControl` owns at most one active [`ConnectionSession`] and keeps
//! the `Connecting` / `Hopping` flags mutually exclusive, so only one
//! lifecycle operation is ever in flight.
//!
//! The hop protocol connects to the new endpoint *before* touching the old
//! session, so a failed hop leaves the client exactly where it was. A
//! successful hop reports a single [`ClientEvent::Hopped`] (never a
//! `Disconnected`/`Connected` pair), and the old session's receive loop is
//! fully stopped before the new one starts consuming.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use hopline_dispatch::EventBus;
use hopline_protocol::Action;
use hopline_transport::{Connector, Delivery, Link};

use crate::session::{ConnectionSession, SessionEvent};
use crate::{ClientConfig, ClientError};

/// Notifications raised by a [`ClientControl`].
///
/// All events are fire-and-forget; drain them from the receiver returned
/// by [`ClientControl::subscribe`].
#[derive(Clone)]
pub enum ClientEvent {
    /// A connect attempt succeeded and the session is live.
    Connected,
    /// The live session ended (peer or local disconnect).
    Disconnected,
    /// A hop succeeded; the client now talks to the new endpoint.
    Hopped,
    /// A hop failed; the original session is untouched.
    HopFailed,
    /// A failure was caught and the operation it belonged to resolved as
    /// failed or the payload involved was dropped.
    Errored(Arc<ClientError>),
    /// A decoded action arrived from the server.
    Message(Action),
}

impl fmt::Debug for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Hopped => write!(f, "Hopped"),
            Self::HopFailed => write!(f, "HopFailed"),
            Self::Errored(e) => f.debug_tuple("Errored").field(e).finish(),
            Self::Message(_) => write!(f, "Message(..)"),
        }
    }
}

/// Only one lifecycle operation may be in flight per control.
#[derive(Default)]
struct LifecycleFlags {
    connecting: bool,
    hopping: bool,
}

/// The active session plus the tasks wired to it.
struct ActiveSession<L: Link> {
    session: Arc<ConnectionSession<L>>,
    receive_loop: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

/// Client-side control for connecting, disconnecting, and server hopping.
pub struct ClientControl<C: Connector> {
    connector: C,
    config: ClientConfig,
    flags: Mutex<LifecycleFlags>,
    active: tokio::sync::Mutex<Option<ActiveSession<C::Link>>>,
    connected: Arc<AtomicBool>,
    events: Arc<EventBus<ClientEvent>>,
}

impl<C: Connector> ClientControl<C> {
    /// Creates a control dialing through the given connector.
    pub fn new(connector: C, config: ClientConfig) -> Self {
        Self {
            connector,
            config,
            flags: Mutex::new(LifecycleFlags::default()),
            active: tokio::sync::Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            events: Arc::new(EventBus::new()),
        }
    }

    /// Registers a subscriber for this control's events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Returns `true` while a session is live.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns `true` while a connect attempt is in flight.
    pub fn is_connecting(&self) -> bool {
        self.flags.lock().unwrap().connecting
    }

    /// Returns `true` while a hop is in flight.
    pub fn is_hopping(&self) -> bool {
        self.flags.lock().unwrap().hopping
    }

    /// Connects to `host:port`, optionally attaching an auth action as the
    /// approval hail.
    ///
    /// Resolves to `Ok(true)` once the session is live (a `Connected`
    /// event fires), `Ok(false)` if the attempt was refused, denied, or
    /// failed (failures also surface as `Errored`; no lifecycle event
    /// leaks from the discarded session).
    ///
    /// # Errors
    /// [`ClientError::AlreadyInProgress`] if a connect or hop is pending.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        auth: Option<&(dyn Any + Send + Sync)>,
    ) -> Result<bool, ClientError> {
        {
            let mut flags = self.flags.lock().unwrap();
            if flags.connecting || flags.hopping {
                return Err(ClientError::AlreadyInProgress);
            }
            flags.connecting = true;
        }

        let result = self.try_connect(host, port, auth).await;
        self.flags.lock().unwrap().connecting = false;
        self.resolve(result)
    }

    /// Migrates the live session to another endpoint.
    ///
    /// The new connection is attempted first; the old session is only torn
    /// down once the new one has resolved successfully, and that teardown
    /// is reported as a single `Hopped` event rather than
    /// disconnect-plus-connect. On failure (`Ok(false)`, plus a
    /// `HopFailed` event) the original session remains connected and
    /// usable.
    ///
    /// # Errors
    /// [`ClientError::NotConnected`] without a live session,
    /// [`ClientError::AlreadyInProgress`] if a connect or hop is pending.
    pub async fn hop(
        &self,
        host: &str,
        port: u16,
        auth: Option<&(dyn Any + Send + Sync)>,
    ) -> Result<bool, ClientError> {
        {
            let active = self.active.lock().await;
            if !active.as_ref().is_some_and(|a| a.session.is_connected()) {
                return Err(ClientError::NotConnected);
            }
        }
        {
            let mut flags = self.flags.lock().unwrap();
            if flags.connecting || flags.hopping {
                return Err(ClientError::AlreadyInProgress);
            }
            flags.hopping = true;
        }

        let result = self.try_hop(host, port, auth).await;
        self.flags.lock().unwrap().hopping = false;
        self.resolve(result)
    }

    /// Encodes and transmits an action through the active session.
    ///
    /// # Errors
    /// [`ClientError::NotConnected`] if no live session exists.
    pub async fn send(
        &self,
        action: &(dyn Any + Send + Sync),
        delivery: Delivery,
    ) -> Result<(), ClientError> {
        let session = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(a) if a.session.is_connected() => {
                    Arc::clone(&a.session)
                }
                _ => return Err(ClientError::NotConnected),
            }
        };
        session.send(action, delivery).await
    }

    /// Tears down the active session, if any.
    ///
    /// Emits exactly one `Disconnected` if the session was live. Calling
    /// again (or without ever connecting) is a no-op.
    pub async fn disconnect(&self) {
        let Some(active) = self.active.lock().await.take() else {
            return;
        };
        let was_connected = active.session.is_connected();
        Self::teardown(active).await;
        if was_connected {
            self.connected.store(false, Ordering::SeqCst);
            self.events.emit(ClientEvent::Disconnected);
            tracing::info!("disconnected");
        }
    }

    /// Maps a caught failure to `Ok(false)` plus an `Errored` event.
    fn resolve(
        &self,
        result: Result<bool, ClientError>,
    ) -> Result<bool, ClientError> {
        match result {
            Ok(success) => Ok(success),
            Err(e) => {
                tracing::warn!(error = %e, "lifecycle operation failed");
                self.events.emit(ClientEvent::Errored(Arc::new(e)));
                Ok(false)
            }
        }
    }

    /// Encodes the hail and dials a new session.
    async fn dial(
        &self,
        host: &str,
        port: u16,
        auth: Option<&(dyn Any + Send + Sync)>,
    ) -> Result<Arc<ConnectionSession<C::Link>>, ClientError> {
        let hail = match auth {
            Some(action) => Some(self.config.codec.encode(action)?),
            None => None,
        };
        let link = self
            .connector
            .connect(host, port, hail)
            .await
            .map_err(|e| ClientError::Transport(Box::new(e)))?;
        Ok(ConnectionSession::new(link, Arc::clone(&self.config.codec)))
    }

    async fn try_connect(
        &self,
        host: &str,
        port: u16,
        auth: Option<&(dyn Any + Send + Sync)>,
    ) -> Result<bool, ClientError> {
        let session = self.dial(host, port, auth).await?;
        // Wired before resolution so data arriving with the handshake
        // already reaches the application.
        let forwarder = self.wire(&session);

        if !session.connect_until_resolved().await {
            forwarder.abort();
            let _ = forwarder.await;
            session.dispose().await;
            tracing::info!(host, port, "connect failed");
            return Ok(false);
        }

        let receive_loop = Arc::clone(&session).start();
        let previous = {
            let mut active = self.active.lock().await;
            active.replace(ActiveSession {
                session,
                receive_loop,
                forwarder,
            })
        };
        if let Some(previous) = previous {
            // A stale, already-dead session may still occupy the slot.
            Self::teardown(previous).await;
        }

        self.connected.store(true, Ordering::SeqCst);
        self.events.emit(ClientEvent::Connected);
        tracing::info!(host, port, "connected");
        Ok(true)
    }

    async fn try_hop(
        &self,
        host: &str,
        port: u16,
        auth: Option<&(dyn Any + Send + Sync)>,
    ) -> Result<bool, ClientError> {
        // Attempt the new connection while the old session keeps running.
        // The pending session stays unwired: nothing it raises before the
        // switch can reach the application.
        let pending = self.dial(host, port, auth).await?;

        if !pending.connect_until_resolved().await {
            pending.dispose().await;
            self.events.emit(ClientEvent::HopFailed);
            tracing::info!(host, port, "hop failed; original session untouched");
            return Ok(false);
        }

        {
            let mut slot = self.active.lock().await;
            if let Some(old) = slot.take() {
                // The old loops must be fully stopped before the new
                // session consumes anything, and the old teardown must not
                // surface as a Disconnected event.
                Self::teardown(old).await;
            }
            let forwarder = self.wire(&pending);
            let receive_loop = Arc::clone(&pending).start();
            *slot = Some(ActiveSession {
                session: pending,
                receive_loop,
                forwarder,
            });
        }

        self.connected.store(true, Ordering::SeqCst);
        self.events.emit(ClientEvent::Hopped);
        tracing::info!(host, port, "hopped");
        Ok(true)
    }

    /// Forwards session events to this control's subscribers. Aborting the
    /// returned task unwires the session.
    fn wire(
        &self,
        session: &Arc<ConnectionSession<C::Link>>,
    ) -> JoinHandle<()> {
        let mut rx = session.subscribe();
        let events = Arc::clone(&self.events);
        let connected = Arc::clone(&self.connected);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    SessionEvent::Disconnected => {
                        connected.store(false, Ordering::SeqCst);
                        events.emit(ClientEvent::Disconnected);
                    }
                    SessionEvent::Message(action) => {
                        events.emit(ClientEvent::Message(action));
                    }
                    SessionEvent::Errored(e) => {
                        events.emit(ClientEvent::Errored(e));
                    }
                }
            }
        })
    }

    /// Unwires and releases a session: forwarder first (so nothing leaks),
    /// then transport disconnect, then the receive loop.
    async fn teardown(active: ActiveSession<C::Link>) {
        let ActiveSession {
            session,
            receive_loop,
            forwarder,
        } = active;
        forwarder.abort();
        let _ = forwarder.await;
        session.dispose().await;
        receive_loop.abort();
        let _ = receive_loop.await;
    }
}

// =========================================================================
// Tests
// =========================================================================
