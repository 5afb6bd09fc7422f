//! Companion connection: transport trait, session events and the
//! connection state machine.
//!
//! A [`CompanionTransport`] opens sessions to the companion process and
//! reports their progress through a [`TransportSink`]. Every report is a
//! [`SessionEvent`] consumed by [`ConnectionManager::dispatch`], the one
//! place where connection state changes in response to the transport.

pub mod discord;
pub mod log;
#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::watch;

use crate::activity::Activity;
use crate::timer::{TimerKey, TimerRegistry};

/// Delay before retrying a failed or dropped connection.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Transport error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The companion process is not running or refused the channel.
    #[error("companion unavailable: {0}")]
    Unavailable(String),
    /// The channel opened but the login handshake did not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Lifecycle of the companion connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session open and none being opened.
    Disconnected,
    /// A session was opened and has not answered yet.
    Connecting,
    /// The companion answered; login still pending.
    Connected,
    /// Logged in and accepting activity. Implies connected.
    Ready,
}

/// Connection state as observed from outside the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Last connection failure, unless the attempt asked for quiet failures.
    pub last_error: Option<String>,
}

/// Progress report from a transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel to the companion is open.
    Connected,
    /// Login finished; activity may be sent.
    Ready,
    /// The attempt to open the channel failed.
    Failed(TransportError),
    /// An open channel was lost.
    Disconnected(String),
}

/// A transport event tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    session: u64,
    pub event: TransportEvent,
}

/// Reporting handle given to a transport for one session.
#[derive(Debug, Clone)]
pub struct TransportSink {
    session: u64,
    tx: UnboundedSender<SessionEvent>,
}

impl TransportSink {
    fn emit(&self, event: TransportEvent) {
        // Receiver gone means the service shut down; nothing left to tell.
        let _ = self.tx.send(SessionEvent {
            session: self.session,
            event,
        });
    }

    /// The companion answered.
    pub fn connected(&self) {
        self.emit(TransportEvent::Connected);
    }

    /// Login finished.
    pub fn ready(&self) {
        self.emit(TransportEvent::Ready);
    }

    /// The session could not be established.
    pub fn failed(&self, error: TransportError) {
        self.emit(TransportEvent::Failed(error));
    }

    /// An established session went away.
    pub fn disconnected(&self, reason: impl Into<String>) {
        self.emit(TransportEvent::Disconnected(reason.into()));
    }
}

/// Channel to the companion process.
///
/// Implementations own their I/O: `open` starts a session in the
/// background and reports through the sink, while `set_activity` and
/// `clear_activity` enqueue and return immediately. Send failures are
/// logged by the transport and never retried; the next update
/// supersedes them.
pub trait CompanionTransport: Send {
    /// Transport name, for logging.
    fn name(&self) -> &'static str;

    /// Start a new session. Any previous session has already been closed.
    fn open(&mut self, sink: TransportSink);

    /// Queue `activity` for display, replacing whatever is shown.
    fn set_activity(&mut self, activity: &Activity);

    /// Queue removal of the displayed activity.
    fn clear_activity(&mut self);

    /// Tear the current session down. Must tolerate having no session.
    fn close(&mut self);
}

/// What a dispatched event means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing the caller needs to react to.
    Unchanged,
    /// The connection just became ready.
    Ready,
    /// An established connection was lost.
    Lost,
}

/// Owns the transport and the connection state machine.
///
/// ```text
/// Disconnected --connect--> Connecting --connected--> Connected --ready--> Ready
/// Connecting/Connected/Ready --failed/dropped--> Disconnected --retry timer--> Connecting
/// any --disconnect()--> Disconnected (no retry until connect())
/// ```
pub struct ConnectionManager {
    transport: Box<dyn CompanionTransport>,
    state: ConnectionState,
    auto_reconnect: bool,
    suppress_error_ui: bool,
    last_error: Option<String>,
    session: u64,
    events_tx: UnboundedSender<SessionEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl ConnectionManager {
    /// Create a manager and the receiver its session events arrive on.
    pub fn new(
        transport: Box<dyn CompanionTransport>,
        auto_reconnect: bool,
    ) -> (Self, UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = unbounded_channel();
        let (status_tx, _) = watch::channel(ConnectionStatus {
            state: ConnectionState::Disconnected,
            last_error: None,
        });

        let manager = Self {
            transport,
            state: ConnectionState::Disconnected,
            auto_reconnect,
            suppress_error_ui: false,
            last_error: None,
            session: 0,
            events_tx,
            status_tx,
        };
        (manager, events_rx)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the companion has answered, logged in or not.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Ready
        )
    }

    /// Whether activity can be sent.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    /// Enable or disable retries. A retry already scheduled still fires
    /// but does nothing once disabled.
    pub fn set_auto_reconnect(&mut self, auto_reconnect: bool) {
        self.auto_reconnect = auto_reconnect;
    }

    /// Watch connection status changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Open a session unless one is already open or opening.
    ///
    /// A scheduled retry is replaced by this attempt. With
    /// `suppress_error_ui`, failures of this attempt are logged but not
    /// published in [`ConnectionStatus::last_error`].
    pub fn connect(&mut self, timers: &mut TimerRegistry, suppress_error_ui: bool) {
        if self.state != ConnectionState::Disconnected {
            tracing::debug!(state = ?self.state, "already connected");
            return;
        }

        timers.clear(TimerKey::ReconnectRetry);
        self.suppress_error_ui = suppress_error_ui;
        self.open();
    }

    /// Close the connection and stop retrying. Returns whether anything
    /// was open.
    pub fn disconnect(&mut self, timers: &mut TimerRegistry) -> bool {
        self.auto_reconnect = false;
        timers.clear(TimerKey::ReconnectRetry);

        if self.state == ConnectionState::Disconnected {
            return false;
        }

        self.end_session();
        self.state = ConnectionState::Disconnected;
        self.last_error = None;
        self.publish();
        tracing::info!(transport = self.transport.name(), "disconnected from companion");
        true
    }

    /// Handle expiry of the reconnect timer.
    pub fn retry(&mut self) {
        if !self.auto_reconnect || self.state != ConnectionState::Disconnected {
            return;
        }
        tracing::debug!("retrying companion connection");
        self.open();
    }

    /// Apply a transport event. Events from ended sessions are ignored.
    pub fn dispatch(&mut self, event: SessionEvent, timers: &mut TimerRegistry) -> Transition {
        if event.session != self.session {
            tracing::trace!(session = event.session, "ignoring event from ended session");
            return Transition::Unchanged;
        }

        match event.event {
            TransportEvent::Connected => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Connected;
                    self.publish();
                    tracing::info!(transport = self.transport.name(), "connected to companion");
                }
                Transition::Unchanged
            }
            TransportEvent::Ready => {
                self.state = ConnectionState::Ready;
                self.last_error = None;
                self.publish();
                tracing::info!(transport = self.transport.name(), "companion ready");
                Transition::Ready
            }
            TransportEvent::Failed(error) => {
                tracing::warn!(
                    transport = self.transport.name(),
                    %error,
                    "companion connection failed"
                );
                if !self.suppress_error_ui {
                    self.last_error = Some(error.to_string());
                }
                self.drop_session(timers)
            }
            TransportEvent::Disconnected(reason) => {
                tracing::info!(
                    transport = self.transport.name(),
                    %reason,
                    "companion disconnected"
                );
                self.drop_session(timers)
            }
        }
    }

    /// Send `activity` if ready. Returns whether it was handed to the
    /// transport.
    pub fn set_activity(&mut self, activity: &Activity) -> bool {
        if !self.is_ready() {
            tracing::debug!(state = ?self.state, "not ready, activity not sent");
            return false;
        }
        self.transport.set_activity(activity);
        true
    }

    /// Clear the remote activity if ready. Returns whether the request was
    /// handed to the transport.
    pub fn clear_activity(&mut self) -> bool {
        if !self.is_ready() {
            return false;
        }
        self.transport.clear_activity();
        true
    }

    fn open(&mut self) {
        self.session += 1;
        self.state = ConnectionState::Connecting;
        self.publish();

        tracing::info!(transport = self.transport.name(), "connecting to companion");
        let sink = TransportSink {
            session: self.session,
            tx: self.events_tx.clone(),
        };
        self.transport.open(sink);
    }

    fn end_session(&mut self) {
        self.session += 1;
        self.transport.close();
    }

    fn drop_session(&mut self, timers: &mut TimerRegistry) -> Transition {
        let was_connected = self.is_connected();

        self.end_session();
        self.state = ConnectionState::Disconnected;
        self.publish();

        if self.auto_reconnect {
            tracing::debug!(delay = ?RECONNECT_DELAY, "scheduling reconnect");
            timers.set(TimerKey::ReconnectRetry, RECONNECT_DELAY);
        }

        if was_connected {
            Transition::Lost
        } else {
            Transition::Unchanged
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(ConnectionStatus {
            state: self.state,
            last_error: self.last_error.clone(),
        });
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.transport.close();
        }
    }
}
