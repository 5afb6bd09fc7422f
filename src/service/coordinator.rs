//! Throttled update state machine.
//!
//! Significant transitions (new video, pause flip, seek) go out at once.
//! Routine polling ticks are limited to one send per [`THROTTLE_WINDOW`];
//! ticks inside the window collapse into a single deferred send holding
//! the most recent snapshot.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::activity;
use crate::config::PresenceConfig;
use crate::connection::{
    CompanionTransport, ConnectionManager, ConnectionState, ConnectionStatus, SessionEvent,
    Transition,
};
use crate::timer::{TimerFired, TimerKey, TimerRegistry};
use crate::video::{VideoInfo, is_seek};

/// Minimum spacing between two non-urgent sends.
pub const THROTTLE_WINDOW: Duration = Duration::from_secs(15);

/// Receivers the owning event loop must drain into the coordinator.
pub struct Inputs {
    /// Expiries to pass to [`UpdateCoordinator::on_timer`].
    pub timers: UnboundedReceiver<TimerFired>,
    /// Session events to pass to [`UpdateCoordinator::on_transport`].
    pub transport: UnboundedReceiver<SessionEvent>,
}

/// Decides what reaches the companion and when.
///
/// Owns the connection, the timers and the tracked item. It never blocks;
/// the owning loop feeds it commands and the receivers from [`Inputs`].
pub struct UpdateCoordinator {
    config: PresenceConfig,
    connection: ConnectionManager,
    timers: TimerRegistry,
    /// Last snapshot treated as authoritative.
    pending: Option<VideoInfo>,
    /// Snapshot waiting for the throttle window to end.
    deferred: Option<VideoInfo>,
    last_send: Option<Instant>,
    /// Paused item whose presence was auto-cleared.
    dormant: Option<VideoInfo>,
}

impl UpdateCoordinator {
    /// Build a coordinator around `transport`. Nothing connects until
    /// [`start`](Self::start).
    pub fn new(transport: Box<dyn CompanionTransport>, config: PresenceConfig) -> (Self, Inputs) {
        let (connection, transport_rx) = ConnectionManager::new(transport, config.auto_reconnect);
        let (timers, timer_rx) = TimerRegistry::new();

        let coordinator = Self {
            config,
            connection,
            timers,
            pending: None,
            deferred: None,
            last_send: None,
            dormant: None,
        };
        let inputs = Inputs {
            timers: timer_rx,
            transport: transport_rx,
        };
        (coordinator, inputs)
    }

    /// Configuration currently in effect.
    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Current state of the companion connection.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watch connection status changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.subscribe()
    }

    /// Last accepted snapshot, replayed when the connection becomes ready.
    pub fn pending(&self) -> Option<&VideoInfo> {
        self.pending.as_ref()
    }

    /// Whether the timer `key` is running.
    pub fn is_armed(&self, key: TimerKey) -> bool {
        self.timers.is_armed(key)
    }

    /// Activation: connect if enabled.
    pub fn start(&mut self) {
        if self.config.enabled {
            self.connect(!self.config.auto_reconnect);
        }
    }

    /// Connect unless already connected or connecting. With
    /// `suppress_error_ui`, failures are only logged.
    pub fn connect(&mut self, suppress_error_ui: bool) {
        self.connection.set_auto_reconnect(self.config.auto_reconnect);
        self.connection.connect(&mut self.timers, suppress_error_ui);
    }

    /// Manual disconnect: stops the activity timers and never retries.
    pub fn disconnect(&mut self) {
        self.timers.clear(TimerKey::ClearActivity);
        self.cancel_flush();
        self.connection.disconnect(&mut self.timers);
    }

    /// Deactivation: stop every timer and close the connection.
    pub fn shutdown(&mut self) {
        self.timers.clear_all();
        self.deferred = None;
        self.connection.disconnect(&mut self.timers);
    }

    /// Take a new snapshot from the detector.
    pub fn update_activity(&mut self, info: VideoInfo) {
        if !info.has_identity() {
            if self.pending.is_some() {
                tracing::debug!("video gone, clearing activity");
                self.clear_activity();
            }
            return;
        }

        if !info.is_paused {
            self.timers.clear(TimerKey::ClearActivity);
        }

        if self.stays_dormant(&info) {
            return;
        }

        if !self.connection.is_ready() {
            self.pending = Some(info);
            return;
        }

        if self.is_significant(&info) {
            self.cancel_flush();
            self.send(&info, true);
        } else {
            self.send_or_defer(&info);
        }

        self.pending = Some(info);
    }

    /// Remove the remote activity and forget the tracked item.
    pub fn clear_activity(&mut self) {
        if self.connection.clear_activity() {
            tracing::debug!("activity cleared");
        }
        self.pending = None;
        self.deferred = None;
        self.last_send = None;
        self.dormant = None;
        self.timers.clear(TimerKey::ClearActivity);
        self.timers.clear(TimerKey::ThrottleFlush);
    }

    /// Apply a new configuration and re-evaluate connection and timeout.
    ///
    /// A changed timeout restarts a running countdown with the new value.
    pub fn on_config_change(&mut self, config: PresenceConfig) {
        let timeout_changed = config.activity_timeout != self.config.activity_timeout;
        self.config = config;
        self.connection.set_auto_reconnect(self.config.auto_reconnect);

        if !self.config.enabled {
            let active = self.connection.state() != ConnectionState::Disconnected
                || self.timers.is_armed(TimerKey::ReconnectRetry);
            if active {
                tracing::info!("presence disabled");
                self.clear_activity();
                self.disconnect();
            }
            return;
        }

        if self.connection.is_ready() {
            if let Some(info) = self.pending.clone() {
                self.send_or_defer(&info);
            }
        }

        if self.config.activity_timeout.is_none() {
            self.timers.clear(TimerKey::ClearActivity);
        } else if let Some(info) = self.pending.clone() {
            if self.connection.is_ready() {
                self.arm_timeout(&info, timeout_changed);
            }
        }

        if self.connection.state() == ConnectionState::Disconnected {
            self.connect(!self.config.auto_reconnect);
        }
    }

    /// Handle a timer expiry. Stale expiries are ignored.
    pub fn on_timer(&mut self, fired: TimerFired) {
        if !self.timers.claim(fired) {
            tracing::trace!(key = ?fired.key, "stale timer ignored");
            return;
        }

        match fired.key {
            TimerKey::ReconnectRetry => self.connection.retry(),
            TimerKey::ClearActivity => {
                tracing::info!("paused too long, clearing activity");
                let dormant = self.pending.clone();
                self.clear_activity();
                self.dormant = dormant;
            }
            TimerKey::ThrottleFlush => self.flush_deferred(),
        }
    }

    /// Handle a transport event. Ready replays the pending snapshot; a lost
    /// connection drops the throttle and timeout state.
    pub fn on_transport(&mut self, event: SessionEvent) {
        match self.connection.dispatch(event, &mut self.timers) {
            Transition::Ready => self.replay_pending(),
            Transition::Lost => {
                self.cancel_flush();
                self.timers.clear(TimerKey::ClearActivity);
                self.last_send = None;
            }
            Transition::Unchanged => {}
        }
    }

    fn is_significant(&self, info: &VideoInfo) -> bool {
        let Some(previous) = &self.pending else {
            return false;
        };

        let video_changed = info.video_id() != previous.video_id();
        let pause_changed = info.is_paused != previous.is_paused;
        let seeked =
            !video_changed && is_seek(previous.elapsed(), info.elapsed(), !info.is_paused);

        if video_changed || pause_changed || seeked {
            tracing::debug!(video_changed, pause_changed, seeked, "significant update");
            return true;
        }
        false
    }

    /// Send now if the throttle window has passed, otherwise hold `info`
    /// until it does.
    fn send_or_defer(&mut self, info: &VideoInfo) {
        let since_last = self.last_send.map(|at| at.elapsed());

        match since_last {
            Some(since) if since <= THROTTLE_WINDOW => {
                self.deferred = Some(info.clone());
                self.timers.set(TimerKey::ThrottleFlush, THROTTLE_WINDOW - since);
            }
            _ => {
                self.cancel_flush();
                self.send(info, false);
            }
        }
    }

    fn flush_deferred(&mut self) {
        let Some(snapshot) = self.deferred.take() else {
            return;
        };

        let current = self.pending.as_ref().is_some_and(|p| {
            p.video_id() == snapshot.video_id() && p.is_paused == snapshot.is_paused
        });
        if !current {
            tracing::debug!("deferred update superseded, dropped");
            return;
        }

        if self.connection.is_ready() {
            self.send(&snapshot, false);
        }
    }

    fn replay_pending(&mut self) {
        if let Some(info) = self.pending.clone() {
            tracing::debug!(video = ?info.video_id(), "replaying pending update");
            self.cancel_flush();
            self.send(&info, true);
        }
    }

    fn send(&mut self, info: &VideoInfo, restart_timeout: bool) {
        let activity = activity::build(info, &self.config);
        if self.connection.set_activity(&activity) {
            self.last_send = Some(Instant::now());
            tracing::debug!(video = ?info.video_id(), paused = info.is_paused, "activity sent");
        }
        self.arm_timeout(info, restart_timeout);
    }

    /// Arm the auto-clear timer for a paused item. A running countdown is
    /// kept unless `restart` is set.
    fn arm_timeout(&mut self, info: &VideoInfo, restart: bool) {
        match self.config.activity_timeout {
            Some(timeout) if info.is_paused => {
                if restart || !self.timers.is_armed(TimerKey::ClearActivity) {
                    self.timers.set(TimerKey::ClearActivity, timeout);
                }
            }
            _ => {
                self.timers.clear(TimerKey::ClearActivity);
            }
        }
    }

    /// After an auto-clear, polls of the same still-paused item stay quiet.
    fn stays_dormant(&mut self, info: &VideoInfo) -> bool {
        let Some(dormant) = &self.dormant else {
            return false;
        };

        let unchanged = info.is_paused
            && info.video_id() == dormant.video_id()
            && !is_seek(dormant.elapsed(), info.elapsed(), false);
        if !unchanged {
            self.dormant = None;
        }
        unchanged
    }

    fn cancel_flush(&mut self) {
        self.deferred = None;
        self.timers.clear(TimerKey::ThrottleFlush);
    }
}
