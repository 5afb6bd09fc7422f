//! Presence service: the event loop around [`UpdateCoordinator`].
//!
//! All inputs (detector commands, timer expiries, transport events) are
//! handled one at a time by a single task, so coordinator state needs no
//! locking. Callers talk to it through a cloneable [`PresenceHandle`].

pub mod coordinator;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::PresenceConfig;
use crate::connection::{CompanionTransport, ConnectionState, ConnectionStatus};
use crate::timer::TimerKey;
use crate::video::VideoInfo;

pub use coordinator::{Inputs, THROTTLE_WINDOW, UpdateCoordinator};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("presence service is not running")]
    Stopped,
}

/// Point-in-time view of the service, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSnapshot {
    pub state: ConnectionState,
    pub pending: Option<VideoInfo>,
    pub armed: Vec<TimerKey>,
}

enum Command {
    Update(Box<VideoInfo>),
    Clear,
    Config(PresenceConfig),
    Connect { suppress_error_ui: bool },
    Disconnect,
    Snapshot(oneshot::Sender<ServiceSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a running [`PresenceService`].
#[derive(Clone)]
pub struct PresenceHandle {
    tx: UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
}

impl PresenceHandle {
    fn send(&self, command: Command) -> Result<(), ServiceError> {
        self.tx.send(command).map_err(|_| ServiceError::Stopped)
    }

    pub fn update_activity(&self, info: VideoInfo) -> Result<(), ServiceError> {
        self.send(Command::Update(Box::new(info)))
    }

    pub fn clear_activity(&self) -> Result<(), ServiceError> {
        self.send(Command::Clear)
    }

    pub fn set_config(&self, config: PresenceConfig) -> Result<(), ServiceError> {
        self.send(Command::Config(config))
    }

    pub fn connect(&self, suppress_error_ui: bool) -> Result<(), ServiceError> {
        self.send(Command::Connect { suppress_error_ui })
    }

    pub fn disconnect(&self) -> Result<(), ServiceError> {
        self.send(Command::Disconnect)
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Receiver that changes whenever the connection status does.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Snapshot taken after every previously sent command was handled.
    pub async fn snapshot(&self) -> Result<ServiceSnapshot, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    /// Stop the service: timers cleared, companion disconnected.
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx))?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }
}

/// Owns the coordinator and every input channel feeding it.
pub struct PresenceService {
    coordinator: UpdateCoordinator,
    inputs: Inputs,
    commands: UnboundedReceiver<Command>,
}

impl PresenceService {
    pub fn new(
        transport: Box<dyn CompanionTransport>,
        config: PresenceConfig,
    ) -> (Self, PresenceHandle) {
        let (coordinator, inputs) = UpdateCoordinator::new(transport, config);
        let (tx, commands) = unbounded_channel();
        let handle = PresenceHandle {
            tx,
            status: coordinator.subscribe(),
        };

        let service = Self {
            coordinator,
            inputs,
            commands,
        };
        (service, handle)
    }

    /// Create the service and run it on a new task.
    pub fn spawn(
        transport: Box<dyn CompanionTransport>,
        config: PresenceConfig,
    ) -> (PresenceHandle, JoinHandle<()>) {
        let (service, handle) = Self::new(transport, config);
        let task = tokio::spawn(service.run());
        (handle, task)
    }

    /// Run until shut down or every handle is dropped.
    pub async fn run(mut self) {
        self.coordinator.start();
        tracing::debug!("presence service started");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.coordinator.shutdown();
                        break;
                    };
                    if !self.handle(command) {
                        break;
                    }
                }
                Some(fired) = self.inputs.timers.recv() => self.coordinator.on_timer(fired),
                Some(event) = self.inputs.transport.recv() => self.coordinator.on_transport(event),
            }
        }

        tracing::debug!("presence service stopped");
    }

    /// Apply one command. Returns `false` once the service should stop.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Update(info) => self.coordinator.update_activity(*info),
            Command::Clear => self.coordinator.clear_activity(),
            Command::Config(config) => self.coordinator.on_config_change(config),
            Command::Connect { suppress_error_ui } => self.coordinator.connect(suppress_error_ui),
            Command::Disconnect => self.coordinator.disconnect(),
            Command::Snapshot(reply) => {
                let armed = [
                    TimerKey::ReconnectRetry,
                    TimerKey::ClearActivity,
                    TimerKey::ThrottleFlush,
                ]
                .into_iter()
                .filter(|key| self.coordinator.is_armed(*key))
                .collect();

                let _ = reply.send(ServiceSnapshot {
                    state: self.coordinator.connection_state(),
                    pending: self.coordinator.pending().cloned(),
                    armed,
                });
            }
            Command::Shutdown(done) => {
                self.coordinator.shutdown();
                let _ = done.send(());
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::connection::mock::{Call, MockTransport};

    fn song(elapsed: f64) -> VideoInfo {
        VideoInfo {
            id: Some("abc".into()),
            title: Some("Song A".into()),
            channel: Some("Ch1".into()),
            elapsed_seconds: Some(elapsed),
            ..Default::default()
        }
    }

    async fn wait_ready(handle: &PresenceHandle) {
        let mut status = handle.subscribe();
        status
            .wait_for(|s| s.state == ConnectionState::Ready)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sends_through_handle() {
        let (transport, probe) = MockTransport::auto_ready();
        let (handle, task) = PresenceService::spawn(Box::new(transport), PresenceConfig::default());
        wait_ready(&handle).await;

        handle.update_activity(song(0.0)).unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, ConnectionState::Ready);
        assert_eq!(snapshot.pending, Some(song(0.0)));
        assert_eq!(probe.sent().len(), 1);

        handle.update_activity(song(1.0)).unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.armed, [TimerKey::ThrottleFlush]);

        tokio::time::sleep(THROTTLE_WINDOW + Duration::from_secs(1)).await;
        handle.snapshot().await.unwrap();
        assert_eq!(probe.sent().len(), 2);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert_eq!(probe.count(|c| matches!(c, Call::Close)), 1);
        assert!(handle.update_activity(song(2.0)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn config_toggle_through_handle() {
        let (transport, probe) = MockTransport::auto_ready();
        let (handle, _task) =
            PresenceService::spawn(Box::new(transport), PresenceConfig::default());
        wait_ready(&handle).await;

        handle
            .set_config(PresenceConfig {
                enabled: false,
                ..Default::default()
            })
            .unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert_eq!(handle.status().state, ConnectionState::Disconnected);

        handle.set_config(PresenceConfig::default()).unwrap();
        wait_ready(&handle).await;
        assert_eq!(probe.count(|c| matches!(c, Call::Open)), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_stops_the_service() {
        let (transport, probe) = MockTransport::auto_ready();
        let (handle, task) = PresenceService::spawn(Box::new(transport), PresenceConfig::default());
        wait_ready(&handle).await;

        drop(handle);
        task.await.unwrap();
        assert_eq!(probe.count(|c| matches!(c, Call::Close)), 1);
    }
}
