//! Discord Rich Presence transport using discord-sdk.
//!
//! Each session runs as a background task that owns the `Discord`
//! client. Activity updates reach it over a channel; dropping the
//! channel sender ends the session.

use std::time::Duration;

use discord_sdk::{
    Discord, Subscriptions,
    activity::{ActivityBuilder, Assets, Button},
    wheel::{UserState, Wheel},
};
use tokio::sync::mpsc;

use super::{CompanionTransport, TransportError, TransportSink};
use crate::activity::Activity;

/// Timeout for the Discord login handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

enum Command {
    Set(Box<Activity>),
    Clear,
}

/// Transport talking to the local Discord client over its IPC pipe.
pub struct DiscordTransport {
    app_id: i64,
    commands: Option<mpsc::UnboundedSender<Command>>,
}

impl DiscordTransport {
    pub fn new(app_id: i64) -> Self {
        Self {
            app_id,
            commands: None,
        }
    }

    fn enqueue(&self, command: Command) {
        match &self.commands {
            Some(tx) => {
                if tx.send(command).is_err() {
                    tracing::debug!("discord session already ended, update dropped");
                }
            }
            None => tracing::debug!("no discord session, update dropped"),
        }
    }
}

impl CompanionTransport for DiscordTransport {
    fn name(&self) -> &'static str {
        "discord"
    }

    fn open(&mut self, sink: TransportSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.commands = Some(tx);
        tokio::spawn(run_session(self.app_id, sink, rx));
    }

    fn set_activity(&mut self, activity: &Activity) {
        self.enqueue(Command::Set(Box::new(activity.clone())));
    }

    fn clear_activity(&mut self) {
        self.enqueue(Command::Clear);
    }

    fn close(&mut self) {
        self.commands = None;
    }
}

/// One Discord session: connect, wait for login, then apply updates until
/// the transport closes the session or Discord goes away.
///
/// `Discord::new` only starts the client's connection loop, so the session
/// reports `connected` once the user watch shows a logged-in account.
async fn run_session(
    app_id: i64,
    sink: TransportSink,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let (wheel, handler) = Wheel::new(Box::new(|err| {
        tracing::warn!(error = ?err, "discord error");
    }));

    let mut user = wheel.user();

    let discord = match Discord::new(app_id, Subscriptions::ACTIVITY, Box::new(handler)) {
        Ok(d) => d,
        Err(e) => {
            sink.failed(TransportError::Unavailable(format!("{e:?}")));
            return;
        }
    };

    let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        if user.0.changed().await.is_err() {
            return Err("discord connection closed".to_string());
        }
        match &*user.0.borrow() {
            UserState::Connected(account) => Ok(account.username.clone()),
            UserState::Disconnected(err) => Err(format!("discord disconnected: {err:?}")),
        }
    })
    .await;

    match handshake {
        Ok(Ok(username)) => {
            tracing::info!(%username, "discord rich presence connected");
            sink.connected();
            sink.ready();
        }
        Ok(Err(reason)) => {
            sink.failed(TransportError::Handshake(reason));
            discord.disconnect().await;
            return;
        }
        Err(_) => {
            sink.failed(TransportError::Handshake("timed out".into()));
            discord.disconnect().await;
            return;
        }
    }

    loop {
        tokio::select! {
            command = commands.recv() => {
                let result = match command {
                    Some(Command::Set(activity)) => {
                        discord.update_activity(to_discord(&activity)).await.map(|_| ())
                    }
                    Some(Command::Clear) => discord.clear_activity().await.map(|_| ()),
                    None => break,
                };
                if let Err(e) = result {
                    tracing::debug!(error = ?e, "failed to update discord activity");
                }
            }
            changed = user.0.changed() => {
                let lost = changed.is_err()
                    || matches!(&*user.0.borrow(), UserState::Disconnected(_));
                if lost {
                    sink.disconnected("discord connection lost");
                    break;
                }
            }
        }
    }

    discord.disconnect().await;
    tracing::debug!("discord session ended");
}

fn to_discord(activity: &Activity) -> ActivityBuilder {
    let mut builder = ActivityBuilder::new()
        .details(activity.details.clone())
        .state(activity.state.clone())
        .assets(Assets::default().large(
            activity.large_image.clone(),
            Some(activity.large_text.clone()),
        ));

    for button in &activity.buttons {
        builder = builder.button(Button {
            label: button.label.clone(),
            url: button.url.clone(),
        });
    }

    if let Some(timestamps) = activity.timestamps {
        builder = builder.start_timestamp(timestamps.start);
        if let Some(end) = timestamps.end {
            builder = builder.end_timestamp(end);
        }
    }

    builder
}
