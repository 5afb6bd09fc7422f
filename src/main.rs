use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use futures::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use tubepresence::config::{self, PresenceConfig};
use tubepresence::connection::CompanionTransport;
use tubepresence::connection::discord::DiscordTransport;
use tubepresence::connection::log::LogTransport;
use tubepresence::detector::{self, MAX_LINE_BYTES};
use tubepresence::logging::init_logging;
use tubepresence::service::{PresenceHandle, PresenceService};

/// Rich presence daemon: reads detector messages on stdin and keeps the
/// companion's "now playing" status in sync.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Presence config file (JSON). Re-read on SIGHUP.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Discord application id.
    #[arg(long)]
    client_id: Option<i64>,

    /// Log payloads instead of connecting to Discord.
    #[arg(long)]
    dry_run: bool,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = match &args.config {
        Some(path) => match config::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "failed to load config");
                return ExitCode::FAILURE;
            }
        },
        None => PresenceConfig::default(),
    };

    let transport: Box<dyn CompanionTransport> = match (args.dry_run, args.client_id) {
        (true, _) => Box::new(LogTransport::new()),
        (false, Some(app_id)) => Box::new(DiscordTransport::new(app_id)),
        (false, None) => {
            tracing::error!("--client-id is required unless --dry-run is given");
            return ExitCode::FAILURE;
        }
    };

    let (handle, task) = PresenceService::spawn(transport, config);

    #[cfg(unix)]
    if let Some(path) = args.config.clone() {
        spawn_reload_on_hangup(handle.clone(), path);
    }

    read_detector_input(&handle).await;

    if let Err(e) = handle.shutdown().await {
        tracing::debug!(error = %e, "service already stopped");
    }
    if let Err(e) = task.await {
        tracing::error!(error = %e, "presence service panicked");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Forward stdin lines until EOF, Ctrl-C or the service stops.
async fn read_detector_input(handle: &PresenceHandle) {
    let mut lines = FramedRead::new(
        tokio::io::stdin(),
        LinesCodec::new_with_max_length(MAX_LINE_BYTES),
    );

    loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    if detector::forward(handle, &line).is_err() {
                        tracing::warn!("presence service stopped");
                        return;
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    tracing::warn!(max = MAX_LINE_BYTES, "detector line too long, skipped");
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "failed to read detector input");
                    return;
                }
                None => {
                    tracing::info!("detector input closed");
                    return;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                return;
            }
        }
    }
}

#[cfg(unix)]
fn spawn_reload_on_hangup(handle: PresenceHandle, path: PathBuf) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGHUP, config reload disabled");
                return;
            }
        };

        while hangup.recv().await.is_some() {
            match config::load(&path) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "config reloaded");
                    if handle.set_config(config).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "config reload failed, keeping previous config");
                }
            }
        }
    });
}
