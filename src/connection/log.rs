//! Dry-run transport: every session is ready at once and payloads go to
//! the log instead of a companion process.

use super::{CompanionTransport, TransportSink};
use crate::activity::Activity;

#[derive(Debug, Default)]
pub struct LogTransport {
    open: bool,
}

impl LogTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CompanionTransport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    fn open(&mut self, sink: TransportSink) {
        self.open = true;
        sink.connected();
        sink.ready();
    }

    fn set_activity(&mut self, activity: &Activity) {
        match serde_json::to_string(activity) {
            Ok(json) => tracing::info!(activity = %json, "set activity"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize activity"),
        }
    }

    fn clear_activity(&mut self) {
        tracing::info!("clear activity");
    }

    fn close(&mut self) {
        if std::mem::take(&mut self.open) {
            tracing::info!("session closed");
        }
    }
}
