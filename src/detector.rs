//! Detector input: newline-delimited JSON messages from the page script.
//!
//! ```text
//! {"type":"video","id":"abc","title":"Song A","channel":"Ch1","elapsedSeconds":12.5}
//! {"type":"clear"}
//! {"type":"config","enabled":true,"activityTimeoutSeconds":300}
//! ```

use serde::Deserialize;

use crate::config::RawPresenceConfig;
use crate::service::{PresenceHandle, ServiceError};
use crate::video::VideoInfo;

/// Maximum accepted line length, in bytes.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectorMessage {
    Video(VideoInfo),
    Clear,
    Config(RawPresenceConfig),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<Result<DetectorMessage, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line))
}

/// Forward one input line to the service. Malformed lines are logged and
/// skipped; only a stopped service is an error.
pub fn forward(handle: &PresenceHandle, line: &str) -> Result<(), ServiceError> {
    match parse_line(line) {
        None => Ok(()),
        Some(Ok(DetectorMessage::Video(info))) => handle.update_activity(info),
        Some(Ok(DetectorMessage::Clear)) => handle.clear_activity(),
        Some(Ok(DetectorMessage::Config(raw))) => handle.set_config(raw.resolve()),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "ignoring malformed detector message");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_video_message() {
        let message = parse_line(r#"{"type":"video","id":"abc","title":"Song A","isPaused":true}"#)
            .unwrap()
            .unwrap();
        match message {
            DetectorMessage::Video(info) => {
                assert_eq!(info.id.as_deref(), Some("abc"));
                assert!(info.is_paused);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_clear_and_config() {
        assert_eq!(
            parse_line(r#"{"type":"clear"}"#).unwrap().unwrap(),
            DetectorMessage::Clear
        );

        let message = parse_line(r#"{"type":"config","enabled":false}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            message,
            DetectorMessage::Config(RawPresenceConfig {
                enabled: Some(false),
                ..Default::default()
            })
        );
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert!(parse_line("   ").is_none());
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(parse_line(r#"{"type":"seek","to":10}"#).unwrap().is_err());
        assert!(parse_line("not json").unwrap().is_err());
    }
}
