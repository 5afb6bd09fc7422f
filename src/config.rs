//! Presence configuration.
//!
//! The settings store hands us loosely-typed objects with any subset of
//! keys. [`RawPresenceConfig`] mirrors that shape; it is resolved once,
//! at the load or change boundary, into a fully populated
//! [`PresenceConfig`] so the service never needs fallback expressions.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default idle time before a paused item's presence is cleared.
pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Configuration loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Which activity field the companion shows next to the user's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// The application name.
    Name,
    /// The state line (channel).
    State,
    /// The details line (title).
    #[default]
    Details,
}

impl DisplayMode {
    /// Map the numeric status display type used by older settings files.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Name),
            1 => Some(Self::State),
            2 => Some(Self::Details),
            _ => None,
        }
    }
}

/// Fully resolved presence configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceConfig {
    pub enabled: bool,
    pub auto_reconnect: bool,
    /// `None` when the auto-clear timeout is disabled.
    pub activity_timeout: Option<Duration>,
    pub show_source_link: bool,
    pub hide_remaining_time: bool,
    pub display_mode: DisplayMode,
    /// Target of the optional "View App" button.
    pub app_link: Option<String>,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        RawPresenceConfig::default().resolve()
    }
}

/// Presence configuration as stored, every key optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPresenceConfig {
    pub enabled: Option<bool>,
    pub auto_reconnect: Option<bool>,
    pub activity_timeout_enabled: Option<bool>,
    pub activity_timeout_seconds: Option<u64>,
    #[serde(alias = "playOnYouTube")]
    pub show_source_link: Option<bool>,
    #[serde(alias = "hideDurationLeft")]
    pub hide_remaining_time: Option<bool>,
    pub display_mode: Option<DisplayMode>,
    pub app_link: Option<String>,
    /// Legacy timeout in milliseconds. `activityTimeoutSeconds` wins.
    pub activity_timeout_time: Option<u64>,
    /// Legacy numeric display mode. `displayMode` wins.
    pub status_display_type: Option<u8>,
}

impl RawPresenceConfig {
    /// Apply defaults. A zero-second timeout counts as disabled.
    pub fn resolve(self) -> PresenceConfig {
        let timeout = self
            .activity_timeout_seconds
            .map(Duration::from_secs)
            .or_else(|| self.activity_timeout_time.map(Duration::from_millis))
            .unwrap_or(DEFAULT_ACTIVITY_TIMEOUT);

        let activity_timeout = (self.activity_timeout_enabled.unwrap_or(true)
            && !timeout.is_zero())
        .then_some(timeout);

        PresenceConfig {
            enabled: self.enabled.unwrap_or(true),
            auto_reconnect: self.auto_reconnect.unwrap_or(true),
            activity_timeout,
            show_source_link: self.show_source_link.unwrap_or(true),
            hide_remaining_time: self.hide_remaining_time.unwrap_or(false),
            display_mode: self
                .display_mode
                .or_else(|| self.status_display_type.and_then(DisplayMode::from_code))
                .unwrap_or_default(),
            app_link: self
                .app_link
                .map(|link| link.trim().to_owned())
                .filter(|link| !link.is_empty()),
        }
    }
}

/// Load and resolve a JSON config file. A missing file yields defaults.
pub fn load(path: &Path) -> Result<PresenceConfig, ConfigError> {
    tracing::debug!(path = %path.display(), "loading presence config");

    if !path.exists() {
        return Ok(PresenceConfig::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    parse(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub fn parse(contents: &str) -> Result<PresenceConfig, serde_json::Error> {
    let raw: RawPresenceConfig = serde_json::from_str(contents)?;
    Ok(raw.resolve())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_resolves_to_defaults() {
        let config = parse("{}").unwrap();
        assert_eq!(config, PresenceConfig::default());
        assert!(config.enabled);
        assert!(config.auto_reconnect);
        assert_eq!(config.activity_timeout, Some(DEFAULT_ACTIVITY_TIMEOUT));
        assert!(config.show_source_link);
        assert!(!config.hide_remaining_time);
        assert_eq!(config.display_mode, DisplayMode::Details);
        assert_eq!(config.app_link, None);
    }

    #[test]
    fn timeout_disabled_by_flag_or_zero() {
        let config =
            parse(r#"{"activityTimeoutEnabled":false,"activityTimeoutSeconds":5}"#).unwrap();
        assert_eq!(config.activity_timeout, None);

        let config = parse(r#"{"activityTimeoutSeconds":0}"#).unwrap();
        assert_eq!(config.activity_timeout, None);

        let config = parse(r#"{"activityTimeoutSeconds":5}"#).unwrap();
        assert_eq!(config.activity_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn accepts_legacy_key_names() {
        let config = parse(
            r#"{"playOnYouTube":false,"hideDurationLeft":true,"statusDisplayType":1,
                "activityTimeoutTime":90000}"#,
        )
        .unwrap();
        assert!(!config.show_source_link);
        assert!(config.hide_remaining_time);
        assert_eq!(config.display_mode, DisplayMode::State);
        assert_eq!(config.activity_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn current_keys_win_over_legacy_ones() {
        let config = parse(
            r#"{"displayMode":"name","statusDisplayType":1,
                "activityTimeoutSeconds":30,"activityTimeoutTime":90000}"#,
        )
        .unwrap();
        assert_eq!(config.display_mode, DisplayMode::Name);
        assert_eq!(config.activity_timeout, Some(Duration::from_secs(30)));

        let config = parse(r#"{"statusDisplayType":7}"#).unwrap();
        assert_eq!(config.display_mode, DisplayMode::Details);
    }

    #[test]
    fn blank_app_link_is_dropped() {
        let config = parse(r#"{"appLink":"  "}"#).unwrap();
        assert_eq!(config.app_link, None);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, PresenceConfig::default());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presence.json");
        std::fs::write(&path, r#"{"enabled":false,"autoReconnect":false}"#).unwrap();

        let config = load(&path).unwrap();
        assert!(!config.enabled);
        assert!(!config.auto_reconnect);
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presence.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(load(&path), Err(ConfigError::Parse { .. })));
    }
}
