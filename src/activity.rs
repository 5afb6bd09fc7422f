//! Presence payload construction.
//!
//! [`build`] is a pure transform from a [`VideoInfo`] snapshot and the
//! current [`PresenceConfig`] to the [`Activity`] handed to the
//! companion. It never fails: missing fields fall back to fixed text.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::{DisplayMode, PresenceConfig};
use crate::video::{VideoInfo, non_empty, thumbnail_url};

/// Longest text field the companion accepts, in characters.
pub const MAX_FIELD_CHARS: usize = 128;
/// Shortest text field the companion accepts, in characters.
pub const MIN_FIELD_CHARS: usize = 2;
/// Invisible filler used to pad short fields.
pub const FILLER: char = '\u{3164}';

const ELLIPSIS: &str = "...";
const DEFAULT_IMAGE: &str = "youtube";
const DEFAULT_TITLE: &str = "YouTube Video";
const DEFAULT_CHANNEL: &str = "Unknown Channel";
const PAUSED_TEXT: &str = "⏸︎ Paused";
const SOURCE_BUTTON_LABEL: &str = "Watch on YouTube";
const APP_BUTTON_LABEL: &str = "View App";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub label: String,
    pub url: String,
}

/// Start and optional end of the displayed progress, in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timestamps {
    pub start: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// The "now playing" payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub details: String,
    pub state: String,
    pub large_image: String,
    pub large_text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Timestamps>,
    pub status_display: DisplayMode,
}

/// Build the payload for `info` at the current wall-clock time.
pub fn build(info: &VideoInfo, config: &PresenceConfig) -> Activity {
    build_at(info, config, SystemTime::now())
}

/// Build the payload for `info` as of `now`.
pub fn build_at(info: &VideoInfo, config: &PresenceConfig, now: SystemTime) -> Activity {
    let title = fit_field(non_empty(info.title.as_deref()).unwrap_or(DEFAULT_TITLE));
    let state = fit_field(
        non_empty(info.artist.as_deref())
            .or_else(|| non_empty(info.channel.as_deref()))
            .unwrap_or(DEFAULT_CHANNEL),
    );

    let large_text = if info.is_paused {
        PAUSED_TEXT.to_owned()
    } else {
        title.clone()
    };

    Activity {
        details: title,
        state,
        large_image: image_for(info),
        large_text,
        buttons: buttons_for(info, config),
        timestamps: timestamps_for(info, config, now),
        status_display: config.display_mode,
    }
}

fn image_for(info: &VideoInfo) -> String {
    if let Some(thumbnail) = non_empty(info.thumbnail.as_deref()) {
        return thumbnail.to_owned();
    }
    match info.video_id() {
        Some(id) => thumbnail_url(&id),
        None => DEFAULT_IMAGE.to_owned(),
    }
}

fn buttons_for(info: &VideoInfo, config: &PresenceConfig) -> Vec<Button> {
    let mut buttons = Vec::with_capacity(2);

    if config.show_source_link {
        if let Some(url) = info.source_url() {
            buttons.push(Button {
                label: SOURCE_BUTTON_LABEL.to_owned(),
                url,
            });
        }
    }

    if let Some(url) = &config.app_link {
        buttons.push(Button {
            label: APP_BUTTON_LABEL.to_owned(),
            url: url.clone(),
        });
    }

    buttons
}

fn timestamps_for(
    info: &VideoInfo,
    config: &PresenceConfig,
    now: SystemTime,
) -> Option<Timestamps> {
    if info.is_paused {
        return None;
    }

    if !config.hide_remaining_time {
        if let Some(timestamps) = progress_timestamps(info, now) {
            return Some(timestamps);
        }
    }

    info.start_time.map(|start_ms| Timestamps {
        start: start_ms.div_euclid(1000),
        end: None,
    })
}

/// Start and end derived from elapsed time and duration. `None` when either
/// is unknown or the result does not fit an epoch timestamp.
fn progress_timestamps(info: &VideoInfo, now: SystemTime) -> Option<Timestamps> {
    let duration = info.song_duration.filter(|d| d.is_finite() && *d > 0.0)?;
    let elapsed = info.elapsed_seconds.filter(|e| e.is_finite() && *e >= 0.0)?;

    let start_ms = epoch_millis(now).checked_sub(to_millis(elapsed)?)?;
    let end_ms = start_ms.checked_add(to_millis(duration)?)?;
    Some(Timestamps {
        start: start_ms.div_euclid(1000),
        end: Some(end_ms.div_euclid(1000)),
    })
}

fn to_millis(secs: f64) -> Option<i64> {
    let ms = secs * 1000.0;
    (ms < i64::MAX as f64).then_some(ms as i64)
}

fn epoch_millis(now: SystemTime) -> i64 {
    now.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Pad then truncate a text field into the companion's accepted range.
pub fn fit_field(value: &str) -> String {
    truncate(&pad(value), MAX_FIELD_CHARS)
}

/// Right-pad non-empty text shorter than [`MIN_FIELD_CHARS`] with [`FILLER`].
pub fn pad(value: &str) -> String {
    let len = value.chars().count();
    if len == 0 || len >= MIN_FIELD_CHARS {
        return value.to_owned();
    }
    let mut padded = value.to_owned();
    padded.extend(std::iter::repeat_n(FILLER, MIN_FIELD_CHARS - len));
    padded
}

/// Cut `value` to at most `limit` characters, ending in an ellipsis when cut.
pub fn truncate(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_owned();
    }
    let keep = limit.saturating_sub(ELLIPSIS.len());
    let mut cut: String = value.chars().take(keep).collect();
    cut.push_str(ELLIPSIS);
    cut
}
