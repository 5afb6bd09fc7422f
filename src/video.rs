//! Video snapshots pushed by the page detector.
//!
//! Every field is optional on the wire: the detector scrapes an unstable
//! page and sends whatever it managed to find.

use serde::{Deserialize, Serialize};
use url::Url;

/// Jumps in elapsed time above this many seconds count as a seek.
pub const SEEK_TOLERANCE_SECS: f64 = 2.0;

/// Playback a playing video may legitimately advance between two polls.
pub const POLL_DRIFT_SECS: f64 = 2.0;

/// One snapshot of what the player is showing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoInfo {
    pub id: Option<String>,
    pub video_id: Option<String>,
    pub title: Option<String>,
    pub channel: Option<String>,
    pub url: Option<String>,
    #[serde(alias = "imageSrc", alias = "thumbnailUrl")]
    pub thumbnail: Option<String>,
    /// Milliseconds since the Unix epoch at which playback started.
    pub start_time: Option<i64>,
    pub is_paused: bool,
    pub elapsed_seconds: Option<f64>,
    pub song_duration: Option<f64>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub tags: Vec<String>,
}

impl VideoInfo {
    /// Effective video id: `videoId`, then `id`, then whatever the URL carries.
    pub fn video_id(&self) -> Option<String> {
        non_empty(self.video_id.as_deref())
            .or_else(|| non_empty(self.id.as_deref()))
            .map(str::to_owned)
            .or_else(|| self.url.as_deref().and_then(extract_video_id))
    }

    /// True if the snapshot names something a user would recognise.
    pub fn has_identity(&self) -> bool {
        non_empty(self.title.as_deref()).is_some() || non_empty(self.channel.as_deref()).is_some()
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed_seconds.unwrap_or(0.0)
    }

    /// Link back to the video: the detector's URL, else one built from the id.
    pub fn source_url(&self) -> Option<String> {
        non_empty(self.url.as_deref())
            .map(str::to_owned)
            .or_else(|| self.video_id().map(|id| watch_url(&id)))
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Pull the video id out of a watch, short-link, shorts, embed or live URL.
pub fn extract_video_id(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    let host = parsed.host_str()?;

    if host == "youtu.be" {
        return parsed
            .path_segments()?
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
    }

    if host != "youtube.com" && !host.ends_with(".youtube.com") {
        return None;
    }

    if let Some((_, v)) = parsed.query_pairs().find(|(k, _)| k == "v") {
        if !v.is_empty() {
            return Some(v.into_owned());
        }
    }

    let mut segments = parsed.path_segments()?;
    match segments.next() {
        Some("shorts" | "embed" | "live") => segments
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_owned),
        _ => None,
    }
}

pub fn watch_url(video_id: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(video_id.as_bytes()).collect();
    format!("https://www.youtube.com/watch?v={encoded}")
}

pub fn thumbnail_url(video_id: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(video_id.as_bytes()).collect();
    format!("https://img.youtube.com/vi/{encoded}/maxresdefault.jpg")
}

/// Decide whether a change in elapsed time is a user seek or polling drift.
///
/// Backward jumps beyond the tolerance are always seeks. Forward jumps get
/// an extra allowance while playing, since the video keeps advancing
/// between two detector polls.
pub fn is_seek(previous_secs: f64, current_secs: f64, playing: bool) -> bool {
    let delta = current_secs - previous_secs;
    let forward_allowance = if playing {
        SEEK_TOLERANCE_SECS + POLL_DRIFT_SECS
    } else {
        SEEK_TOLERANCE_SECS
    };

    delta < -SEEK_TOLERANCE_SECS || delta > forward_allowance
}
