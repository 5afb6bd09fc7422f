//! tubepresence keeps a companion app's "now playing" presence in sync
//! with a video player.
//!
//! The detector pushes [`VideoInfo`] snapshots into a [`PresenceHandle`];
//! the service decides whether to send, coalesce or drop each one and
//! drives the companion connection through a [`CompanionTransport`].

pub mod activity;
pub mod config;
pub mod connection;
pub mod detector;
pub mod logging;
pub mod service;
pub mod timer;
pub mod video;

pub use activity::Activity;
pub use config::{DisplayMode, PresenceConfig};
pub use connection::{CompanionTransport, ConnectionState, ConnectionStatus, TransportSink};
pub use service::{PresenceHandle, PresenceService, ServiceError};
pub use video::VideoInfo;
