//! Host application hooks: event delivery and player surface presentation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which host listener an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventChannel {
    DownloadProgress,
    Playback,
}

impl EventChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventChannel::DownloadProgress => "downloadProgress",
            EventChannel::Playback => "playback",
        }
    }
}

/// Delivers serialized events to the host listener.
///
/// Delivery is fire-and-forget; the core logs and drops failed deliveries.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, channel: EventChannel, payload: serde_json::Value) -> Result<()>;
}

/// Presents and dismisses the full-screen player surface.
#[async_trait]
pub trait SurfaceHost: Send + Sync {
    /// Show a player surface for `content_id`. The surface reports back through
    /// `attach_surface` once it is ready.
    async fn present_player(&self, content_id: &str) -> Result<()>;

    async fn dismiss_player(&self) -> Result<()>;
}
