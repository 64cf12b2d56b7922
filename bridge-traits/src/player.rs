//! Player bridge traits and supporting media types.
//!
//! The core never creates or destroys the platform decoder pipeline; it holds
//! one [`PlayerBackend`] for the process lifetime and only swaps its source.
//! Player callbacks (state, frame geometry, errors) are pushed as
//! [`PlayerSignal`]s onto a channel the core drains.

use async_trait::async_trait;
use core_async::sync::mpsc;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;

/// Playback source bound to the offline media cache.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaSource {
    pub content_id: String,
    /// Manifest or media URI; used as the cache key only.
    pub uri: String,
    /// Per-user offline cache directory the source reads from.
    pub cache_dir: PathBuf,
    /// Offline license handle, when the content is protected.
    pub keyset_handle: Option<Vec<u8>>,
    network_fallback: bool,
}

impl MediaSource {
    /// Source that reads exclusively from `cache_dir`.
    pub fn local(content_id: impl Into<String>, uri: impl Into<String>, cache_dir: PathBuf) -> Self {
        Self {
            content_id: content_id.into(),
            uri: uri.into(),
            cache_dir,
            keyset_handle: None,
            network_fallback: false,
        }
    }

    pub fn with_keyset_handle(mut self, handle: Vec<u8>) -> Self {
        self.keyset_handle = Some(handle);
        self
    }

    /// Allow the platform to fetch uncached segments from the network.
    ///
    /// Offline playback refuses such sources.
    pub fn with_network_fallback(mut self) -> Self {
        self.network_fallback = true;
        self
    }

    pub fn is_local_only(&self) -> bool {
        !self.network_fallback
    }

    pub fn is_protected(&self) -> bool {
        self.keyset_handle.is_some()
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSource")
            .field("content_id", &self.content_id)
            .field("uri", &self.uri)
            .field("cache_dir", &self.cache_dir)
            .field("protected", &self.is_protected())
            .field("network_fallback", &self.network_fallback)
            .finish()
    }
}

/// Opaque reference to a host rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// Unique identifier used to correlate log lines of one `play()` sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackSessionId(Uuid);

impl PlaybackSessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PlaybackSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlaybackSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Error codes reported by the platform player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerErrorCode {
    DrmLicenseAcquisitionFailed,
    DrmSchemeUnsupported,
    DrmDeviceRevoked,
    DrmLicenseExpired,
    DrmDisallowedOperation,
    DrmProvisioningFailed,
    DrmSystemError,
    DrmContentError,
    DecoderInitFailed,
    DecodingFailed,
    SourceIo,
    SourceMissing,
    Unspecified,
}

/// Callback from the platform player.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerSignal {
    Buffering,
    Ready,
    IsPlayingChanged(bool),
    Ended,
    /// Decoded frame geometry; `0x0` means no frame has been rendered.
    VideoSizeChanged { width: u32, height: u32 },
    Error { code: PlayerErrorCode, message: String },
}

pub type PlayerSignalSender = mpsc::UnboundedSender<PlayerSignal>;
pub type PlayerSignalReceiver = mpsc::UnboundedReceiver<PlayerSignal>;

/// Long-lived platform player.
///
/// `prepare` binds the secure decode path to the surface marked by
/// [`PlayerBackend::mark_surface_secure`]; preparing protected content before
/// a surface exists yields audio-only playback on most platforms.
#[async_trait]
pub trait PlayerBackend: Send + Sync {
    async fn set_source(&self, source: MediaSource) -> Result<()>;

    async fn prepare(&self) -> Result<()>;

    async fn seek(&self, position: Duration) -> Result<()>;

    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Drop the current source while keeping the decoder pipeline alive.
    async fn clear_source(&self) -> Result<()>;

    /// Release the player for good. No other call is valid afterwards.
    async fn release(&self) -> Result<()>;

    async fn position(&self) -> Result<Duration>;

    /// Duration of the current source, `None` while unknown.
    async fn duration(&self) -> Result<Option<Duration>>;

    /// Route output to `surface` as a secure (protected) surface.
    async fn mark_surface_secure(&self, surface: SurfaceHandle) -> Result<()>;

    fn set_signal_sender(&self, sender: PlayerSignalSender);
}
