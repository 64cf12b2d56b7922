//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (download engine,
//! player, DRM probe, secure storage, settings) into the offline media core
//! and exposes the command surface hosts call. Desktop apps typically enable
//! the `desktop-shims` feature, which fills every bridge except the player
//! with the adapters from `bridge-desktop`.

pub mod error;
pub mod service;

pub use error::{CoreError, Result};
pub use service::{OfflineMediaService, OFFLINE_DOWNLOADS_DIR};

pub use core_downloads::{ContentId, DownloadRecord, DownloadRequest, DownloadState, StopReason};
pub use core_playback::{CapabilityResult, FailureReason, SessionState};
pub use core_runtime::config::{CoreConfig, DownloadPolicy, PlaybackPolicy};
pub use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
pub use core_runtime::events::{
    CoreEvent, DownloadEvent, DownloadEventKind, EventStream, PlaybackEvent, PlaybackEventKind,
};

#[cfg(feature = "desktop-shims")]
use bridge_traits::player::PlayerBackend;
#[cfg(feature = "desktop-shims")]
use std::{path::PathBuf, sync::Arc};

/// Convenience bootstrapper for desktop hosts.
///
/// Only the player has to be supplied; storage, downloads and the DRM probe
/// come from the desktop adapters.
///
/// ```no_run
/// # #[cfg(feature = "desktop-shims")]
/// # async fn example(player: std::sync::Arc<dyn bridge_traits::player::PlayerBackend>) -> core_service::Result<()> {
/// use core_service::bootstrap_desktop;
///
/// let service = bootstrap_desktop("/var/cache/my-app", player)?;
/// service.initialize("user-1").await?;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub fn bootstrap_desktop(
    cache_root: impl Into<PathBuf>,
    player: Arc<dyn PlayerBackend>,
) -> Result<OfflineMediaService> {
    let config = CoreConfig::builder()
        .cache_root(cache_root)
        .player_backend(player)
        .build()
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;
    OfflineMediaService::new(config)
}
