//! # Core Configuration Module
//!
//! Configuration management for the offline media core.
//!
//! ## Overview
//!
//! A builder constructs a [`CoreConfig`] holding every bridge the core needs
//! plus the product policy values. Validation is fail-fast: a missing bridge
//! yields [`Error::CapabilityMissing`] with an actionable message instead of a
//! failure deep inside a download or playback sequence.
//!
//! ## Required Dependencies
//!
//! - `SettingsStore` - download metadata persistence
//! - `SecureStore` - license keyset handles
//! - `FileSystemAccess` - per-user media cache
//! - `DownloadBackend` - platform download engine
//! - `PlayerBackend` - platform player (no desktop default)
//! - `DrmProbe` - device eligibility checks
//!
//! ## Optional Dependencies
//!
//! - `SurfaceHost` - needed for `launch_player` only
//! - `EventSink` - host event delivery
//! - `Clock` - defaults to the system clock
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults for the
//! stores, the filesystem, the download backend and the DRM probe are injected
//! automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, DownloadPolicy};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .cache_root("/var/cache/app")
//!     .player_backend(Arc::new(MyPlayer::new()))
//!     .download_policy(DownloadPolicy::default().with_completed_ttl_days(7))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    Clock, DownloadBackend, DrmProbe, DrmScheme, EventSink, FileSystemAccess, PlayerBackend,
    SecureStore, SettingsStore, SurfaceHost, SystemClock,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::events::DEFAULT_EVENT_BUFFER_SIZE;

/// Download lifecycle policy values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadPolicy {
    /// Lifetime of a completed download before the sweeper removes it.
    pub completed_ttl_secs: u64,
    /// Interval between progress polls.
    pub poll_interval_ms: u64,
    /// Delay before the first poll after a download starts. Covers the
    /// backend's registration latency.
    pub first_poll_delay_ms: u64,
    /// Consecutive polls without an active download before polling stops.
    pub idle_ticks_before_stop: u32,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            completed_ttl_secs: 30 * 24 * 60 * 60,
            poll_interval_ms: 1000,
            first_poll_delay_ms: 500,
            idle_ticks_before_stop: 5,
        }
    }
}

impl DownloadPolicy {
    pub fn with_completed_ttl_days(mut self, days: u64) -> Self {
        self.completed_ttl_secs = days * 24 * 60 * 60;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_first_poll_delay_ms(mut self, ms: u64) -> Self {
        self.first_poll_delay_ms = ms;
        self
    }

    pub fn with_idle_ticks_before_stop(mut self, ticks: u32) -> Self {
        self.idle_ticks_before_stop = ticks;
        self
    }

    pub fn completed_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.completed_ttl_secs as i64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn first_poll_delay(&self) -> Duration {
        Duration::from_millis(self.first_poll_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.completed_ttl_secs == 0 {
            return Err(Error::Config(
                "Completed download TTL must be greater than 0".to_string(),
            ));
        }
        if self.completed_ttl_secs > i64::MAX as u64 / 1000 {
            return Err(Error::Config("Completed download TTL is too large".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(
                "Progress poll interval must be greater than 0 ms".to_string(),
            ));
        }
        if self.idle_ticks_before_stop == 0 {
            return Err(Error::Config(
                "Idle ticks before stop must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Playback policy values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackPolicy {
    /// Time allowed between `Ready` and the first rendered frame.
    pub render_check_timeout_ms: u64,
    /// Interval of `position` events while playing.
    pub position_interval_ms: u64,
    /// Mime types probed for secure decoders during eligibility checks.
    pub secure_mime_types: Vec<String>,
}

impl Default for PlaybackPolicy {
    fn default() -> Self {
        Self {
            render_check_timeout_ms: 3000,
            position_interval_ms: 1000,
            secure_mime_types: vec!["video/avc".to_string(), "video/hevc".to_string()],
        }
    }
}

impl PlaybackPolicy {
    pub fn with_render_check_timeout_ms(mut self, ms: u64) -> Self {
        self.render_check_timeout_ms = ms;
        self
    }

    pub fn with_position_interval_ms(mut self, ms: u64) -> Self {
        self.position_interval_ms = ms;
        self
    }

    pub fn render_check_timeout(&self) -> Duration {
        Duration::from_millis(self.render_check_timeout_ms)
    }

    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.position_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.render_check_timeout_ms == 0 {
            return Err(Error::Config(
                "Render check timeout must be greater than 0 ms".to_string(),
            ));
        }
        if self.position_interval_ms == 0 {
            return Err(Error::Config(
                "Position interval must be greater than 0 ms".to_string(),
            ));
        }
        if self.secure_mime_types.is_empty() {
            return Err(Error::Config(
                "At least one mime type is required for secure decoder probing".to_string(),
            ));
        }
        Ok(())
    }
}

/// Core configuration for the offline media core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Root under which `offline-downloads/<userId>` is created
    pub cache_root: PathBuf,

    /// SQLite file backing the desktop settings store
    pub metadata_db_path: PathBuf,

    pub settings_store: Arc<dyn SettingsStore>,
    pub secure_store: Arc<dyn SecureStore>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub download_backend: Arc<dyn DownloadBackend>,
    pub player_backend: Arc<dyn PlayerBackend>,
    pub drm_probe: Arc<dyn DrmProbe>,
    pub surface_host: Option<Arc<dyn SurfaceHost>>,
    pub event_sink: Option<Arc<dyn EventSink>>,
    pub clock: Arc<dyn Clock>,

    /// DRM scheme checked for device eligibility
    pub drm_scheme: DrmScheme,

    pub download_policy: DownloadPolicy,
    pub playback_policy: PlaybackPolicy,

    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("cache_root", &self.cache_root)
            .field("metadata_db_path", &self.metadata_db_path)
            .field("settings_store", &"SettingsStore { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("download_backend", &"DownloadBackend { ... }")
            .field("player_backend", &"PlayerBackend { ... }")
            .field("drm_probe", &"DrmProbe { ... }")
            .field(
                "surface_host",
                &self.surface_host.as_ref().map(|_| "SurfaceHost { ... }"),
            )
            .field(
                "event_sink",
                &self.event_sink.as_ref().map(|_| "EventSink { ... }"),
            )
            .field("drm_scheme", &self.drm_scheme)
            .field("download_policy", &self.download_policy)
            .field("playback_policy", &self.playback_policy)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates paths, policies and the event buffer size.
    pub fn validate(&self) -> Result<()> {
        if self.cache_root.as_os_str().is_empty() {
            return Err(Error::Config("Cache root cannot be empty".to_string()));
        }

        if self.metadata_db_path.as_os_str().is_empty() {
            return Err(Error::Config("Metadata database path cannot be empty".to_string()));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        self.download_policy.validate()?;
        self.playback_policy.validate()?;

        Ok(())
    }
}

fn player_backend_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "PlayerBackend".to_string(),
        message: "PlayerBackend implementation is required for offline playback. \
                 No desktop default ships; inject the host player (ExoPlayer/AVPlayer/libmpv adapter)."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn desktop_default_missing_error(capability: &str, purpose: &str, mobile: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required for {}. \
             Desktop: ensure the 'desktop-shims' feature is enabled to use the default adapter. \
             Mobile: inject {}.",
            capability, purpose, mobile
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    use bridge_desktop::KeyringSecureStore;

    let store: Arc<dyn SecureStore> = Arc::new(KeyringSecureStore::new());
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(desktop_default_missing_error(
        "SecureStore",
        "offline license persistence",
        "platform-native secure storage (Keychain/Keystore)",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(metadata_db_path: &Path) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;
    use std::thread;
    use tokio::runtime::{Handle, Runtime};

    let init_store = |path: PathBuf| -> Result<_> {
        let runtime = Runtime::new().map_err(|e| {
            Error::Internal(format!(
                "Failed to create Tokio runtime for default settings store: {}",
                e
            ))
        })?;

        runtime
            .block_on(SqliteSettingsStore::new(path))
            .map_err(|e| {
                Error::Internal(format!("Failed to initialize default SettingsStore: {}", e))
            })
    };

    let path = metadata_db_path.to_path_buf();
    // A runtime cannot be started from inside another one; build it on a
    // scratch thread when called from async code.
    let store = match Handle::try_current() {
        Ok(_) => thread::spawn(move || init_store(path))
            .join()
            .map_err(|_| {
                Error::Internal(
                    "Worker thread panicked while creating default SettingsStore".to_string(),
                )
            })??,
        Err(_) => init_store(path)?,
    };

    let store: Arc<dyn SettingsStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(_metadata_db_path: &Path) -> Result<Arc<dyn SettingsStore>> {
    Err(desktop_default_missing_error(
        "SettingsStore",
        "download metadata persistence",
        "platform-native settings (SharedPreferences/UserDefaults)",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    let fs: Arc<dyn FileSystemAccess> = Arc::new(bridge_desktop::TokioFileSystem::new());
    Ok(fs)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(desktop_default_missing_error(
        "FileSystemAccess",
        "the offline media cache",
        "the app sandbox filesystem adapter",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_download_backend() -> Result<Arc<dyn DownloadBackend>> {
    let backend: Arc<dyn DownloadBackend> = Arc::new(bridge_desktop::HttpDownloadBackend::new()?);
    Ok(backend)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_download_backend() -> Result<Arc<dyn DownloadBackend>> {
    Err(desktop_default_missing_error(
        "DownloadBackend",
        "background downloads",
        "the platform download engine (Media3 DownloadManager/AVAssetDownloadTask)",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_drm_probe() -> Result<Arc<dyn DrmProbe>> {
    let probe: Arc<dyn DrmProbe> = Arc::new(bridge_desktop::DesktopDrmProbe::new());
    Ok(probe)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_drm_probe() -> Result<Arc<dyn DrmProbe>> {
    Err(desktop_default_missing_error(
        "DrmProbe",
        "device eligibility checks",
        "a MediaDrm/FairPlay capability probe",
    ))
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    cache_root: Option<PathBuf>,
    metadata_db_path: Option<PathBuf>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    download_backend: Option<Arc<dyn DownloadBackend>>,
    player_backend: Option<Arc<dyn PlayerBackend>>,
    drm_probe: Option<Arc<dyn DrmProbe>>,
    surface_host: Option<Arc<dyn SurfaceHost>>,
    event_sink: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    drm_scheme: Option<DrmScheme>,
    download_policy: Option<DownloadPolicy>,
    playback_policy: Option<PlaybackPolicy>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the cache root (required).
    ///
    /// Media bytes live in `<cache_root>/offline-downloads/<userId>`.
    pub fn cache_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_root = Some(path.into());
        self
    }

    /// Sets the desktop settings database path.
    ///
    /// Defaults to `<cache_root>/offline_metadata.db`.
    pub fn metadata_db_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.metadata_db_path = Some(path.into());
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn download_backend(mut self, backend: Arc<dyn DownloadBackend>) -> Self {
        self.download_backend = Some(backend);
        self
    }

    pub fn player_backend(mut self, backend: Arc<dyn PlayerBackend>) -> Self {
        self.player_backend = Some(backend);
        self
    }

    pub fn drm_probe(mut self, probe: Arc<dyn DrmProbe>) -> Self {
        self.drm_probe = Some(probe);
        self
    }

    pub fn surface_host(mut self, host: Arc<dyn SurfaceHost>) -> Self {
        self.surface_host = Some(host);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// DRM scheme to check eligibility against (default: Widevine).
    pub fn drm_scheme(mut self, scheme: DrmScheme) -> Self {
        self.drm_scheme = Some(scheme);
        self
    }

    pub fn download_policy(mut self, policy: DownloadPolicy) -> Self {
        self.download_policy = Some(policy);
        self
    }

    pub fn playback_policy(mut self, policy: PlaybackPolicy) -> Self {
        self.playback_policy = Some(policy);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Returns an error if the cache root is missing, a required bridge is
    /// missing and no desktop default applies, or a policy value is invalid.
    pub fn build(self) -> Result<CoreConfig> {
        let cache_root = self.cache_root.ok_or_else(|| {
            Error::Config("Cache root is required. Use .cache_root() to set it.".to_string())
        })?;

        let metadata_db_path = self
            .metadata_db_path
            .unwrap_or_else(|| cache_root.join("offline_metadata.db"));

        let player_backend = self.player_backend.ok_or_else(player_backend_missing_error)?;

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(&metadata_db_path)?,
        };

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };

        let download_backend = match self.download_backend {
            Some(backend) => backend,
            None => provide_default_download_backend()?,
        };

        let drm_probe = match self.drm_probe {
            Some(probe) => probe,
            None => provide_default_drm_probe()?,
        };

        let config = CoreConfig {
            cache_root,
            metadata_db_path,
            settings_store,
            secure_store,
            file_system,
            download_backend,
            player_backend,
            drm_probe,
            surface_host: self.surface_host,
            event_sink: self.event_sink,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            drm_scheme: self.drm_scheme.unwrap_or(DrmScheme::Widevine),
            download_policy: self.download_policy.unwrap_or_default(),
            playback_policy: self.playback_policy.unwrap_or_default(),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::mock::{
        FakeDownloadBackend, FakePlayerBackend, InMemoryFileSystem, InMemorySecureStore,
        InMemorySettingsStore, StaticDrmProbe,
    };

    fn complete_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .cache_root("/tmp/offline-test")
            .settings_store(Arc::new(InMemorySettingsStore::new()))
            .secure_store(Arc::new(InMemorySecureStore::new()))
            .file_system(Arc::new(InMemoryFileSystem::new("/tmp/offline-test")))
            .download_backend(Arc::new(FakeDownloadBackend::new()))
            .player_backend(Arc::new(FakePlayerBackend::new()))
            .drm_probe(Arc::new(StaticDrmProbe::hardware_secure()))
    }

    #[test]
    fn test_builder_with_all_bridges() {
        let config = complete_builder().build().unwrap();

        assert_eq!(config.cache_root, PathBuf::from("/tmp/offline-test"));
        assert_eq!(
            config.metadata_db_path,
            PathBuf::from("/tmp/offline-test/offline_metadata.db")
        );
        assert_eq!(config.drm_scheme, DrmScheme::Widevine);
        assert_eq!(config.download_policy, DownloadPolicy::default());
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert!(config.surface_host.is_none());
    }

    #[test]
    fn test_builder_requires_cache_root() {
        let result = CoreConfig::builder()
            .player_backend(Arc::new(FakePlayerBackend::new()))
            .build();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("Cache root")));
    }

    #[test]
    fn test_builder_requires_player_backend() {
        let result = CoreConfig::builder()
            .cache_root("/tmp/offline-test")
            .settings_store(Arc::new(InMemorySettingsStore::new()))
            .secure_store(Arc::new(InMemorySecureStore::new()))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, message }) => {
                assert_eq!(capability, "PlayerBackend");
                assert!(message.contains("inject"));
            }
            other => panic!("expected CapabilityMissing, got {:?}", other.map(|_| ())),
        }
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_download_backend_without_shims() {
        let result = CoreConfig::builder()
            .cache_root("/tmp/offline-test")
            .settings_store(Arc::new(InMemorySettingsStore::new()))
            .secure_store(Arc::new(InMemorySecureStore::new()))
            .file_system(Arc::new(InMemoryFileSystem::new("/tmp")))
            .player_backend(Arc::new(FakePlayerBackend::new()))
            .drm_probe(Arc::new(StaticDrmProbe::hardware_secure()))
            .build();

        assert!(matches!(
            result,
            Err(Error::CapabilityMissing { capability, .. }) if capability == "DownloadBackend"
        ));
    }

    #[test]
    fn test_default_policies() {
        let downloads = DownloadPolicy::default();
        assert_eq!(downloads.completed_ttl(), chrono::Duration::days(30));
        assert_eq!(downloads.poll_interval(), Duration::from_millis(1000));
        assert_eq!(downloads.first_poll_delay(), Duration::from_millis(500));
        assert_eq!(downloads.idle_ticks_before_stop, 5);

        let playback = PlaybackPolicy::default();
        assert_eq!(playback.render_check_timeout(), Duration::from_millis(3000));
        assert_eq!(playback.position_interval(), Duration::from_secs(1));
        assert_eq!(playback.secure_mime_types, vec!["video/avc", "video/hevc"]);
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let result = complete_builder()
            .download_policy(DownloadPolicy::default().with_poll_interval_ms(0))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));

        let result = complete_builder()
            .playback_policy(PlaybackPolicy::default().with_render_check_timeout_ms(0))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));

        let result = complete_builder()
            .download_policy(DownloadPolicy::default().with_idle_ticks_before_stop(0))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_cache_root() {
        let result = complete_builder().cache_root("").build();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("empty")));
    }

    #[test]
    fn test_policies_deserialize_with_defaults() {
        let policy: DownloadPolicy =
            serde_json::from_str(r#"{"completed_ttl_secs": 86400}"#).unwrap();
        assert_eq!(policy.completed_ttl(), chrono::Duration::days(1));
        assert_eq!(policy.poll_interval_ms, 1000);

        let playback: PlaybackPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(playback, PlaybackPolicy::default());
    }

    #[test]
    fn test_config_debug_hides_bridges() {
        let config = complete_builder().build().unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("SettingsStore { ... }"));
        assert!(debug.contains("cache_root"));
    }

    #[test]
    fn test_config_is_cloneable() {
        let config = complete_builder().drm_scheme(DrmScheme::PlayReady).build().unwrap();
        let cloned = config.clone();
        assert_eq!(cloned.drm_scheme, DrmScheme::PlayReady);
        assert!(Arc::ptr_eq(&config.player_backend, &cloned.player_backend));
    }
}
