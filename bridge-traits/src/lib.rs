//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the offline media core and
//! platform-specific implementations. Each trait represents a capability that
//! the core requires but that must be implemented differently per platform.
//!
//! ## Traits
//!
//! ### Storage
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Offline media cache directories
//! - [`SecureStore`](storage::SecureStore) - License keyset handles (Keychain/Keystore)
//! - [`SettingsStore`](storage::SettingsStore) - Download metadata
//!
//! ### Media engines
//! - [`DownloadBackend`](download::DownloadBackend) - Platform download engine
//! - [`PlayerBackend`](player::PlayerBackend) - Long-lived platform player
//! - [`DrmProbe`](drm::DrmProbe) - DRM scheme, security level and secure decoder queries
//!
//! ### Host integration
//! - [`EventSink`](host::EventSink) - Delivers download and playback events to the host
//! - [`SurfaceHost`](host::SurfaceHost) - Presents the player surface
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with a descriptive `CapabilityMissing` error when a
//! required capability is not injected. Desktop builds get defaults from
//! `bridge-desktop`; mobile hosts inject their native adapters.
//!
//! ## Callbacks
//!
//! Platform engines report asynchronously. Instead of calling back into the
//! core, they push onto unbounded channels registered through
//! [`DownloadBackend::set_change_sender`](download::DownloadBackend::set_change_sender)
//! and [`PlayerBackend::set_signal_sender`](player::PlayerBackend::set_signal_sender),
//! so a platform thread never blocks on core locks.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent
//! usage across async tasks.

pub mod download;
pub mod drm;
pub mod error;
pub mod host;
#[cfg(feature = "test-support")]
pub mod mock;
pub mod player;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use download::{
    BackendChangeReceiver, BackendChangeSender, BackendDownloadStatus, BackendState,
    DownloadBackend, DownloadHandle, EnqueueRequest, STOP_REASON_NONE, STOP_REASON_REQUIREMENTS,
    STOP_REASON_USER,
};
pub use drm::{DrmProbe, DrmScheme, SecurityLevel};
pub use host::{EventChannel, EventSink, SurfaceHost};
pub use player::{
    MediaSource, PlaybackSessionId, PlayerBackend, PlayerErrorCode, PlayerSignal,
    PlayerSignalReceiver, PlayerSignalSender, SurfaceHandle,
};
pub use storage::{FileMetadata, FileSystemAccess, SecureStore, SettingsStore};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, SystemClock};
