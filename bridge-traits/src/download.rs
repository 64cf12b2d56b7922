//! Download backend bridge.
//!
//! The platform download engine (Media3 `DownloadManager`, AVAssetDownloadTask,
//! or the desktop HTTP backend) owns segment fetching. The core only enqueues,
//! toggles stop reasons, removes, and reads status back, either through the
//! change channel or by polling [`DownloadBackend::query_current`].

use async_trait::async_trait;
use core_async::sync::mpsc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::Result;
use crate::player::MediaSource;

/// Stop reason meaning "not stopped".
pub const STOP_REASON_NONE: u32 = 0;
/// Stop reason used when the user paused the download.
pub const STOP_REASON_USER: u32 = 1;
/// Stop reason reported when backend requirements (network, storage) are unmet.
pub const STOP_REASON_REQUIREMENTS: u32 = 2;

/// Download state as reported by the platform engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendState {
    Queued,
    Downloading,
    Stopped,
    Completed,
    Failed,
    Removing,
    Restarting,
}

impl BackendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendState::Queued => "queued",
            BackendState::Downloading => "downloading",
            BackendState::Stopped => "stopped",
            BackendState::Completed => "completed",
            BackendState::Failed => "failed",
            BackendState::Removing => "removing",
            BackendState::Restarting => "restarting",
        }
    }

    /// States the progress poller keeps ticking for.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            BackendState::Queued | BackendState::Downloading | BackendState::Restarting
        )
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a single backend download.
///
/// `bytes_total` is `0` while the engine does not know the content length yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDownloadStatus {
    pub content_id: String,
    pub state: BackendState,
    pub stop_reason: u32,
    pub bytes_downloaded: u64,
    pub bytes_total: u64,
    /// Failure detail; only carried by change callbacks.
    pub error: Option<String>,
}

impl BackendDownloadStatus {
    pub fn new(content_id: impl Into<String>, state: BackendState) -> Self {
        Self {
            content_id: content_id.into(),
            state,
            stop_reason: STOP_REASON_NONE,
            bytes_downloaded: 0,
            bytes_total: 0,
            error: None,
        }
    }

    pub fn with_bytes(mut self, downloaded: u64, total: u64) -> Self {
        self.bytes_downloaded = downloaded;
        self.bytes_total = total;
        self
    }

    pub fn with_stop_reason(mut self, reason: u32) -> Self {
        self.stop_reason = reason;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Request handed to [`DownloadBackend::enqueue`].
#[derive(Clone)]
pub struct EnqueueRequest {
    pub content_id: String,
    pub uri: String,
    /// Request headers derived from the caller's auth context. Never persisted.
    pub headers: HashMap<String, String>,
    /// Offline license handle attached to the request, if any.
    pub keyset_handle: Option<Vec<u8>>,
    /// Opaque application data stored alongside the backend entry.
    pub data: Option<Vec<u8>>,
}

impl fmt::Debug for EnqueueRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnqueueRequest")
            .field("content_id", &self.content_id)
            .field("uri", &self.uri)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("has_keyset_handle", &self.keyset_handle.is_some())
            .finish()
    }
}

/// Backend-assigned identifier for an enqueued download.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadHandle(pub String);

impl fmt::Display for DownloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sender side of the backend change channel.
///
/// Platform callbacks may arrive on any thread; pushing onto an unbounded
/// channel never blocks them.
pub type BackendChangeSender = mpsc::UnboundedSender<BackendDownloadStatus>;
pub type BackendChangeReceiver = mpsc::UnboundedReceiver<BackendDownloadStatus>;

/// Platform download engine.
#[async_trait]
pub trait DownloadBackend: Send + Sync {
    /// Bind the engine to the per-user media cache directory.
    ///
    /// Called once per user context before any other operation.
    async fn bind_cache(&self, user_id: &str, cache_dir: PathBuf) -> Result<()>;

    /// Enqueue a download. Returns [`BridgeError::Rejected`](crate::BridgeError::Rejected)
    /// when the engine refuses the request.
    async fn enqueue(&self, request: EnqueueRequest) -> Result<DownloadHandle>;

    /// Set the stop reason; [`STOP_REASON_NONE`] resumes.
    async fn set_stop_reason(&self, content_id: &str, reason: u32) -> Result<()>;

    /// Remove the download and its cached bytes.
    async fn remove_download(&self, content_id: &str) -> Result<()>;

    /// Enumerate every download the engine currently tracks.
    async fn query_current(&self) -> Result<Vec<BackendDownloadStatus>>;

    /// Build a playback source that reads only from the local cache.
    async fn build_local_source(&self, content_id: &str) -> Result<Option<MediaSource>>;

    /// Register the channel change callbacks are pushed into.
    fn set_change_sender(&self, sender: BackendChangeSender);
}
