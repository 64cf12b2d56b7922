//! In-memory bridge adapters.
//!
//! Available with the `test-support` feature. Every adapter records the calls
//! it receives so tests can assert on the exact backend interaction, and
//! exposes knobs to inject failures.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::download::{
    BackendChangeSender, BackendDownloadStatus, BackendState, DownloadBackend, DownloadHandle,
    EnqueueRequest, STOP_REASON_NONE,
};
use crate::drm::{DrmProbe, DrmScheme, SecurityLevel};
use crate::error::{BridgeError, Result};
use crate::host::{EventChannel, EventSink, SurfaceHost};
use crate::player::{MediaSource, PlayerBackend, PlayerSignal, PlayerSignalSender, SurfaceHandle};
use crate::storage::{FileMetadata, FileSystemAccess, SecureStore, SettingsStore};
use crate::time::Clock;

// ============================================================================
// Storage
// ============================================================================

#[derive(Default)]
pub struct InMemorySettingsStore {
    values: Mutex<BTreeMap<String, String>>,
    fail_writes: Mutex<bool>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        if *self.fail_writes.lock() {
            return Err(BridgeError::StorageError("settings store unavailable".into()));
        }
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.values.lock().keys().cloned().collect())
    }

    async fn clear_all(&self) -> Result<()> {
        self.values.lock().clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySecureStore {
    secrets: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.lock().is_empty()
    }
}

#[async_trait]
impl SecureStore for InMemorySecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.secrets.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.secrets.lock().get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        self.secrets.lock().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.secrets.lock().keys().cloned().collect())
    }

    async fn clear_all(&self) -> Result<()> {
        self.secrets.lock().clear();
        Ok(())
    }
}

/// Filesystem with a fixed cache root. Directory sizes are configured, not
/// measured.
pub struct InMemoryFileSystem {
    root: PathBuf,
    directories: Mutex<Vec<PathBuf>>,
    sizes: Mutex<HashMap<PathBuf, u64>>,
}

impl InMemoryFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            directories: Mutex::new(Vec::new()),
            sizes: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_directory_size(&self, path: impl Into<PathBuf>, size: u64) {
        self.sizes.lock().insert(path.into(), size);
    }

    pub fn created_directories(&self) -> Vec<PathBuf> {
        self.directories.lock().clone()
    }
}

#[async_trait]
impl FileSystemAccess for InMemoryFileSystem {
    async fn get_cache_directory(&self) -> Result<PathBuf> {
        Ok(self.root.join("cache"))
    }

    async fn get_data_directory(&self) -> Result<PathBuf> {
        Ok(self.root.join("data"))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.directories.lock().iter().any(|dir| dir == path))
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        if !self.exists(path).await? {
            return Err(BridgeError::NotFound(path.display().to_string()));
        }
        Ok(FileMetadata {
            size: 0,
            modified_at: None,
            is_directory: true,
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut directories = self.directories.lock();
        if !directories.iter().any(|dir| dir == path) {
            directories.push(path.to_path_buf());
        }
        Ok(())
    }

    async fn delete_file(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        self.directories.lock().retain(|dir| !dir.starts_with(path));
        self.sizes.lock().remove(path);
        Ok(())
    }

    async fn list_directory(&self, _path: &Path) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    async fn directory_size(&self, path: &Path) -> Result<u64> {
        self.sizes
            .lock()
            .get(path)
            .copied()
            .ok_or_else(|| BridgeError::NotFound(path.display().to_string()))
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ============================================================================
// Download backend
// ============================================================================

#[derive(Default)]
struct FakeDownloadState {
    statuses: BTreeMap<String, BackendDownloadStatus>,
    uris: HashMap<String, String>,
    local_sources: HashMap<String, Option<MediaSource>>,
    enqueued: Vec<EnqueueRequest>,
    stop_reasons: Vec<(String, u32)>,
    removed: Vec<String>,
    bound: Option<(String, PathBuf)>,
    reject_enqueue: bool,
    fail_query: bool,
    fail_remove: bool,
    query_count: usize,
}

/// Scriptable download engine.
///
/// Status changes are only reported when a test calls [`FakeDownloadBackend::emit`]
/// (callback delivery) or [`FakeDownloadBackend::set_status`] (visible to polls
/// only).
#[derive(Default)]
pub struct FakeDownloadBackend {
    state: Mutex<FakeDownloadState>,
    sender: Mutex<Option<BackendChangeSender>>,
}

impl FakeDownloadBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reject_enqueue(&self, reject: bool) {
        self.state.lock().reject_enqueue = reject;
    }

    pub fn set_fail_query(&self, fail: bool) {
        self.state.lock().fail_query = fail;
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.state.lock().fail_remove = fail;
    }

    /// Update what `query_current` reports without firing a callback.
    pub fn set_status(&self, status: BackendDownloadStatus) {
        self.state
            .lock()
            .statuses
            .insert(status.content_id.clone(), status);
    }

    /// Forget a download without a callback, as after a backend data wipe.
    pub fn forget(&self, content_id: &str) {
        self.state.lock().statuses.remove(content_id);
    }

    /// Update the status and push it through the change channel.
    ///
    /// Returns `false` when no sender is registered or the receiver is gone.
    pub fn emit(&self, status: BackendDownloadStatus) -> bool {
        self.set_status(status.clone());
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(status).is_ok(),
            None => false,
        }
    }

    /// Override what `build_local_source` returns for `content_id`.
    pub fn set_local_source(&self, content_id: &str, source: Option<MediaSource>) {
        self.state
            .lock()
            .local_sources
            .insert(content_id.to_string(), source);
    }

    pub fn enqueued(&self) -> Vec<EnqueueRequest> {
        self.state.lock().enqueued.clone()
    }

    pub fn stop_reasons(&self) -> Vec<(String, u32)> {
        self.state.lock().stop_reasons.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    pub fn bound_cache(&self) -> Option<(String, PathBuf)> {
        self.state.lock().bound.clone()
    }

    pub fn query_count(&self) -> usize {
        self.state.lock().query_count
    }

    pub fn has_sender(&self) -> bool {
        self.sender.lock().is_some()
    }
}

#[async_trait]
impl DownloadBackend for FakeDownloadBackend {
    async fn bind_cache(&self, user_id: &str, cache_dir: PathBuf) -> Result<()> {
        self.state.lock().bound = Some((user_id.to_string(), cache_dir));
        Ok(())
    }

    async fn enqueue(&self, request: EnqueueRequest) -> Result<DownloadHandle> {
        let mut state = self.state.lock();
        if state.reject_enqueue {
            return Err(BridgeError::Rejected(format!(
                "enqueue refused for {}",
                request.content_id
            )));
        }
        state.statuses.insert(
            request.content_id.clone(),
            BackendDownloadStatus::new(request.content_id.clone(), BackendState::Queued),
        );
        state
            .uris
            .insert(request.content_id.clone(), request.uri.clone());
        let handle = DownloadHandle(format!("fake-{}", request.content_id));
        state.enqueued.push(request);
        Ok(handle)
    }

    async fn set_stop_reason(&self, content_id: &str, reason: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.stop_reasons.push((content_id.to_string(), reason));
        let status = state
            .statuses
            .get_mut(content_id)
            .ok_or_else(|| BridgeError::NotFound(content_id.to_string()))?;
        status.stop_reason = reason;
        status.state = if reason == STOP_REASON_NONE {
            BackendState::Downloading
        } else {
            BackendState::Stopped
        };
        Ok(())
    }

    async fn remove_download(&self, content_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.removed.push(content_id.to_string());
        if state.fail_remove {
            return Err(BridgeError::OperationFailed("remove failed".into()));
        }
        state.statuses.remove(content_id);
        Ok(())
    }

    async fn query_current(&self) -> Result<Vec<BackendDownloadStatus>> {
        let mut state = self.state.lock();
        state.query_count += 1;
        if state.fail_query {
            return Err(BridgeError::OperationFailed("download index unavailable".into()));
        }
        Ok(state.statuses.values().cloned().collect())
    }

    async fn build_local_source(&self, content_id: &str) -> Result<Option<MediaSource>> {
        let state = self.state.lock();
        if let Some(source) = state.local_sources.get(content_id) {
            return Ok(source.clone());
        }
        let cache_dir = state
            .bound
            .as_ref()
            .map(|(_, dir)| dir.clone())
            .unwrap_or_default();
        Ok(state
            .uris
            .get(content_id)
            .map(|uri| MediaSource::local(content_id, uri.clone(), cache_dir)))
    }

    fn set_change_sender(&self, sender: BackendChangeSender) {
        *self.sender.lock() = Some(sender);
    }
}

// ============================================================================
// Player backend
// ============================================================================

/// A call received by [`FakePlayerBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCall {
    SetSource(String),
    Prepare,
    Seek(Duration),
    Play,
    Pause,
    Stop,
    ClearSource,
    Release,
    MarkSurfaceSecure(SurfaceHandle),
}

#[derive(Default)]
pub struct FakePlayerBackend {
    calls: Mutex<Vec<PlayerCall>>,
    position: Mutex<Duration>,
    duration: Mutex<Option<Duration>>,
    sender: Mutex<Option<PlayerSignalSender>>,
}

impl FakePlayerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PlayerCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn count(&self, call: &PlayerCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn set_position(&self, position: Duration) {
        *self.position.lock() = position;
    }

    pub fn set_duration(&self, duration: Option<Duration>) {
        *self.duration.lock() = duration;
    }

    /// Push a player callback through the signal channel.
    pub fn signal(&self, signal: PlayerSignal) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(signal).is_ok(),
            None => false,
        }
    }

    fn record(&self, call: PlayerCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl PlayerBackend for FakePlayerBackend {
    async fn set_source(&self, source: MediaSource) -> Result<()> {
        self.record(PlayerCall::SetSource(source.content_id));
        Ok(())
    }

    async fn prepare(&self) -> Result<()> {
        self.record(PlayerCall::Prepare);
        Ok(())
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        *self.position.lock() = position;
        self.record(PlayerCall::Seek(position));
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        self.record(PlayerCall::Play);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.record(PlayerCall::Pause);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record(PlayerCall::Stop);
        Ok(())
    }

    async fn clear_source(&self) -> Result<()> {
        self.record(PlayerCall::ClearSource);
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.record(PlayerCall::Release);
        Ok(())
    }

    async fn position(&self) -> Result<Duration> {
        Ok(*self.position.lock())
    }

    async fn duration(&self) -> Result<Option<Duration>> {
        Ok(*self.duration.lock())
    }

    async fn mark_surface_secure(&self, surface: SurfaceHandle) -> Result<()> {
        self.record(PlayerCall::MarkSurfaceSecure(surface));
        Ok(())
    }

    fn set_signal_sender(&self, sender: PlayerSignalSender) {
        *self.sender.lock() = Some(sender);
    }
}

// ============================================================================
// DRM probe and host hooks
// ============================================================================

/// Probe returning fixed answers.
#[derive(Debug, Clone)]
pub struct StaticDrmProbe {
    pub supported: bool,
    pub level: SecurityLevel,
    pub decoders: HashMap<String, Vec<String>>,
}

impl StaticDrmProbe {
    /// Hardware-backed device with a secure AVC decoder.
    pub fn hardware_secure() -> Self {
        let mut decoders = HashMap::new();
        decoders.insert(
            "video/avc".to_string(),
            vec!["c2.vendor.avc.decoder.secure".to_string()],
        );
        Self {
            supported: true,
            level: SecurityLevel::L1,
            decoders,
        }
    }

    pub fn software_only() -> Self {
        Self {
            supported: true,
            level: SecurityLevel::L3,
            decoders: HashMap::new(),
        }
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            level: SecurityLevel::Unknown,
            decoders: HashMap::new(),
        }
    }
}

#[async_trait]
impl DrmProbe for StaticDrmProbe {
    async fn is_scheme_supported(&self, _scheme: DrmScheme) -> Result<bool> {
        Ok(self.supported)
    }

    async fn security_level(&self, _scheme: DrmScheme) -> Result<SecurityLevel> {
        Ok(self.level)
    }

    async fn secure_decoders(&self, mime_type: &str) -> Result<Vec<String>> {
        Ok(self.decoders.get(mime_type).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct RecordingEventSink {
    delivered: Mutex<Vec<(EventChannel, serde_json::Value)>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<(EventChannel, serde_json::Value)> {
        self.delivered.lock().clone()
    }

    /// Payloads delivered on `channel`, in order.
    pub fn payloads(&self, channel: EventChannel) -> Vec<serde_json::Value> {
        self.delivered
            .lock()
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn deliver(&self, channel: EventChannel, payload: serde_json::Value) -> Result<()> {
        self.delivered.lock().push((channel, payload));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSurfaceHost {
    presented: Mutex<Vec<String>>,
    dismissed: Mutex<usize>,
}

impl RecordingSurfaceHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> Vec<String> {
        self.presented.lock().clone()
    }

    pub fn dismiss_count(&self) -> usize {
        *self.dismissed.lock()
    }
}

#[async_trait]
impl SurfaceHost for RecordingSurfaceHost {
    async fn present_player(&self, content_id: &str) -> Result<()> {
        self.presented.lock().push(content_id.to_string());
        Ok(())
    }

    async fn dismiss_player(&self) -> Result<()> {
        *self.dismissed.lock() += 1;
        Ok(())
    }
}
