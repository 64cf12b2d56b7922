//! Download backend over plain HTTP(S)
//!
//! Each enqueued item is fetched into a single file under the bound cache
//! directory. Interrupted transfers resume with a `Range` request, and the
//! item index is persisted so a restarted process sees the same downloads.
//!
//! Request headers and keyset handles stay in memory. After a restart the
//! core re-attaches licenses from its own store, but an unfinished item that
//! was enqueued with headers is reported `Failed` and must be enqueued again.

use async_trait::async_trait;
use bridge_traits::{
    download::{
        BackendChangeSender, BackendDownloadStatus, BackendState, DownloadBackend,
        DownloadHandle, EnqueueRequest, STOP_REASON_NONE,
    },
    error::{BridgeError, Result},
    player::MediaSource,
};
use core_async::sync::{CancellationToken, Semaphore};
use core_async::task::JoinHandle;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

const INDEX_FILE: &str = "downloads-index.json";
const NOTIFY_EVERY_BYTES: u64 = 256 * 1024;
const DEFAULT_MAX_PARALLEL: usize = 3;

/// Retry policy for a single transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for TransferRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl TransferRetryPolicy {
    /// Exponential backoff delay after `attempt` failed attempts (1-based).
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Error)]
enum TransferError {
    #[error("{0}")]
    Retryable(String),
    #[error("{0}")]
    Fatal(String),
}

enum FetchOutcome {
    Finished { total: u64 },
    Cancelled { written: u64 },
}

/// Persisted part of an item
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    content_id: String,
    uri: String,
    state: BackendState,
    stop_reason: u32,
    bytes_downloaded: u64,
    bytes_total: u64,
    file_name: String,
    /// Request headers are kept in memory only, so an unfinished item that
    /// needed them cannot continue after a restart.
    #[serde(default)]
    requires_headers: bool,
}

/// Reported for unfinished items whose request headers were lost with the
/// previous process.
const HEADERS_LOST_ERROR: &str = "request headers are not persisted; enqueue the download again";

struct Transfer {
    entry: IndexEntry,
    headers: HashMap<String, String>,
    keyset_handle: Option<Vec<u8>>,
    last_error: Option<String>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Transfer {
    fn status(&self) -> BackendDownloadStatus {
        BackendDownloadStatus {
            content_id: self.entry.content_id.clone(),
            state: self.entry.state,
            stop_reason: self.entry.stop_reason,
            bytes_downloaded: self.entry.bytes_downloaded,
            bytes_total: self.entry.bytes_total,
            error: self.last_error.clone(),
        }
    }
}

fn file_name_for(content_id: &str) -> String {
    let digest = Sha256::digest(content_id.as_bytes());
    format!("{}.media", hex::encode(digest))
}

struct Shared {
    client: Client,
    retry: TransferRetryPolicy,
    permits: Arc<Semaphore>,
    cache_dir: Mutex<Option<PathBuf>>,
    transfers: Mutex<HashMap<String, Transfer>>,
    sender: Mutex<Option<BackendChangeSender>>,
}

impl Shared {
    fn notify(&self, status: BackendDownloadStatus) {
        if let Some(sender) = self.sender.lock().as_ref() {
            // Receiver gone means the core shut down
            let _ = sender.send(status);
        }
    }

    /// Apply `f` to a tracked item and return its new status.
    fn update<F>(&self, content_id: &str, f: F) -> Option<BackendDownloadStatus>
    where
        F: FnOnce(&mut Transfer),
    {
        let mut transfers = self.transfers.lock();
        let transfer = transfers.get_mut(content_id)?;
        f(transfer);
        Some(transfer.status())
    }

    fn update_and_notify<F>(&self, content_id: &str, f: F)
    where
        F: FnOnce(&mut Transfer),
    {
        if let Some(status) = self.update(content_id, f) {
            self.notify(status);
        }
    }

    fn cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir.lock().clone()
    }

    async fn persist_index(&self) {
        let Some(dir) = self.cache_dir() else {
            return;
        };
        let entries: Vec<IndexEntry> = self
            .transfers
            .lock()
            .values()
            .map(|t| t.entry.clone())
            .collect();

        let payload = match serde_json::to_vec_pretty(&entries) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode download index");
                return;
            }
        };

        let tmp = dir.join(format!("{}.tmp", INDEX_FILE));
        let result = async {
            tokio::fs::write(&tmp, payload).await?;
            tokio::fs::rename(&tmp, dir.join(INDEX_FILE)).await
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist download index");
        }
    }
}

/// Reqwest-based [`DownloadBackend`]
///
/// - Bounded parallelism through a semaphore
/// - Automatic retry with exponential backoff on network and 5xx/429 errors
/// - `Range` resume of partially written files
pub struct HttpDownloadBackend {
    shared: Arc<Shared>,
}

impl HttpDownloadBackend {
    pub fn new() -> Result<Self> {
        Self::with_options(DEFAULT_MAX_PARALLEL, TransferRetryPolicy::default())
    }

    pub fn with_options(max_parallel: usize, retry: TransferRetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(max_parallel.max(1))
            .user_agent(concat!("offline-media-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, max_parallel, retry))
    }

    pub fn with_client(client: Client, max_parallel: usize, retry: TransferRetryPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                client,
                retry,
                permits: Arc::new(Semaphore::new(max_parallel.max(1))),
                cache_dir: Mutex::new(None),
                transfers: Mutex::new(HashMap::new()),
                sender: Mutex::new(None),
            }),
        }
    }

    fn spawn_transfer(&self, content_id: &str) {
        let shared = Arc::clone(&self.shared);
        let id = content_id.to_string();
        let task = core_async::spawn(run_transfer(Arc::clone(&shared), id));
        let mut transfers = self.shared.transfers.lock();
        match transfers.get_mut(content_id) {
            Some(transfer) => transfer.task = Some(task),
            None => task.abort(),
        }
    }

    /// Cancel the running transfer of `content_id` and wait until it has
    /// released the file.
    async fn halt_transfer(&self, content_id: &str) {
        let task = {
            let mut transfers = self.shared.transfers.lock();
            let Some(transfer) = transfers.get_mut(content_id) else {
                return;
            };
            transfer.cancel.cancel();
            transfer.task.take()
        };
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    async fn load_index(dir: &Path) -> Vec<IndexEntry> {
        let raw = match tokio::fs::read(dir.join(INDEX_FILE)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read download index");
                return Vec::new();
            }
        };
        serde_json::from_slice(&raw).unwrap_or_else(|e| {
            warn!(error = %e, "Discarding unreadable download index");
            Vec::new()
        })
    }
}

#[async_trait]
impl DownloadBackend for HttpDownloadBackend {
    #[instrument(skip(self, cache_dir))]
    async fn bind_cache(&self, user_id: &str, cache_dir: PathBuf) -> Result<()> {
        tokio::fs::create_dir_all(&cache_dir)
            .await
            .map_err(BridgeError::Io)?;

        if self.shared.cache_dir().as_deref() == Some(cache_dir.as_path()) {
            return Ok(());
        }

        // Switching users stops everything bound to the previous cache
        let previous: Vec<String> = self.shared.transfers.lock().keys().cloned().collect();
        for content_id in previous {
            self.halt_transfer(&content_id).await;
        }
        self.shared.transfers.lock().clear();
        *self.shared.cache_dir.lock() = Some(cache_dir.clone());

        let mut restart = Vec::new();
        for mut entry in Self::load_index(&cache_dir).await {
            let file_present = tokio::fs::try_exists(cache_dir.join(&entry.file_name))
                .await
                .unwrap_or(false);
            if entry.state == BackendState::Completed && !file_present {
                warn!(content_id = %entry.content_id, "Completed download lost its media file");
                continue;
            }
            let unfinished = entry.state.is_active() || entry.state == BackendState::Stopped;
            let mut last_error = None;
            if unfinished && entry.requires_headers {
                warn!(
                    content_id = %entry.content_id,
                    "Cannot resume download without its request headers"
                );
                entry.state = BackendState::Failed;
                last_error = Some(HEADERS_LOST_ERROR.to_string());
            } else if entry.state.is_active() {
                entry.state = BackendState::Restarting;
                restart.push(entry.content_id.clone());
            }
            let content_id = entry.content_id.clone();
            self.shared.transfers.lock().insert(
                content_id,
                Transfer {
                    entry,
                    headers: HashMap::new(),
                    keyset_handle: None,
                    last_error,
                    cancel: CancellationToken::new(),
                    task: None,
                },
            );
        }

        info!(
            tracked = self.shared.transfers.lock().len(),
            restarting = restart.len(),
            "Bound download cache"
        );
        for content_id in restart {
            self.spawn_transfer(&content_id);
        }
        Ok(())
    }

    #[instrument(skip(self, request), fields(content_id = %request.content_id))]
    async fn enqueue(&self, request: EnqueueRequest) -> Result<DownloadHandle> {
        if self.shared.cache_dir().is_none() {
            return Err(BridgeError::NotAvailable(
                "Download cache is not bound; call bind_cache first".to_string(),
            ));
        }

        let parsed = reqwest::Url::parse(&request.uri)
            .map_err(|e| BridgeError::Rejected(format!("Invalid URI {}: {}", request.uri, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BridgeError::Rejected(format!(
                "Unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        // Re-enqueueing replaces the previous request
        self.halt_transfer(&request.content_id).await;

        let file_name = file_name_for(&request.content_id);
        if let Some(dir) = self.shared.cache_dir() {
            let _ = tokio::fs::remove_file(dir.join(&file_name)).await;
        }

        let content_id = request.content_id.clone();
        let transfer = Transfer {
            entry: IndexEntry {
                content_id: content_id.clone(),
                uri: request.uri,
                state: BackendState::Queued,
                stop_reason: STOP_REASON_NONE,
                bytes_downloaded: 0,
                bytes_total: 0,
                file_name,
                requires_headers: !request.headers.is_empty(),
            },
            headers: request.headers,
            keyset_handle: request.keyset_handle,
            last_error: None,
            cancel: CancellationToken::new(),
            task: None,
        };
        let status = transfer.status();
        self.shared
            .transfers
            .lock()
            .insert(content_id.clone(), transfer);
        self.shared.persist_index().await;
        self.shared.notify(status);

        self.spawn_transfer(&content_id);
        debug!("Enqueued download");
        Ok(DownloadHandle(content_id))
    }

    #[instrument(skip(self))]
    async fn set_stop_reason(&self, content_id: &str, reason: u32) -> Result<()> {
        let current = self
            .shared
            .transfers
            .lock()
            .get(content_id)
            .map(|t| t.entry.state)
            .ok_or_else(|| BridgeError::NotFound(content_id.to_string()))?;

        if matches!(current, BackendState::Completed | BackendState::Removing) {
            return Ok(());
        }

        if reason == STOP_REASON_NONE {
            if current != BackendState::Stopped {
                return Ok(());
            }
            self.shared.update_and_notify(content_id, |t| {
                t.entry.stop_reason = STOP_REASON_NONE;
                t.entry.state = BackendState::Queued;
                t.last_error = None;
                t.cancel = CancellationToken::new();
            });
            self.shared.persist_index().await;
            self.spawn_transfer(content_id);
        } else {
            self.halt_transfer(content_id).await;
            self.shared.update_and_notify(content_id, |t| {
                t.entry.stop_reason = reason;
                t.entry.state = BackendState::Stopped;
            });
            self.shared.persist_index().await;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_download(&self, content_id: &str) -> Result<()> {
        self.halt_transfer(content_id).await;
        self.shared.update_and_notify(content_id, |t| {
            t.entry.state = BackendState::Removing;
        });

        let removed = self.shared.transfers.lock().remove(content_id);
        let Some(removed) = removed else {
            return Ok(());
        };

        if let Some(dir) = self.shared.cache_dir() {
            match tokio::fs::remove_file(dir.join(&removed.entry.file_name)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(error = %e, "Failed to delete media file"),
            }
        }
        self.shared.persist_index().await;
        debug!("Removed download");
        Ok(())
    }

    async fn query_current(&self) -> Result<Vec<BackendDownloadStatus>> {
        Ok(self
            .shared
            .transfers
            .lock()
            .values()
            .map(Transfer::status)
            .collect())
    }

    async fn build_local_source(&self, content_id: &str) -> Result<Option<MediaSource>> {
        let Some(dir) = self.shared.cache_dir() else {
            return Ok(None);
        };
        let transfers = self.shared.transfers.lock();
        let Some(transfer) = transfers.get(content_id) else {
            return Ok(None);
        };
        if transfer.entry.state != BackendState::Completed {
            return Ok(None);
        }

        let mut source = MediaSource::local(content_id, transfer.entry.uri.clone(), dir);
        if let Some(handle) = &transfer.keyset_handle {
            source = source.with_keyset_handle(handle.clone());
        }
        Ok(Some(source))
    }

    fn set_change_sender(&self, sender: BackendChangeSender) {
        *self.shared.sender.lock() = Some(sender);
    }
}

async fn run_transfer(shared: Arc<Shared>, content_id: String) {
    let prepared = {
        let transfers = shared.transfers.lock();
        transfers.get(&content_id).map(|t| {
            (
                t.cancel.clone(),
                t.entry.uri.clone(),
                t.headers.clone(),
                t.entry.file_name.clone(),
            )
        })
    };
    let (Some((cancel, uri, headers, file_name)), Some(dir)) = (prepared, shared.cache_dir())
    else {
        return;
    };
    let path = dir.join(file_name);

    let permits = Arc::clone(&shared.permits);
    let _permit = tokio::select! {
        _ = cancel.cancelled() => return,
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        debug!(content_id = %content_id, attempt, "Starting transfer attempt");

        match fetch_once(&shared, &content_id, &uri, &headers, &path, &cancel).await {
            Ok(FetchOutcome::Finished { total }) => {
                shared.update_and_notify(&content_id, |t| {
                    t.entry.state = BackendState::Completed;
                    t.entry.bytes_downloaded = total;
                    t.entry.bytes_total = total;
                    t.last_error = None;
                });
                shared.persist_index().await;
                info!(content_id = %content_id, bytes = total, "Download completed");
                return;
            }
            Ok(FetchOutcome::Cancelled { written }) => {
                shared.update(&content_id, |t| t.entry.bytes_downloaded = written);
                return;
            }
            Err(TransferError::Retryable(message)) if attempt < shared.retry.max_attempts => {
                let delay = shared.retry.delay_for(attempt);
                warn!(
                    content_id = %content_id,
                    attempt,
                    error = %message,
                    delay_ms = delay.as_millis() as u64,
                    "Transfer failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = core_async::sleep(delay) => {}
                }
            }
            Err(error) => {
                warn!(content_id = %content_id, error = %error, "Download failed");
                shared.update_and_notify(&content_id, |t| {
                    t.entry.state = BackendState::Failed;
                    t.last_error = Some(error.to_string());
                });
                shared.persist_index().await;
                return;
            }
        }
    }
}

async fn fetch_once(
    shared: &Shared,
    content_id: &str,
    uri: &str,
    headers: &HashMap<String, String>,
    path: &Path,
    cancel: &CancellationToken,
) -> std::result::Result<FetchOutcome, TransferError> {
    let offset = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);

    let mut request = shared.client.get(uri);
    for (key, value) in headers {
        request = request.header(key.as_str(), value.as_str());
    }
    if offset > 0 {
        request = request.header(header::RANGE, format!("bytes={}-", offset));
    }

    let response = tokio::select! {
        _ = cancel.cancelled() => return Ok(FetchOutcome::Cancelled { written: offset }),
        response = request.send() => response.map_err(|e| {
            if e.is_timeout() {
                TransferError::Retryable("Request timed out".to_string())
            } else if e.is_connect() {
                TransferError::Retryable(format!("Connection failed: {}", e))
            } else {
                TransferError::Retryable(e.to_string())
            }
        })?,
    };

    let status = response.status();
    if status == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
        // The file already holds the whole resource
        return Ok(FetchOutcome::Finished { total: offset });
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(TransferError::Retryable(format!("HTTP {} error", status.as_u16())));
    }
    if !status.is_success() {
        return Err(TransferError::Fatal(format!("HTTP {} error", status.as_u16())));
    }

    let append = status == StatusCode::PARTIAL_CONTENT;
    let mut written = if append { offset } else { 0 };
    let total = response.content_length().map(|len| len + written).unwrap_or(0);

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .await
        .map_err(|e| TransferError::Fatal(format!("Failed to open media file: {}", e)))?;

    shared.update_and_notify(content_id, |t| {
        t.entry.state = BackendState::Downloading;
        t.entry.bytes_downloaded = written;
        if total > 0 {
            t.entry.bytes_total = total;
        }
    });

    let mut stream = response.bytes_stream();
    let mut last_notified = written;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = file.flush().await;
                return Ok(FetchOutcome::Cancelled { written });
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| TransferError::Fatal(format!("Failed to write media file: {}", e)))?;
                written += chunk.len() as u64;
                if written - last_notified >= NOTIFY_EVERY_BYTES {
                    last_notified = written;
                    shared.update_and_notify(content_id, |t| t.entry.bytes_downloaded = written);
                }
            }
            Some(Err(e)) => {
                let _ = file.flush().await;
                return Err(TransferError::Retryable(format!("Stream interrupted: {}", e)));
            }
            None => break,
        }
    }

    file.flush()
        .await
        .map_err(|e| TransferError::Fatal(format!("Failed to flush media file: {}", e)))?;
    Ok(FetchOutcome::Finished { total: written })
}
