//! # Download Domain Types
//!
//! Records, states and requests shared by the stores, the orchestrator and
//! the progress reporter.
//!
//! ## State Machine
//!
//! ```text
//! Queued → Downloading ⇄ Stopped
//!    ↓          ↓    ↖      ↓
//!    │          │  Restarting
//!    ↓          ↓
//! Failed    Completed        (absorbing)
//!
//! any → Removing → deleted
//! ```

use bridge_traits::download::{
    BackendDownloadStatus, BackendState, STOP_REASON_REQUIREMENTS, STOP_REASON_USER,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Metadata keys merged into every record's `extra_metadata`.
pub const META_SOURCE_URI: &str = "sourceUri";
pub const META_TITLE: &str = "title";
pub const META_QUALITY: &str = "quality";

// ============================================================================
// ID Types
// ============================================================================

/// Opaque content identifier, unique across all stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ContentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// State Types
// ============================================================================

/// Why a download is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// Paused by the user.
    User,
    /// Backend constraints (network type, storage) are not met.
    Requirements,
    /// Any other backend-specific reason code.
    Other(u32),
}

impl StopReason {
    pub fn from_code(code: u32) -> Self {
        match code {
            STOP_REASON_USER => StopReason::User,
            STOP_REASON_REQUIREMENTS => StopReason::Requirements,
            other => StopReason::Other(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            StopReason::User => STOP_REASON_USER,
            StopReason::Requirements => STOP_REASON_REQUIREMENTS,
            StopReason::Other(code) => *code,
        }
    }
}

/// Lifecycle state of a tracked download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DownloadState {
    None,
    Queued,
    Downloading,
    Stopped { reason: StopReason },
    Completed,
    Failed,
    Removing,
    Restarting,
}

impl DownloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadState::None => "none",
            DownloadState::Queued => "queued",
            DownloadState::Downloading => "downloading",
            DownloadState::Stopped { .. } => "stopped",
            DownloadState::Completed => "completed",
            DownloadState::Failed => "failed",
            DownloadState::Removing => "removing",
            DownloadState::Restarting => "restarting",
        }
    }

    /// States the progress reporter keeps polling for.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DownloadState::Queued | DownloadState::Downloading | DownloadState::Restarting
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadState::Completed | DownloadState::Failed)
    }

    /// States no backend transition may leave.
    pub fn is_absorbing(&self) -> bool {
        self.is_terminal()
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, DownloadState::Stopped { .. })
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadState::Stopped { reason } => write!(f, "stopped({})", reason.code()),
            other => f.write_str(other.as_str()),
        }
    }
}

impl From<&BackendDownloadStatus> for DownloadState {
    fn from(status: &BackendDownloadStatus) -> Self {
        match status.state {
            BackendState::Queued => DownloadState::Queued,
            BackendState::Downloading => DownloadState::Downloading,
            BackendState::Stopped => DownloadState::Stopped {
                reason: StopReason::from_code(status.stop_reason),
            },
            BackendState::Completed => DownloadState::Completed,
            BackendState::Failed => DownloadState::Failed,
            BackendState::Removing => DownloadState::Removing,
            BackendState::Restarting => DownloadState::Restarting,
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Persisted state of one offline download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    pub content_id: ContentId,
    pub source_uri: String,
    pub title: String,
    pub quality: String,
    pub state: DownloadState,
    pub bytes_downloaded: u64,
    /// `0` while the backend does not know the content length.
    pub bytes_total: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub extra_metadata: BTreeMap<String, String>,
}

impl DownloadRecord {
    /// Fresh `Queued` record for `request`, with the request metadata merged
    /// with the source URI, title and quality.
    pub fn queued(request: &DownloadRequest, now: DateTime<Utc>) -> Self {
        let mut extra_metadata = request.metadata.clone();
        extra_metadata.insert(META_SOURCE_URI.to_string(), request.source_uri.clone());
        extra_metadata.insert(META_TITLE.to_string(), request.title.clone());
        extra_metadata.insert(META_QUALITY.to_string(), request.quality.clone());

        Self {
            content_id: request.content_id.clone(),
            source_uri: request.source_uri.clone(),
            title: request.title.clone(),
            quality: request.quality.clone(),
            state: DownloadState::Queued,
            bytes_downloaded: 0,
            bytes_total: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            expiry_at: None,
            failure_reason: None,
            extra_metadata,
        }
    }

    /// Fraction downloaded in `[0.0, 1.0]`.
    pub fn progress(&self) -> f64 {
        if self.state == DownloadState::Completed {
            return 1.0;
        }
        if self.bytes_total == 0 {
            return 0.0;
        }
        (self.bytes_downloaded as f64 / self.bytes_total as f64).min(1.0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_at.is_some_and(|expiry| expiry < now)
    }
}

/// Offline license bookkeeping for one content item.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseRecord {
    pub content_id: ContentId,
    pub keyset_handle: Vec<u8>,
    pub acquired_at: DateTime<Utc>,
}

impl LicenseRecord {
    pub fn new(content_id: ContentId, keyset_handle: Vec<u8>, acquired_at: DateTime<Utc>) -> Self {
        Self {
            content_id,
            keyset_handle,
            acquired_at,
        }
    }
}

impl fmt::Debug for LicenseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LicenseRecord")
            .field("content_id", &self.content_id)
            .field("keyset_handle", &format!("<{} bytes>", self.keyset_handle.len()))
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

// ============================================================================
// Requests and transitions
// ============================================================================

/// Arguments of [`crate::DownloadOrchestrator::start_download`].
#[derive(Clone, Default)]
pub struct DownloadRequest {
    pub content_id: ContentId,
    pub source_uri: String,
    pub title: String,
    pub quality: String,
    /// Offline license handle acquired by the caller.
    pub license: Option<Vec<u8>>,
    /// Request headers forwarded to the backend. Never persisted.
    pub auth_context: Option<HashMap<String, String>>,
    pub metadata: BTreeMap<String, String>,
}

impl DownloadRequest {
    pub fn new(
        content_id: impl Into<ContentId>,
        source_uri: impl Into<String>,
        title: impl Into<String>,
        quality: impl Into<String>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            source_uri: source_uri.into(),
            title: title.into(),
            quality: quality.into(),
            ..Self::default()
        }
    }

    pub fn with_license(mut self, keyset_handle: Vec<u8>) -> Self {
        self.license = Some(keyset_handle);
        self
    }

    pub fn with_auth_context(mut self, headers: HashMap<String, String>) -> Self {
        self.auth_context = Some(headers);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Debug for DownloadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadRequest")
            .field("content_id", &self.content_id)
            .field("source_uri", &self.source_uri)
            .field("title", &self.title)
            .field("quality", &self.quality)
            .field("has_license", &self.license.is_some())
            .field(
                "auth_headers",
                &self
                    .auth_context
                    .as_ref()
                    .map(|h| h.keys().collect::<Vec<_>>()),
            )
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Where a backend transition was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSource {
    /// Backend change callback. Authoritative.
    Callback,
    /// Progress reporter poll. Advisory.
    Poll,
}

/// A state report for one download, as delivered by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendTransition {
    pub content_id: ContentId,
    pub state: DownloadState,
    pub bytes_downloaded: u64,
    pub bytes_total: u64,
    pub error: Option<String>,
}

impl BackendTransition {
    pub fn new(content_id: impl Into<ContentId>, state: DownloadState) -> Self {
        Self {
            content_id: content_id.into(),
            state,
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

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

impl From<BackendDownloadStatus> for BackendTransition {
    fn from(status: BackendDownloadStatus) -> Self {
        let state = DownloadState::from(&status);
        Self {
            content_id: ContentId::new(status.content_id),
            state,
            bytes_downloaded: status.bytes_downloaded,
            bytes_total: status.bytes_total,
            error: status.error,
        }
    }
}

/// Escapes `%` and `:` in a user id so it can sit between `:` separators in
/// a storage key. Ids without either character map to themselves.
pub(crate) fn user_key_component(user_id: &str) -> String {
    let mut out = String::with_capacity(user_id.len());
    for ch in user_id.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_key_component_escapes_separators() {
        assert_eq!(user_key_component("alice"), "alice");
        assert_eq!(user_key_component("a:b"), "a%3Ab");
        assert_eq!(user_key_component("a%3Ab"), "a%253Ab");
        assert_ne!(user_key_component("a:b"), user_key_component("a%3Ab"));
    }

    #[test]
    fn test_state_classification() {
        assert!(DownloadState::Queued.is_active());
        assert!(DownloadState::Restarting.is_active());
        assert!(!DownloadState::Stopped { reason: StopReason::User }.is_active());
        assert!(DownloadState::Completed.is_absorbing());
        assert!(DownloadState::Failed.is_terminal());
        assert!(!DownloadState::Removing.is_terminal());
    }

    #[test]
    fn test_stop_reason_codes() {
        assert_eq!(StopReason::from_code(1), StopReason::User);
        assert_eq!(StopReason::from_code(2), StopReason::Requirements);
        assert_eq!(StopReason::from_code(42), StopReason::Other(42));
        assert_eq!(StopReason::Other(42).code(), 42);
    }

    #[test]
    fn test_backend_status_mapping() {
        let status = BackendDownloadStatus::new("m1", BackendState::Stopped)
            .with_stop_reason(STOP_REASON_REQUIREMENTS)
            .with_bytes(10, 100);
        let transition = BackendTransition::from(status);
        assert_eq!(transition.content_id.as_str(), "m1");
        assert_eq!(
            transition.state,
            DownloadState::Stopped {
                reason: StopReason::Requirements
            }
        );
        assert_eq!(transition.bytes_downloaded, 10);
    }

    #[test]
    fn test_queued_record_merges_metadata() {
        let request = DownloadRequest::new("m1", "http://x/m.m3u8", "Title", "720p")
            .with_metadata("season", "2")
            .with_metadata(META_TITLE, "overridden");
        let record = DownloadRecord::queued(&request, Utc::now());

        assert_eq!(record.state, DownloadState::Queued);
        assert_eq!(record.extra_metadata["season"], "2");
        assert_eq!(record.extra_metadata[META_TITLE], "Title");
        assert_eq!(record.extra_metadata[META_SOURCE_URI], "http://x/m.m3u8");
        assert_eq!(record.extra_metadata[META_QUALITY], "720p");
    }

    #[test]
    fn test_progress() {
        let request = DownloadRequest::new("m1", "http://x/m.m3u8", "Title", "720p");
        let mut record = DownloadRecord::queued(&request, Utc::now());
        assert_eq!(record.progress(), 0.0);

        record.bytes_downloaded = 50;
        record.bytes_total = 100;
        assert_eq!(record.progress(), 0.5);

        record.state = DownloadState::Completed;
        assert_eq!(record.progress(), 1.0);
    }

    #[test]
    fn test_record_json_shape() {
        let request = DownloadRequest::new("m1", "http://x/m.m3u8", "Title", "720p");
        let mut record = DownloadRecord::queued(&request, Utc::now());
        record.state = DownloadState::Stopped {
            reason: StopReason::User,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["contentId"], "m1");
        assert_eq!(json["state"]["kind"], "stopped");
        assert_eq!(json["state"]["reason"], "user");
        assert!(json.get("expiryAt").is_none());

        let back: DownloadRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_license_debug_hides_handle() {
        let record = LicenseRecord::new("m1".into(), vec![1, 2, 3], Utc::now());
        let debug = format!("{:?}", record);
        assert!(debug.contains("<3 bytes>"));
        assert!(!debug.contains("[1, 2, 3]"));
    }
}
