//! # Download Orchestrator
//!
//! Owns the state machine of every tracked download for one user, drives the
//! platform [`DownloadBackend`] and persists each transition to the
//! [`MetadataStore`].
//!
//! ## Mutation model
//!
//! All record changes go through one async mutex over the record map. Backend
//! change callbacks are pushed onto an unbounded channel and drained by a
//! single pump task; the [`ProgressReporter`] feeds the same
//! [`DownloadOrchestrator::apply_backend_transition`] entry point with
//! advisory poll snapshots.
//!
//! ## Transition rules
//!
//! - Reports for untracked ids are ignored
//! - `Completed` and `Failed` are never left
//! - Within one state `bytes_downloaded` never decreases, and an identical
//!   report is a no-op
//! - An unknown total (`0`) keeps the last known total

use crate::error::{DownloadError, Result};
use crate::license_store::LicenseStore;
use crate::metadata_store::MetadataStore;
use crate::models::{
    BackendTransition, ContentId, DownloadRecord, DownloadRequest, DownloadState,
    LicenseRecord, StopReason, TransitionSource,
};
use crate::progress::ProgressReporter;
use bridge_traits::{
    download::{
        BackendChangeReceiver, BackendDownloadStatus, DownloadBackend, EnqueueRequest,
        STOP_REASON_NONE, STOP_REASON_USER,
    },
    player::MediaSource,
    time::Clock,
};
use chrono::{DateTime, Utc};
use core_async::sync::{mpsc, CancellationToken, Mutex};
use core_runtime::config::DownloadPolicy;
use core_runtime::events::{CoreEvent, DownloadEvent, DownloadEventKind, EventBus};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};

/// Failure reason for a record the backend forgot while the app was down.
pub const UNTRACKED_BY_BACKEND: &str = "download no longer tracked by backend";

const DEFAULT_FAILURE_REASON: &str = "download failed";

enum Applied {
    Ignored,
    Changed(Option<DownloadEventKind>),
}

pub struct DownloadOrchestrator {
    user_id: String,
    backend: Arc<dyn DownloadBackend>,
    metadata: MetadataStore,
    licenses: LicenseStore,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    policy: DownloadPolicy,
    records: Mutex<HashMap<ContentId, DownloadRecord>>,
    reporter: ProgressReporter,
    shutdown: CancellationToken,
    weak_self: Weak<DownloadOrchestrator>,
}

impl DownloadOrchestrator {
    /// Create the orchestrator and start draining backend change callbacks.
    ///
    /// Must be called inside a Tokio runtime. The backend's change sender is
    /// replaced, so one backend serves one orchestrator at a time.
    pub fn new(
        backend: Arc<dyn DownloadBackend>,
        metadata: MetadataStore,
        licenses: LicenseStore,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        policy: DownloadPolicy,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        backend.set_change_sender(sender);

        let orchestrator = Arc::new_cyclic(|weak_self| Self {
            user_id: metadata.user_id().to_string(),
            reporter: ProgressReporter::new(Arc::clone(&backend), policy.clone()),
            backend,
            metadata,
            licenses,
            clock,
            event_bus,
            policy,
            records: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            weak_self: weak_self.clone(),
        });

        core_async::spawn(run_change_pump(
            Arc::downgrade(&orchestrator),
            receiver,
            orchestrator.shutdown.clone(),
        ));
        orchestrator
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn progress_reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Validate, persist and enqueue a download.
    ///
    /// Validation failures and backend rejections return `Err` and emit a
    /// `failed` event. A rejected enqueue leaves the record at `Failed`.
    #[instrument(skip(self, request), fields(content_id = %request.content_id))]
    pub async fn start_download(&self, request: DownloadRequest) -> Result<()> {
        if request.content_id.is_blank() {
            return Err(self.reject(&request.content_id, "contentId is required"));
        }
        if request.source_uri.trim().is_empty() {
            return Err(self.reject(&request.content_id, "sourceUri is required"));
        }

        let now = self.clock.now();
        let content_id = request.content_id.clone();
        let mut record = DownloadRecord::queued(&request, now);

        let mut records = self.records.lock().await;
        self.emit(&record, DownloadEventKind::Preparing);

        if let Some(handle) = &request.license {
            let license = LicenseRecord::new(content_id.clone(), handle.clone(), now);
            if let Err(e) = self.licenses.store(&license).await {
                self.emit_failure(&content_id, &e.to_string());
                return Err(e);
            }
        }
        if let Err(e) = self.metadata.save(&record).await {
            self.emit_failure(&content_id, &e.to_string());
            return Err(e);
        }
        records.insert(content_id.clone(), record.clone());

        let enqueue = EnqueueRequest {
            content_id: content_id.to_string(),
            uri: request.source_uri.clone(),
            headers: request.auth_context.clone().unwrap_or_default(),
            keyset_handle: request.license.clone(),
            data: Some(request.title.clone().into_bytes()),
        };

        match self.backend.enqueue(enqueue).await {
            Ok(handle) => debug!(handle = %handle, "Backend accepted download"),
            Err(e) => {
                let reason = e.to_string();
                warn!(error = %reason, "Backend rejected download");
                record.state = DownloadState::Failed;
                record.failure_reason = Some(reason.clone());
                record.updated_at = self.clock.now();
                self.persist(&record).await;
                self.emit(&record, DownloadEventKind::Failed);
                records.insert(content_id.clone(), record);
                return Err(DownloadError::BackendRejected {
                    content_id: content_id.to_string(),
                    reason,
                });
            }
        }
        drop(records);

        self.emit(&record, DownloadEventKind::Queued);
        self.reporter
            .ensure_running(self.weak_self.clone(), self.policy.first_poll_delay())
            .await;
        info!(quality = %request.quality, "Download queued");
        Ok(())
    }

    /// Stop a download at the user's request.
    ///
    /// Returns `false` for unknown or finished downloads.
    #[instrument(skip(self))]
    pub async fn pause(&self, content_id: &str) -> Result<bool> {
        let id = ContentId::from(content_id);
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.state.is_terminal() || record.state == DownloadState::Removing {
            return Ok(false);
        }

        let paused = DownloadState::Stopped {
            reason: StopReason::User,
        };
        if record.state == paused {
            return Ok(true);
        }

        self.backend.set_stop_reason(id.as_str(), STOP_REASON_USER).await?;
        record.state = paused;
        record.updated_at = self.clock.now();
        self.persist(record).await;
        self.emit(record, DownloadEventKind::Paused);
        info!("Download paused");
        Ok(true)
    }

    /// Lift a stop reason and restart polling when it went dormant.
    #[instrument(skip(self))]
    pub async fn resume(&self, content_id: &str) -> Result<bool> {
        let id = ContentId::from(content_id);
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.state.is_terminal() || record.state == DownloadState::Removing {
            return Ok(false);
        }

        if record.state.is_stopped() {
            self.backend.set_stop_reason(id.as_str(), STOP_REASON_NONE).await?;
            record.state = DownloadState::Downloading;
            record.updated_at = self.clock.now();
            self.persist(record).await;
            self.emit(record, DownloadEventKind::Resumed);
            info!("Download resumed");
        }
        drop(records);

        self.reporter
            .ensure_running(self.weak_self.clone(), self.policy.first_poll_delay())
            .await;
        Ok(true)
    }

    /// Remove a download and its license.
    ///
    /// Local records are deleted eagerly; the backend's own removal callback
    /// later finds nothing to update.
    pub async fn remove(&self, content_id: &str) -> Result<bool> {
        self.discard(ContentId::from(content_id), "remove").await
    }

    /// Abort an in-flight download. Same cleanup as [`Self::remove`].
    pub async fn cancel(&self, content_id: &str) -> Result<bool> {
        self.discard(ContentId::from(content_id), "cancel").await
    }

    #[instrument(skip(self, content_id), fields(content_id = %content_id))]
    async fn discard(&self, content_id: ContentId, action: &'static str) -> Result<bool> {
        let mut records = self.records.lock().await;
        if records.remove(&content_id).is_none() {
            debug!(action, "Nothing to discard");
            return Ok(false);
        }

        if let Err(e) = self.backend.remove_download(content_id.as_str()).await {
            warn!(action, error = %e, "Backend removal failed, local records removed anyway");
        }
        drop(records);

        let metadata = self.metadata.delete(&content_id).await;
        let license = self.licenses.delete(&content_id).await;
        metadata?;
        license?;

        info!(action, "Download removed");
        Ok(true)
    }

    /// Remove every tracked download. Returns how many were removed.
    pub async fn clear_all(&self) -> Result<usize> {
        let ids: Vec<ContentId> = self.records.lock().await.keys().cloned().collect();
        let mut removed = 0;
        for id in ids {
            if self.discard(id, "clear").await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn is_downloaded(&self, content_id: &str) -> bool {
        self.records
            .lock()
            .await
            .get(&ContentId::from(content_id))
            .is_some_and(|record| record.state == DownloadState::Completed)
    }

    pub async fn get_state(&self, content_id: &str) -> Option<DownloadRecord> {
        self.records
            .lock()
            .await
            .get(&ContentId::from(content_id))
            .cloned()
    }

    /// All tracked records, oldest first.
    pub async fn list_all(&self) -> Vec<DownloadRecord> {
        let mut records: Vec<DownloadRecord> =
            self.records.lock().await.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.content_id.cmp(&b.content_id))
        });
        records
    }

    pub async fn total_bytes_downloaded(&self) -> u64 {
        self.records
            .lock()
            .await
            .values()
            .map(|record| record.bytes_downloaded)
            .sum()
    }

    /// Local-only playback source for a completed download.
    pub async fn build_local_source(&self, content_id: &str) -> Result<Option<MediaSource>> {
        Ok(self.backend.build_local_source(content_id).await?)
    }

    // ------------------------------------------------------------------
    // Licenses
    // ------------------------------------------------------------------

    pub async fn license_for(&self, content_id: &str) -> Result<Option<LicenseRecord>> {
        self.licenses.retrieve(&ContentId::from(content_id)).await
    }

    /// Replace the license handle of a tracked download.
    #[instrument(skip(self, keyset_handle))]
    pub async fn renew_license(&self, content_id: &str, keyset_handle: Vec<u8>) -> Result<()> {
        let id = ContentId::from(content_id);
        if !self.records.lock().await.contains_key(&id) {
            return Err(DownloadError::NotFound(content_id.to_string()));
        }
        self.licenses
            .store(&LicenseRecord::new(id, keyset_handle, self.clock.now()))
            .await
    }

    /// A license exists and the download has not expired.
    pub async fn is_license_valid(&self, content_id: &str) -> Result<bool> {
        let Some(record) = self.get_state(content_id).await else {
            return Ok(false);
        };
        if record.is_expired(self.clock.now()) {
            return Ok(false);
        }
        self.licenses.exists(&record.content_id).await
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    /// Apply a backend report to the tracked record.
    ///
    /// Returns `true` when the record changed (and was persisted).
    pub async fn apply_backend_transition(
        &self,
        transition: BackendTransition,
        source: TransitionSource,
    ) -> bool {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&transition.content_id) else {
            debug!(
                content_id = %transition.content_id,
                state = %transition.state,
                "Ignoring transition for untracked download"
            );
            return false;
        };

        let now = self.clock.now();
        let kind = match apply_transition(record, &transition, source, now, &self.policy) {
            Applied::Ignored => return false,
            Applied::Changed(kind) => kind,
        };

        debug!(
            content_id = %record.content_id,
            state = %record.state,
            bytes = record.bytes_downloaded,
            total = record.bytes_total,
            ?source,
            "Applied backend transition"
        );
        self.persist(record).await;
        if let Some(kind) = kind {
            self.emit(record, kind);
        }
        true
    }

    /// Load persisted records and reconcile unfinished ones with the backend.
    ///
    /// Returns the number of restored records.
    #[instrument(skip(self), fields(user_id = %self.user_id))]
    pub async fn restore(&self) -> Result<usize> {
        let persisted = self.metadata.load_all().await?;
        let count = persisted.len();

        let unfinished: Vec<ContentId> = {
            let mut records = self.records.lock().await;
            records.clear();
            for record in persisted {
                records.insert(record.content_id.clone(), record);
            }
            records
                .values()
                .filter(|record| !record.state.is_terminal())
                .map(|record| record.content_id.clone())
                .collect()
        };

        if !unfinished.is_empty() {
            match self.backend.query_current().await {
                Ok(statuses) => {
                    let mut by_id: HashMap<String, BackendDownloadStatus> = statuses
                        .into_iter()
                        .map(|status| (status.content_id.clone(), status))
                        .collect();
                    for id in unfinished {
                        let transition = match by_id.remove(id.as_str()) {
                            Some(status) => BackendTransition::from(status),
                            None => BackendTransition::new(id, DownloadState::Failed)
                                .with_error(UNTRACKED_BY_BACKEND),
                        };
                        self.apply_backend_transition(transition, TransitionSource::Callback)
                            .await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Backend query failed, keeping persisted download states");
                }
            }
        }

        let any_active = self
            .records
            .lock()
            .await
            .values()
            .any(|record| record.state.is_active());
        if any_active {
            self.reporter
                .ensure_running(self.weak_self.clone(), self.policy.first_poll_delay())
                .await;
        }

        info!(count, any_active, "Restored downloads");
        Ok(count)
    }

    /// Stop the change pump and the progress loop.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.reporter.shutdown().await;
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn persist(&self, record: &DownloadRecord) {
        if let Err(e) = self.metadata.save(record).await {
            warn!(content_id = %record.content_id, error = %e, "Download state not persisted");
        }
    }

    fn emit(&self, record: &DownloadRecord, kind: DownloadEventKind) {
        let mut event = DownloadEvent::new(kind, record.content_id.as_str()).with_bytes(
            record.bytes_downloaded,
            record.bytes_total,
            record.progress(),
        );
        if kind == DownloadEventKind::Failed {
            if let Some(reason) = &record.failure_reason {
                event = event.with_message(reason.clone());
            }
        }
        self.publish(event);
    }

    fn emit_failure(&self, content_id: &ContentId, message: &str) {
        self.publish(
            DownloadEvent::new(DownloadEventKind::Failed, content_id.as_str())
                .with_message(message),
        );
    }

    fn publish(&self, event: DownloadEvent) {
        if self.event_bus.emit(CoreEvent::Download(event)).is_err() {
            debug!("Download event dropped, no subscribers");
        }
    }

    fn reject(&self, content_id: &ContentId, message: &str) -> DownloadError {
        warn!(content_id = %content_id, reason = message, "Download request rejected");
        self.emit_failure(content_id, message);
        DownloadError::InvalidRequest(message.to_string())
    }
}

fn apply_transition(
    record: &mut DownloadRecord,
    transition: &BackendTransition,
    source: TransitionSource,
    now: DateTime<Utc>,
    policy: &DownloadPolicy,
) -> Applied {
    let previous = record.state;
    if previous.is_absorbing() || previous == DownloadState::Removing {
        return Applied::Ignored;
    }
    if transition.state == DownloadState::None {
        return Applied::Ignored;
    }
    // Pause and resume are settled by commands and callbacks; a poll snapshot
    // may predate them.
    if source == TransitionSource::Poll
        && previous.is_stopped() != transition.state.is_stopped()
    {
        return Applied::Ignored;
    }

    let total = if transition.bytes_total == 0 {
        record.bytes_total
    } else {
        transition.bytes_total
    };
    let mut downloaded = transition.bytes_downloaded;
    if transition.state == previous && downloaded < record.bytes_downloaded {
        downloaded = record.bytes_downloaded;
    }
    if total > 0 {
        downloaded = downloaded.min(total);
    }

    let kind = match transition.state {
        DownloadState::Completed => {
            let total = total.max(downloaded);
            record.state = DownloadState::Completed;
            record.bytes_total = total;
            record.bytes_downloaded = total;
            record.completed_at = Some(now);
            record.expiry_at = Some(now + policy.completed_ttl());
            record.failure_reason = None;
            Some(DownloadEventKind::Completed)
        }
        DownloadState::Failed => {
            record.state = DownloadState::Failed;
            record.bytes_total = total;
            if total > 0 {
                record.bytes_downloaded = record.bytes_downloaded.min(total);
            }
            record.failure_reason = Some(
                transition
                    .error
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string()),
            );
            Some(DownloadEventKind::Failed)
        }
        next => {
            if next == previous
                && downloaded == record.bytes_downloaded
                && total == record.bytes_total
            {
                return Applied::Ignored;
            }
            let bytes_changed = downloaded != record.bytes_downloaded;
            record.state = next;
            record.bytes_downloaded = downloaded;
            record.bytes_total = total;

            match next {
                DownloadState::Stopped { .. } if !previous.is_stopped() => {
                    Some(DownloadEventKind::Paused)
                }
                DownloadState::Downloading if previous.is_stopped() => {
                    Some(DownloadEventKind::Resumed)
                }
                DownloadState::Downloading if bytes_changed => Some(DownloadEventKind::Progress),
                _ => None,
            }
        }
    };

    record.updated_at = now;
    Applied::Changed(kind)
}

async fn run_change_pump(
    orchestrator: Weak<DownloadOrchestrator>,
    mut receiver: BackendChangeReceiver,
    shutdown: CancellationToken,
) {
    loop {
        let status = tokio::select! {
            _ = shutdown.cancelled() => break,
            status = receiver.recv() => match status {
                Some(status) => status,
                None => break,
            },
        };
        let Some(orchestrator) = orchestrator.upgrade() else {
            break;
        };
        orchestrator
            .apply_backend_transition(BackendTransition::from(status), TransitionSource::Callback)
            .await;
    }
    debug!("Backend change pump stopped");
}
