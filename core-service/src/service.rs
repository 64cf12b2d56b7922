//! The host-facing command surface.

use crate::error::{CoreError, Result};
use bridge_traits::host::EventSink;
use bridge_traits::player::SurfaceHandle;
use core_async::sync::{broadcast, CancellationToken, RwLock};
use core_downloads::{
    ContentId, DownloadOrchestrator, DownloadRecord, DownloadRequest, ExpirySweeper, LicenseStore,
    MetadataStore,
};
use core_playback::{CapabilityResult, EligibilityChecker, PlaybackSessionManager};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, EventStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Directory under the cache root that holds offline media, one folder per user.
pub const OFFLINE_DOWNLOADS_DIR: &str = "offline-downloads";

/// Components bound to one signed-in user.
struct UserSession {
    user_id: String,
    cache_dir: PathBuf,
    orchestrator: Arc<DownloadOrchestrator>,
    sweeper: ExpirySweeper,
    playback: Arc<PlaybackSessionManager>,
}

/// Offline downloads and DRM playback for a single host application.
///
/// Construct once at startup, then call [`initialize`](Self::initialize) with
/// the signed-in user before issuing download or playback commands.
pub struct OfflineMediaService {
    config: CoreConfig,
    event_bus: EventBus,
    eligibility: Arc<EligibilityChecker>,
    user: RwLock<Option<Arc<UserSession>>>,
    shutdown: CancellationToken,
}

impl OfflineMediaService {
    /// Create the service and, when the config carries an `EventSink`, start
    /// forwarding events to it.
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let event_bus = EventBus::new(config.event_buffer_size);
        let eligibility = Arc::new(EligibilityChecker::new(
            config.drm_probe.clone(),
            config.drm_scheme,
            config.playback_policy.secure_mime_types.clone(),
        ));
        let shutdown = CancellationToken::new();

        if let Some(sink) = config.event_sink.clone() {
            core_async::spawn(run_event_fan_out(
                event_bus.subscribe(),
                sink,
                shutdown.clone(),
            ));
        }

        info!(
            cache_root = %config.cache_root.display(),
            drm_scheme = %config.drm_scheme,
            "Offline media service created"
        );
        Ok(Self {
            config,
            event_bus,
            eligibility,
            user: RwLock::new(None),
            shutdown,
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Bind the service to `user_id`.
    ///
    /// Creates `<cache_root>/offline-downloads/<userId>`, binds the download
    /// backend to it and restores persisted records. Calling again with the
    /// same user is a no-op; a different user replaces the current session.
    #[instrument(skip(self))]
    pub async fn initialize(&self, user_id: &str) -> Result<()> {
        validate_user_id(user_id)?;

        let mut current = self.user.write().await;
        if let Some(existing) = current.as_ref() {
            if existing.user_id == user_id {
                debug!("Already initialized for user");
                return Ok(());
            }
            info!(previous = %existing.user_id, "Switching offline media user");
            release_session(existing).await;
            *current = None;
        }

        let cache_dir = self
            .config
            .cache_root
            .join(OFFLINE_DOWNLOADS_DIR)
            .join(user_id);
        self.config
            .file_system
            .create_dir_all(&cache_dir)
            .await
            .map_err(|e| {
                CoreError::InitializationFailed(format!(
                    "cannot create offline cache {}: {}",
                    cache_dir.display(),
                    e
                ))
            })?;
        self.config
            .download_backend
            .bind_cache(user_id, cache_dir.clone())
            .await?;

        let orchestrator = DownloadOrchestrator::new(
            self.config.download_backend.clone(),
            MetadataStore::new(self.config.settings_store.clone(), user_id),
            LicenseStore::new(self.config.secure_store.clone(), user_id),
            self.config.clock.clone(),
            self.event_bus.clone(),
            self.config.download_policy.clone(),
        );
        let restored = orchestrator.restore().await?;

        let sweeper = ExpirySweeper::new(orchestrator.clone(), self.config.clock.clone());
        let playback = PlaybackSessionManager::new(
            self.config.player_backend.clone(),
            orchestrator.clone(),
            self.eligibility.clone(),
            self.config.surface_host.clone(),
            self.event_bus.clone(),
            self.config.playback_policy.clone(),
        );

        *current = Some(Arc::new(UserSession {
            user_id: user_id.to_string(),
            cache_dir,
            orchestrator,
            sweeper,
            playback,
        }));
        info!(restored, "Offline media service initialized");
        Ok(())
    }

    /// User the service is bound to, if any.
    pub async fn current_user(&self) -> Option<String> {
        self.user
            .read()
            .await
            .as_ref()
            .map(|session| session.user_id.clone())
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    /// Stop timers and pumps, release the player and stop event delivery.
    pub async fn shutdown(&self) {
        if let Some(session) = self.user.write().await.take() {
            session.orchestrator.shutdown().await;
            if let Err(e) = session.playback.teardown().await {
                warn!(error = %e, "Player release failed during shutdown");
            }
        }
        self.shutdown.cancel();
        info!("Offline media service shut down");
    }

    // ------------------------------------------------------------------
    // Downloads
    // ------------------------------------------------------------------

    pub async fn start_download(&self, request: DownloadRequest) -> Result<()> {
        let session = self.session().await?;
        session.orchestrator.start_download(request).await?;
        Ok(())
    }

    pub async fn pause_download(&self, content_id: &str) -> Result<bool> {
        Ok(self.session().await?.orchestrator.pause(content_id).await?)
    }

    pub async fn resume_download(&self, content_id: &str) -> Result<bool> {
        Ok(self.session().await?.orchestrator.resume(content_id).await?)
    }

    pub async fn cancel_download(&self, content_id: &str) -> Result<bool> {
        let session = self.session().await?;
        stop_if_playing(&session, content_id).await;
        Ok(session.orchestrator.cancel(content_id).await?)
    }

    pub async fn remove_download(&self, content_id: &str) -> Result<bool> {
        let session = self.session().await?;
        stop_if_playing(&session, content_id).await;
        Ok(session.orchestrator.remove(content_id).await?)
    }

    pub async fn is_downloaded(&self, content_id: &str) -> Result<bool> {
        Ok(self.session().await?.orchestrator.is_downloaded(content_id).await)
    }

    pub async fn get_download_state(&self, content_id: &str) -> Result<Option<DownloadRecord>> {
        Ok(self.session().await?.orchestrator.get_state(content_id).await)
    }

    pub async fn get_all_downloads(&self) -> Result<Vec<DownloadRecord>> {
        Ok(self.session().await?.orchestrator.list_all().await)
    }

    /// Bytes used by this user's offline cache.
    ///
    /// Measured on disk; falls back to the sum of tracked download sizes
    /// when the directory cannot be measured.
    pub async fn get_total_storage_used(&self) -> Result<u64> {
        let session = self.session().await?;
        match self
            .config
            .file_system
            .directory_size(&session.cache_dir)
            .await
        {
            Ok(size) => Ok(size),
            Err(e) => {
                debug!(error = %e, "Cache directory not measurable, summing tracked downloads");
                Ok(session.orchestrator.total_bytes_downloaded().await)
            }
        }
    }

    /// Remove every download of the current user. Returns how many were removed.
    pub async fn clear_all_downloads(&self) -> Result<usize> {
        let session = self.session().await?;
        session.playback.stop().await?;
        Ok(session.orchestrator.clear_all().await?)
    }

    pub async fn remove_expired_downloads(&self) -> Result<Vec<ContentId>> {
        let session = self.session().await?;
        Ok(session.sweeper.sweep().await?)
    }

    // ------------------------------------------------------------------
    // Device and licenses
    // ------------------------------------------------------------------

    /// Does not require an initialized user.
    pub async fn check_device_capability(&self) -> CapabilityResult {
        self.eligibility.check_eligibility().await
    }

    pub async fn renew_license(&self, content_id: &str, keyset_handle: Vec<u8>) -> Result<()> {
        let session = self.session().await?;
        session
            .orchestrator
            .renew_license(content_id, keyset_handle)
            .await?;
        Ok(())
    }

    pub async fn is_license_valid(&self, content_id: &str) -> Result<bool> {
        Ok(self
            .session()
            .await?
            .orchestrator
            .is_license_valid(content_id)
            .await?)
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    pub async fn play_offline(&self, content_id: &str, resume_position: Duration) -> Result<bool> {
        let session = self.session().await?;
        Ok(session.playback.play(content_id, resume_position).await?)
    }

    pub async fn launch_player(&self, content_id: &str, resume_position: Duration) -> Result<bool> {
        let session = self.session().await?;
        Ok(session
            .playback
            .launch_player(content_id, resume_position)
            .await?)
    }

    pub async fn attach_surface(&self, surface: SurfaceHandle) -> Result<()> {
        self.session().await?.playback.attach_surface(surface).await?;
        Ok(())
    }

    pub async fn detach_surface(&self) -> Result<()> {
        self.session().await?.playback.detach_surface().await;
        Ok(())
    }

    pub async fn dismiss_player(&self) -> Result<()> {
        self.session().await?.playback.dismiss_player().await?;
        Ok(())
    }

    pub async fn pause_playback(&self) -> Result<()> {
        self.session().await?.playback.pause().await?;
        Ok(())
    }

    pub async fn resume_playback(&self) -> Result<()> {
        self.session().await?.playback.resume().await?;
        Ok(())
    }

    pub async fn stop_playback(&self) -> Result<()> {
        self.session().await?.playback.stop().await?;
        Ok(())
    }

    pub async fn seek_to(&self, position: Duration) -> Result<()> {
        self.session().await?.playback.seek_to(position).await?;
        Ok(())
    }

    pub async fn get_current_position(&self) -> Result<Duration> {
        Ok(self.session().await?.playback.current_position().await)
    }

    pub async fn get_duration(&self) -> Result<Option<Duration>> {
        Ok(self.session().await?.playback.duration().await)
    }

    async fn session(&self) -> Result<Arc<UserSession>> {
        self.user
            .read()
            .await
            .clone()
            .ok_or(CoreError::NotInitialized)
    }
}

fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(CoreError::InvalidInput("user id cannot be empty".to_string()));
    }
    if user_id.contains(['/', '\\']) || user_id == "." || user_id == ".." {
        return Err(CoreError::InvalidInput(format!(
            "user id {:?} is not a valid directory name",
            user_id
        )));
    }
    Ok(())
}

async fn stop_if_playing(session: &UserSession, content_id: &str) {
    let playing = session.playback.session().await.content_id;
    if playing.as_deref() == Some(content_id) {
        if let Err(e) = session.playback.stop().await {
            warn!(content_id = %content_id, error = %e, "Failed to stop playback of removed content");
        }
    }
}

/// Detach a replaced user session without releasing the shared player.
async fn release_session(session: &UserSession) {
    if let Err(e) = session.playback.stop().await {
        warn!(error = %e, "Failed to stop playback of previous user");
    }
    session.orchestrator.shutdown().await;
}

async fn run_event_fan_out(
    mut receiver: broadcast::Receiver<CoreEvent>,
    sink: Arc<dyn EventSink>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = receiver.recv() => match event {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event sink fell behind, events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        let payload = match event.to_host_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Event not serializable for host");
                continue;
            }
        };
        let channel = event.channel();
        if let Err(e) = sink.deliver(channel, payload).await {
            warn!(channel = channel.as_str(), error = %e, "Event delivery to host failed");
        }
    }
    debug!("Event fan-out stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_validation() {
        assert!(validate_user_id("user-1").is_ok());
        assert!(matches!(
            validate_user_id("  "),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(validate_user_id("../other").is_err());
        assert!(validate_user_id("..").is_err());
        assert!(validate_user_id("a\\b").is_err());
    }
}
