//! Playback Session Manager
//!
//! Drives the single long-lived platform player through offline playback
//! sessions.
//!
//! Protected content must not be prepared before a secure surface exists, so
//! `play` either starts immediately or parks a [`PendingStart`] that
//! `attach_surface` consumes exactly once. When the player reports `Ready`, a
//! one-shot render check is armed; if no frame geometry shows up before the
//! timeout the session fails with `videoNotRendering` instead of sitting on a
//! black frame while audio keeps playing.

use crate::eligibility::EligibilityChecker;
use crate::error::{classify_player_error, FailureReason, PlaybackError, Result};
use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::host::SurfaceHost;
use bridge_traits::player::{
    MediaSource, PlaybackSessionId, PlayerBackend, PlayerSignal, PlayerSignalReceiver,
    SurfaceHandle,
};
use core_async::sync::{mpsc, CancellationToken, Mutex};
use core_async::time::{as_millis_u64, sleep};
use core_downloads::DownloadOrchestrator;
use core_runtime::config::PlaybackPolicy;
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent, PlaybackEventKind};
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// Content Source
// ============================================================================

/// Where the session manager looks up downloaded content.
#[async_trait]
pub trait OfflineContentSource: Send + Sync {
    async fn is_downloaded(&self, content_id: &str) -> bool;

    /// Local-only source with the stored license handle attached, `None` when
    /// nothing playable is on disk.
    async fn local_source(&self, content_id: &str) -> Result<Option<MediaSource>>;
}

#[async_trait]
impl OfflineContentSource for DownloadOrchestrator {
    async fn is_downloaded(&self, content_id: &str) -> bool {
        DownloadOrchestrator::is_downloaded(self, content_id).await
    }

    async fn local_source(&self, content_id: &str) -> Result<Option<MediaSource>> {
        let Some(source) = self.build_local_source(content_id).await? else {
            return Ok(None);
        };
        if source.is_protected() {
            return Ok(Some(source));
        }
        Ok(Some(match self.license_for(content_id).await? {
            Some(license) => source.with_keyset_handle(license.keyset_handle),
            None => source,
        }))
    }
}

// ============================================================================
// Session Types
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    #[default]
    Idle,
    Preparing,
    Ready,
    Playing,
    Paused,
    Ended,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Preparing => "preparing",
            SessionState::Ready => "ready",
            SessionState::Playing => "playing",
            SessionState::Paused => "paused",
            SessionState::Ended => "ended",
            SessionState::Error => "error",
        }
    }

    /// Whether the player currently holds a source for this session.
    pub fn has_source(&self) -> bool {
        matches!(
            self,
            SessionState::Preparing
                | SessionState::Ready
                | SessionState::Playing
                | SessionState::Paused
                | SessionState::Ended
        )
    }
}

/// Start request parked until a secure surface attaches.
#[derive(Debug, Clone)]
pub struct PendingStart {
    pub media_source: MediaSource,
    pub resume_position: Duration,
}

/// Snapshot of the current session.
#[derive(Debug, Clone, Default)]
pub struct PlaybackSession {
    pub session_id: Option<PlaybackSessionId>,
    pub content_id: Option<String>,
    pub position: Duration,
    pub is_secure_surface_attached: bool,
    pub pending_start: Option<PendingStart>,
    pub state: SessionState,
}

#[derive(Default)]
struct SessionInner {
    session: PlaybackSession,
    surface: Option<SurfaceHandle>,
    video_rendered: bool,
    /// A source was handed to the player and not yet cleared.
    source_loaded: bool,
    render_generation: u64,
    render_check: Option<CancellationToken>,
    position_ticker: Option<CancellationToken>,
    released: bool,
}

impl SessionInner {
    /// Bumping the generation also invalidates a timer that already fired
    /// and is waiting on the session lock.
    fn cancel_render_check(&mut self) {
        self.render_generation += 1;
        if let Some(token) = self.render_check.take() {
            token.cancel();
        }
    }

    fn stop_position_ticker(&mut self) {
        if let Some(token) = self.position_ticker.take() {
            token.cancel();
        }
    }

    fn cancel_timers(&mut self) {
        self.cancel_render_check();
        self.stop_position_ticker();
    }

    fn content_id(&self) -> Option<String> {
        self.session.content_id.clone()
    }
}

// ============================================================================
// Manager
// ============================================================================

pub struct PlaybackSessionManager {
    player: Arc<dyn PlayerBackend>,
    content: Arc<dyn OfflineContentSource>,
    eligibility: Arc<EligibilityChecker>,
    surface_host: Option<Arc<dyn SurfaceHost>>,
    event_bus: EventBus,
    policy: PlaybackPolicy,
    inner: Mutex<SessionInner>,
    shutdown: CancellationToken,
    weak_self: Weak<PlaybackSessionManager>,
}

impl PlaybackSessionManager {
    /// Create the manager and start pumping player signals into it.
    pub fn new(
        player: Arc<dyn PlayerBackend>,
        content: Arc<dyn OfflineContentSource>,
        eligibility: Arc<EligibilityChecker>,
        surface_host: Option<Arc<dyn SurfaceHost>>,
        event_bus: EventBus,
        policy: PlaybackPolicy,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        player.set_signal_sender(sender);

        let manager = Arc::new_cyclic(|weak_self| Self {
            player,
            content,
            eligibility,
            surface_host,
            event_bus,
            policy,
            inner: Mutex::new(SessionInner::default()),
            shutdown: CancellationToken::new(),
            weak_self: weak_self.clone(),
        });

        core_async::spawn(run_signal_pump(
            Arc::downgrade(&manager),
            receiver,
            manager.shutdown.clone(),
        ));
        manager
    }

    pub async fn session(&self) -> PlaybackSession {
        self.inner.lock().await.session.clone()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.session.state
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Start offline playback of `content_id` at `resume_position`.
    ///
    /// Returns `false` and emits an error event when the content is not
    /// downloaded. Any previous session is stopped first. Without an attached
    /// secure surface the start is parked until `attach_surface`.
    #[instrument(skip(self, content_id), fields(content_id = %content_id))]
    pub async fn play(&self, content_id: &str, resume_position: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.released {
            return Err(PlaybackError::Released);
        }

        if !self.content.is_downloaded(content_id).await {
            self.fail_not_downloaded(content_id);
            return Ok(false);
        }
        let Some(source) = self.content.local_source(content_id).await? else {
            self.fail_not_downloaded(content_id);
            return Ok(false);
        };
        if !source.is_local_only() {
            warn!("Offline source would fall back to the network, refusing");
            return Err(PlaybackError::NetworkSourceRejected(content_id.to_string()));
        }

        self.reset_locked(&mut inner).await;

        let session_id = PlaybackSessionId::new();
        inner.session.session_id = Some(session_id);
        inner.session.content_id = Some(content_id.to_string());
        inner.session.position = resume_position;

        if inner.surface.is_some() {
            self.start_locked(&mut inner, source, resume_position).await?;
            info!(%session_id, "Offline playback started");
        } else {
            inner.session.pending_start = Some(PendingStart {
                media_source: source,
                resume_position,
            });
            info!(%session_id, "Waiting for secure surface before preparing");
        }
        Ok(true)
    }

    /// Route output to `surface` and consume a parked start, if any.
    #[instrument(skip(self))]
    pub async fn attach_surface(&self, surface: SurfaceHandle) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.released {
            return Err(PlaybackError::Released);
        }

        self.player.mark_surface_secure(surface).await?;
        inner.surface = Some(surface);
        inner.session.is_secure_surface_attached = true;

        if let Some(pending) = inner.session.pending_start.take() {
            debug!(content_id = %pending.media_source.content_id, "Consuming pending start");
            self.start_locked(&mut inner, pending.media_source, pending.resume_position)
                .await?;
        }
        Ok(())
    }

    pub async fn detach_surface(&self) {
        let mut inner = self.inner.lock().await;
        inner.surface = None;
        inner.session.is_secure_surface_attached = false;
        debug!("Secure surface detached");
    }

    /// Stop playback and clear the source. The player stays alive.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.released {
            return Ok(());
        }
        self.reset_locked(&mut inner).await;
        Ok(())
    }

    /// Release the player for good. Later calls fail with `Released`.
    #[instrument(skip(self))]
    pub async fn teardown(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.released {
            return Ok(());
        }
        self.reset_locked(&mut inner).await;
        inner.surface = None;
        inner.session.is_secure_surface_attached = false;
        inner.released = true;
        self.shutdown.cancel();

        let released = self.player.release().await;
        info!("Playback session torn down");
        released.map_err(Into::into)
    }

    // ------------------------------------------------------------------
    // Transport controls
    // ------------------------------------------------------------------

    pub async fn pause(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.released {
            return Err(PlaybackError::Released);
        }
        match inner.session.state {
            SessionState::Playing | SessionState::Ready => {
                self.player.pause().await?;
                inner.stop_position_ticker();
                inner.session.state = SessionState::Paused;
                self.publish(PlaybackEvent::new(PlaybackEventKind::Paused, inner.content_id()));
            }
            state => debug!(state = state.as_str(), "Nothing to pause"),
        }
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.released {
            return Err(PlaybackError::Released);
        }
        match inner.session.state {
            SessionState::Paused | SessionState::Ready => {
                self.player.play().await?;
                inner.session.state = SessionState::Playing;
                self.publish(PlaybackEvent::new(PlaybackEventKind::Playing, inner.content_id()));
                self.start_position_ticker(&mut inner);
                if !inner.video_rendered && inner.render_check.is_none() {
                    self.arm_render_check(&mut inner);
                }
            }
            state => debug!(state = state.as_str(), "Nothing to resume"),
        }
        Ok(())
    }

    /// Seek within the current source, or move the start point of a parked
    /// start.
    pub async fn seek_to(&self, position: Duration) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.released {
            return Err(PlaybackError::Released);
        }
        if let Some(pending) = inner.session.pending_start.as_mut() {
            pending.resume_position = position;
            inner.session.position = position;
            return Ok(());
        }
        if inner.session.state.has_source() {
            self.player.seek(position).await?;
            inner.session.position = position;
        }
        Ok(())
    }

    pub async fn current_position(&self) -> Duration {
        let mut inner = self.inner.lock().await;
        if inner.session.state.has_source() {
            match self.player.position().await {
                Ok(position) => inner.session.position = position,
                Err(e) => debug!(error = %e, "Player position unavailable"),
            }
        }
        inner.session.position
    }

    /// Duration of the loaded source, `None` while unknown or idle.
    pub async fn duration(&self) -> Option<Duration> {
        let inner = self.inner.lock().await;
        if !inner.session.state.has_source() {
            return None;
        }
        self.player.duration().await.ok().flatten()
    }

    // ------------------------------------------------------------------
    // Player surface
    // ------------------------------------------------------------------

    /// Ask the host to present a player surface, then start playback.
    #[instrument(skip(self, content_id), fields(content_id = %content_id))]
    pub async fn launch_player(&self, content_id: &str, resume_position: Duration) -> Result<bool> {
        let host = self
            .surface_host
            .clone()
            .ok_or(PlaybackError::SurfaceHostMissing)?;
        if !self.content.is_downloaded(content_id).await {
            self.fail_not_downloaded(content_id);
            return Ok(false);
        }
        host.present_player(content_id).await?;
        self.play(content_id, resume_position).await
    }

    /// Stop playback and ask the host to dismiss the player surface.
    pub async fn dismiss_player(&self) -> Result<()> {
        let content_id = self.inner.lock().await.content_id();
        self.stop().await?;
        if let Some(host) = &self.surface_host {
            if let Err(e) = host.dismiss_player().await {
                warn!(error = %e, "Host failed to dismiss player surface");
            }
        }
        self.publish(PlaybackEvent::new(PlaybackEventKind::Dismissed, content_id));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Player signals
    // ------------------------------------------------------------------

    /// Apply a callback from the platform player.
    pub async fn handle_player_signal(&self, signal: PlayerSignal) {
        let mut inner = self.inner.lock().await;
        let state = inner.session.state;
        if inner.released || !state.has_source() {
            debug!(?signal, state = state.as_str(), "Player signal ignored");
            return;
        }

        match signal {
            PlayerSignal::Buffering => {
                self.publish(PlaybackEvent::new(PlaybackEventKind::Buffering, inner.content_id()));
            }
            PlayerSignal::Ready => {
                if state == SessionState::Preparing {
                    inner.session.state = SessionState::Ready;
                }
                let active = matches!(
                    inner.session.state,
                    SessionState::Ready | SessionState::Playing
                );
                if active && !inner.video_rendered && inner.render_check.is_none() {
                    self.arm_render_check(&mut inner);
                }
            }
            PlayerSignal::IsPlayingChanged(true) => {
                if state != SessionState::Playing {
                    inner.session.state = SessionState::Playing;
                    self.publish(PlaybackEvent::new(PlaybackEventKind::Playing, inner.content_id()));
                }
                self.start_position_ticker(&mut inner);
            }
            PlayerSignal::IsPlayingChanged(false) => {
                inner.stop_position_ticker();
                if state == SessionState::Playing {
                    inner.session.state = SessionState::Paused;
                    self.publish(PlaybackEvent::new(PlaybackEventKind::Paused, inner.content_id()));
                }
            }
            PlayerSignal::Ended => {
                inner.cancel_timers();
                inner.session.state = SessionState::Ended;
                self.publish(PlaybackEvent::new(PlaybackEventKind::Ended, inner.content_id()));
            }
            PlayerSignal::VideoSizeChanged { width, height } => {
                if width > 0 && height > 0 {
                    if !inner.video_rendered {
                        debug!(width, height, "First video frame rendered");
                    }
                    inner.video_rendered = true;
                    inner.cancel_render_check();
                }
            }
            PlayerSignal::Error { code, message } => {
                let classification = classify_player_error(code);
                inner.cancel_timers();
                inner.session.state = SessionState::Error;
                warn!(
                    ?code,
                    is_drm_error = classification.is_drm_error,
                    reason = %classification.reason,
                    message = %message,
                    "Player reported an error"
                );
                self.publish(PlaybackEvent::error(
                    inner.content_id(),
                    format!("{}: {}", classification.reason, message),
                    classification.is_drm_error,
                ));
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Stop whatever is loaded and return to a fresh `Idle` session. The
    /// surface attachment survives.
    async fn reset_locked(&self, inner: &mut SessionInner) {
        inner.cancel_timers();
        if inner.source_loaded {
            if let Err(e) = self.player.stop().await {
                warn!(error = %e, "Player stop failed");
            }
            if let Err(e) = self.player.clear_source().await {
                warn!(error = %e, "Clearing player source failed");
            }
            inner.source_loaded = false;
        }
        inner.session = PlaybackSession {
            is_secure_surface_attached: inner.surface.is_some(),
            ..PlaybackSession::default()
        };
        inner.video_rendered = false;
    }

    async fn start_locked(
        &self,
        inner: &mut SessionInner,
        source: MediaSource,
        resume_position: Duration,
    ) -> Result<()> {
        let content_id = source.content_id.clone();
        inner.session.state = SessionState::Preparing;
        inner.source_loaded = true;

        let started: BridgeResult<()> = async {
            self.player.set_source(source).await?;
            self.player.prepare().await?;
            if !resume_position.is_zero() {
                self.player.seek(resume_position).await?;
            }
            self.player.play().await
        }
        .await;

        if let Err(e) = started {
            inner.session.state = SessionState::Error;
            warn!(content_id = %content_id, error = %e, "Player failed to start");
            self.publish(PlaybackEvent::error(
                Some(content_id),
                format!("{}: {}", FailureReason::GenericPlaybackError, e),
                false,
            ));
            return Err(e.into());
        }
        Ok(())
    }

    fn arm_render_check(&self, inner: &mut SessionInner) {
        inner.cancel_render_check();
        let generation = inner.render_generation;
        let token = self.shutdown.child_token();
        inner.render_check = Some(token.clone());

        let manager = self.weak_self.clone();
        let timeout = self.policy.render_check_timeout();
        core_async::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = sleep(timeout) => {}
            }
            if let Some(manager) = manager.upgrade() {
                manager.on_render_check_expired(generation).await;
            }
        });
        debug!(generation, timeout_ms = as_millis_u64(timeout), "Render check armed");
    }

    async fn on_render_check_expired(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.released || inner.render_generation != generation {
            debug!(generation, "Stale render check ignored");
            return;
        }
        inner.render_check = None;
        let active = matches!(
            inner.session.state,
            SessionState::Ready | SessionState::Playing
        );
        if inner.video_rendered || !active {
            return;
        }

        let capability = self.eligibility.check_eligibility().await;
        inner.stop_position_ticker();
        if let Err(e) = self.player.stop().await {
            warn!(error = %e, "Player stop failed");
        }
        inner.session.state = SessionState::Error;

        warn!(
            content_id = ?inner.session.content_id,
            device_ineligible = !capability.eligible,
            reason = %capability.reason,
            "No video frame rendered, secure output path is blocked"
        );
        let message = if capability.eligible {
            format!("video output blocked: {}", capability.reason)
        } else {
            format!("{}: {}", FailureReason::IneligibleDevice, capability.reason)
        };
        self.publish(PlaybackEvent::video_not_rendering(
            inner.content_id(),
            !capability.eligible,
            message,
        ));
    }

    fn start_position_ticker(&self, inner: &mut SessionInner) {
        if inner.position_ticker.is_some() {
            return;
        }
        let token = self.shutdown.child_token();
        inner.position_ticker = Some(token.clone());

        let manager = self.weak_self.clone();
        let interval = self.policy.position_interval();
        core_async::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = sleep(interval) => {}
                }
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if !manager.emit_position().await {
                    break;
                }
            }
        });
    }

    /// Returns `false` once the session is no longer playing.
    async fn emit_position(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.session.state != SessionState::Playing {
            inner.stop_position_ticker();
            return false;
        }
        let position = match self.player.position().await {
            Ok(position) => position,
            Err(e) => {
                debug!(error = %e, "Player position unavailable");
                return true;
            }
        };
        let duration = self.player.duration().await.ok().flatten();
        inner.session.position = position;
        self.publish(
            PlaybackEvent::new(PlaybackEventKind::Position, inner.content_id())
                .with_position(as_millis_u64(position), duration.map(as_millis_u64)),
        );
        true
    }

    fn fail_not_downloaded(&self, content_id: &str) {
        warn!(content_id = %content_id, "Offline playback requested for content not downloaded");
        self.publish(PlaybackEvent::error(
            Some(content_id.to_string()),
            FailureReason::NotDownloaded.as_str(),
            false,
        ));
    }

    fn publish(&self, event: PlaybackEvent) {
        if self.event_bus.emit(CoreEvent::Playback(event)).is_err() {
            debug!("Playback event dropped, no subscribers");
        }
    }
}

async fn run_signal_pump(
    manager: Weak<PlaybackSessionManager>,
    mut receiver: PlayerSignalReceiver,
    shutdown: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            _ = shutdown.cancelled() => break,
            signal = receiver.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.handle_player_signal(signal).await;
    }
    debug!("Player signal pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::drm::DrmScheme;
    use bridge_traits::mock::{FakePlayerBackend, PlayerCall, RecordingSurfaceHost, StaticDrmProbe};
    use bridge_traits::player::PlayerErrorCode;
    use core_runtime::events::EventStream;
    use std::collections::HashSet;
    use std::path::PathBuf;

    #[derive(Default)]
    struct StaticContent {
        downloaded: HashSet<String>,
        network_backed: bool,
    }

    impl StaticContent {
        fn with(ids: &[&str]) -> Self {
            Self {
                downloaded: ids.iter().map(|id| id.to_string()).collect(),
                network_backed: false,
            }
        }
    }

    #[async_trait]
    impl OfflineContentSource for StaticContent {
        async fn is_downloaded(&self, content_id: &str) -> bool {
            self.downloaded.contains(content_id)
        }

        async fn local_source(&self, content_id: &str) -> Result<Option<MediaSource>> {
            if !self.downloaded.contains(content_id) {
                return Ok(None);
            }
            let source = MediaSource::local(content_id, "file:///m.mpd", PathBuf::from("/cache"))
                .with_keyset_handle(vec![1, 2]);
            Ok(Some(if self.network_backed {
                source.with_network_fallback()
            } else {
                source
            }))
        }
    }

    struct Fixture {
        manager: Arc<PlaybackSessionManager>,
        player: Arc<FakePlayerBackend>,
        host: Arc<RecordingSurfaceHost>,
        events: EventStream,
    }

    fn fixture_with(content: StaticContent) -> Fixture {
        let player = Arc::new(FakePlayerBackend::new());
        let host = Arc::new(RecordingSurfaceHost::new());
        let bus = EventBus::new(64);
        let events = EventStream::new(bus.subscribe());
        let eligibility = Arc::new(EligibilityChecker::new(
            Arc::new(StaticDrmProbe::hardware_secure()),
            DrmScheme::Widevine,
            vec!["video/avc".to_string()],
        ));
        let manager = PlaybackSessionManager::new(
            player.clone(),
            Arc::new(content),
            eligibility,
            Some(host.clone()),
            bus,
            PlaybackPolicy::default(),
        );
        Fixture {
            manager,
            player,
            host,
            events,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(StaticContent::with(&["m1", "m2"]))
    }

    fn playback_kinds(events: &mut EventStream) -> Vec<PlaybackEventKind> {
        let mut kinds = Vec::new();
        while let Some(Ok(event)) = events.try_recv() {
            if let CoreEvent::Playback(event) = event {
                kinds.push(event.kind);
            }
        }
        kinds
    }

    #[tokio::test]
    async fn test_play_defers_until_surface_attaches() {
        let fx = fixture();

        assert!(fx.manager.play("m1", Duration::from_millis(5000)).await.unwrap());
        let session = fx.manager.session().await;
        assert_eq!(session.state, SessionState::Idle);
        assert!(!session.is_secure_surface_attached);
        let pending = session.pending_start.unwrap();
        assert_eq!(pending.resume_position, Duration::from_millis(5000));
        assert!(pending.media_source.is_protected());
        assert!(fx.player.calls().is_empty());

        fx.manager.attach_surface(SurfaceHandle(7)).await.unwrap();
        assert_eq!(
            fx.player.calls(),
            vec![
                PlayerCall::MarkSurfaceSecure(SurfaceHandle(7)),
                PlayerCall::SetSource("m1".to_string()),
                PlayerCall::Prepare,
                PlayerCall::Seek(Duration::from_millis(5000)),
                PlayerCall::Play,
            ]
        );
        assert_eq!(fx.manager.state().await, SessionState::Preparing);

        // A second attach has nothing left to start
        fx.manager.attach_surface(SurfaceHandle(7)).await.unwrap();
        assert_eq!(fx.player.count(&PlayerCall::Prepare), 1);
        assert_eq!(fx.player.count(&PlayerCall::MarkSurfaceSecure(SurfaceHandle(7))), 2);
    }

    #[tokio::test]
    async fn test_play_starts_immediately_with_surface() {
        let fx = fixture();
        fx.manager.attach_surface(SurfaceHandle(1)).await.unwrap();

        assert!(fx.manager.play("m1", Duration::ZERO).await.unwrap());
        assert_eq!(fx.player.count(&PlayerCall::Prepare), 1);
        // No seek for a start from the beginning
        assert!(!fx
            .player
            .calls()
            .iter()
            .any(|call| matches!(call, PlayerCall::Seek(_))));
        assert!(fx.manager.session().await.pending_start.is_none());
    }

    #[tokio::test]
    async fn test_play_not_downloaded() {
        let mut fx = fixture();

        assert!(!fx.manager.play("missing", Duration::ZERO).await.unwrap());
        assert!(fx.player.calls().is_empty());

        match fx.events.try_recv() {
            Some(Ok(CoreEvent::Playback(event))) => {
                assert_eq!(event.kind, PlaybackEventKind::Error);
                assert_eq!(event.message.as_deref(), Some("not downloaded"));
                assert_eq!(event.is_drm_error, Some(false));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_network_backed_source_rejected() {
        let fx = fixture_with(StaticContent {
            network_backed: true,
            ..StaticContent::with(&["m1"])
        });
        let err = fx.manager.play("m1", Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, PlaybackError::NetworkSourceRejected(_)));
        assert!(fx.player.calls().is_empty());
    }

    #[tokio::test]
    async fn test_new_play_replaces_pending_start() {
        let fx = fixture();
        fx.manager.play("m1", Duration::from_secs(1)).await.unwrap();
        fx.manager.play("m2", Duration::ZERO).await.unwrap();

        fx.manager.attach_surface(SurfaceHandle(1)).await.unwrap();
        assert_eq!(fx.player.count(&PlayerCall::SetSource("m1".into())), 0);
        assert_eq!(fx.player.count(&PlayerCall::SetSource("m2".into())), 1);
    }

    #[tokio::test]
    async fn test_play_clears_previous_source() {
        let fx = fixture();
        fx.manager.attach_surface(SurfaceHandle(1)).await.unwrap();
        fx.manager.play("m1", Duration::ZERO).await.unwrap();
        fx.player.clear_calls();

        fx.manager.play("m2", Duration::ZERO).await.unwrap();
        let calls = fx.player.calls();
        assert_eq!(
            calls[..3].to_vec(),
            vec![
                PlayerCall::Stop,
                PlayerCall::ClearSource,
                PlayerCall::SetSource("m2".into()),
            ]
        );
        assert_eq!(fx.player.count(&PlayerCall::Release), 0);
    }

    #[tokio::test]
    async fn test_seek_moves_pending_start() {
        let fx = fixture();
        fx.manager.play("m1", Duration::from_secs(5)).await.unwrap();
        fx.manager.seek_to(Duration::from_secs(9)).await.unwrap();
        assert_eq!(fx.manager.current_position().await, Duration::from_secs(9));

        fx.manager.attach_surface(SurfaceHandle(1)).await.unwrap();
        assert_eq!(fx.player.count(&PlayerCall::Seek(Duration::from_secs(9))), 1);
    }

    #[tokio::test]
    async fn test_signals_drive_state_and_events() {
        let mut fx = fixture();
        fx.manager.attach_surface(SurfaceHandle(1)).await.unwrap();
        fx.manager.play("m1", Duration::ZERO).await.unwrap();

        fx.manager.handle_player_signal(PlayerSignal::Buffering).await;
        fx.manager.handle_player_signal(PlayerSignal::Ready).await;
        assert_eq!(fx.manager.state().await, SessionState::Ready);
        fx.manager
            .handle_player_signal(PlayerSignal::IsPlayingChanged(true))
            .await;
        assert_eq!(fx.manager.state().await, SessionState::Playing);
        fx.manager.handle_player_signal(PlayerSignal::Ended).await;
        assert_eq!(fx.manager.state().await, SessionState::Ended);

        assert_eq!(
            playback_kinds(&mut fx.events),
            vec![
                PlaybackEventKind::Buffering,
                PlaybackEventKind::Playing,
                PlaybackEventKind::Ended,
            ]
        );
    }

    #[tokio::test]
    async fn test_signals_ignored_while_idle() {
        let mut fx = fixture();
        fx.manager
            .handle_player_signal(PlayerSignal::IsPlayingChanged(true))
            .await;
        assert_eq!(fx.manager.state().await, SessionState::Idle);
        assert!(playback_kinds(&mut fx.events).is_empty());
    }

    #[tokio::test]
    async fn test_drm_error_is_classified() {
        let mut fx = fixture();
        fx.manager.attach_surface(SurfaceHandle(1)).await.unwrap();
        fx.manager.play("m1", Duration::ZERO).await.unwrap();

        fx.manager
            .handle_player_signal(PlayerSignal::Error {
                code: PlayerErrorCode::DrmLicenseExpired,
                message: "license expired".into(),
            })
            .await;
        assert_eq!(fx.manager.state().await, SessionState::Error);

        match fx.events.try_recv() {
            Some(Ok(CoreEvent::Playback(event))) => {
                assert_eq!(event.kind, PlaybackEventKind::Error);
                assert_eq!(event.is_drm_error, Some(true));
                assert!(event.message.unwrap().starts_with("license failure"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_after_player_error_clears_source() {
        let fx = fixture();
        fx.manager.attach_surface(SurfaceHandle(1)).await.unwrap();
        fx.manager.play("m1", Duration::ZERO).await.unwrap();
        fx.manager
            .handle_player_signal(PlayerSignal::Error {
                code: PlayerErrorCode::DecodingFailed,
                message: "decoder crashed".into(),
            })
            .await;
        fx.player.clear_calls();

        fx.manager.stop().await.unwrap();
        assert_eq!(
            fx.player.calls(),
            vec![PlayerCall::Stop, PlayerCall::ClearSource]
        );
        assert_eq!(fx.manager.state().await, SessionState::Idle);

        // Nothing left to clear on a second stop
        fx.manager.stop().await.unwrap();
        assert_eq!(fx.player.count(&PlayerCall::ClearSource), 1);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let mut fx = fixture();
        fx.manager.attach_surface(SurfaceHandle(1)).await.unwrap();
        fx.manager.play("m1", Duration::ZERO).await.unwrap();
        fx.manager
            .handle_player_signal(PlayerSignal::VideoSizeChanged { width: 1280, height: 720 })
            .await;
        fx.manager
            .handle_player_signal(PlayerSignal::IsPlayingChanged(true))
            .await;

        fx.manager.pause().await.unwrap();
        assert_eq!(fx.manager.state().await, SessionState::Paused);
        // The player's own callback does not duplicate the event
        fx.manager
            .handle_player_signal(PlayerSignal::IsPlayingChanged(false))
            .await;

        fx.manager.resume().await.unwrap();
        assert_eq!(fx.manager.state().await, SessionState::Playing);
        fx.manager
            .handle_player_signal(PlayerSignal::IsPlayingChanged(true))
            .await;

        assert_eq!(
            playback_kinds(&mut fx.events),
            vec![
                PlaybackEventKind::Playing,
                PlaybackEventKind::Paused,
                PlaybackEventKind::Playing,
            ]
        );
        assert_eq!(fx.player.count(&PlayerCall::Pause), 1);
    }

    #[tokio::test]
    async fn test_transport_controls_are_noops_when_idle() {
        let fx = fixture();
        fx.manager.pause().await.unwrap();
        fx.manager.resume().await.unwrap();
        fx.manager.seek_to(Duration::from_secs(3)).await.unwrap();
        fx.manager.stop().await.unwrap();
        assert!(fx.player.calls().is_empty());
        assert_eq!(fx.manager.duration().await, None);
    }

    #[tokio::test]
    async fn test_position_and_duration_come_from_player() {
        let fx = fixture();
        fx.manager.attach_surface(SurfaceHandle(1)).await.unwrap();
        fx.manager.play("m1", Duration::ZERO).await.unwrap();
        fx.player.set_position(Duration::from_millis(1234));
        fx.player.set_duration(Some(Duration::from_secs(60)));

        assert_eq!(fx.manager.current_position().await, Duration::from_millis(1234));
        assert_eq!(fx.manager.duration().await, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_stop_keeps_surface_and_player() {
        let fx = fixture();
        fx.manager.attach_surface(SurfaceHandle(1)).await.unwrap();
        fx.manager.play("m1", Duration::ZERO).await.unwrap();

        fx.manager.stop().await.unwrap();
        let session = fx.manager.session().await;
        assert_eq!(session.state, SessionState::Idle);
        assert!(session.is_secure_surface_attached);
        assert_eq!(fx.player.count(&PlayerCall::ClearSource), 1);
        assert_eq!(fx.player.count(&PlayerCall::Release), 0);

        // Player is reused for the next session
        assert!(fx.manager.play("m2", Duration::ZERO).await.unwrap());
        assert_eq!(fx.player.count(&PlayerCall::Prepare), 2);
    }

    #[tokio::test]
    async fn test_detach_surface_parks_next_start() {
        let fx = fixture();
        fx.manager.attach_surface(SurfaceHandle(1)).await.unwrap();
        fx.manager.detach_surface().await;

        fx.manager.play("m1", Duration::ZERO).await.unwrap();
        assert!(fx.manager.session().await.pending_start.is_some());
        assert_eq!(fx.player.count(&PlayerCall::Prepare), 0);
    }

    #[tokio::test]
    async fn test_teardown_releases_player() {
        let fx = fixture();
        fx.manager.attach_surface(SurfaceHandle(1)).await.unwrap();
        fx.manager.play("m1", Duration::ZERO).await.unwrap();

        fx.manager.teardown().await.unwrap();
        assert_eq!(fx.player.count(&PlayerCall::Release), 1);
        assert!(matches!(
            fx.manager.play("m1", Duration::ZERO).await,
            Err(PlaybackError::Released)
        ));

        // Idempotent
        fx.manager.teardown().await.unwrap();
        assert_eq!(fx.player.count(&PlayerCall::Release), 1);
    }

    #[tokio::test]
    async fn test_launch_and_dismiss_player() {
        let mut fx = fixture();

        assert!(fx.manager.launch_player("m1", Duration::ZERO).await.unwrap());
        assert_eq!(fx.host.presented(), vec!["m1".to_string()]);
        assert!(fx.manager.session().await.pending_start.is_some());

        fx.manager.dismiss_player().await.unwrap();
        assert_eq!(fx.host.dismiss_count(), 1);
        assert_eq!(fx.manager.state().await, SessionState::Idle);
        assert_eq!(playback_kinds(&mut fx.events), vec![PlaybackEventKind::Dismissed]);
    }

    #[tokio::test]
    async fn test_launch_player_skips_host_when_not_downloaded() {
        let fx = fixture();
        assert!(!fx.manager.launch_player("missing", Duration::ZERO).await.unwrap());
        assert!(fx.host.presented().is_empty());
    }
}
