//! Playback sessions over real downloads, with a paused Tokio clock so the
//! render check and position ticker fire deterministically.

use bridge_traits::drm::{DrmProbe, DrmScheme};
use bridge_traits::mock::{
    FakeDownloadBackend, FakePlayerBackend, InMemorySecureStore, InMemorySettingsStore,
    ManualClock, PlayerCall, StaticDrmProbe,
};
use bridge_traits::player::{MediaSource, PlayerSignal, SurfaceHandle};
use core_downloads::{
    BackendTransition, DownloadOrchestrator, DownloadRequest, DownloadState, LicenseStore,
    MetadataStore, TransitionSource,
};
use core_playback::{EligibilityChecker, PlaybackSessionManager, SessionState};
use core_runtime::config::{DownloadPolicy, PlaybackPolicy};
use core_runtime::events::{CoreEvent, EventBus, EventStream, PlaybackEvent, PlaybackEventKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

struct Harness {
    orchestrator: Arc<DownloadOrchestrator>,
    backend: Arc<FakeDownloadBackend>,
    player: Arc<FakePlayerBackend>,
    manager: Arc<PlaybackSessionManager>,
    events: EventStream,
}

impl Harness {
    fn new(probe: impl DrmProbe + 'static) -> Self {
        let bus = EventBus::new(256);
        let events = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Playback(_)));
        let backend = Arc::new(FakeDownloadBackend::new());
        let orchestrator = DownloadOrchestrator::new(
            backend.clone(),
            MetadataStore::new(Arc::new(InMemorySettingsStore::new()), "u1"),
            LicenseStore::new(Arc::new(InMemorySecureStore::new()), "u1"),
            Arc::new(ManualClock::default()),
            bus.clone(),
            DownloadPolicy::default(),
        );
        let player = Arc::new(FakePlayerBackend::new());
        let eligibility = Arc::new(EligibilityChecker::new(
            Arc::new(probe),
            DrmScheme::Widevine,
            PlaybackPolicy::default().secure_mime_types,
        ));
        let manager = PlaybackSessionManager::new(
            player.clone(),
            orchestrator.clone(),
            eligibility,
            None,
            bus,
            PlaybackPolicy::default(),
        );
        Self {
            orchestrator,
            backend,
            player,
            manager,
            events,
        }
    }

    async fn completed_download(&self, id: &str) {
        self.orchestrator
            .start_download(
                DownloadRequest::new(id, format!("https://cdn/{}.mpd", id), "Title", "1080p")
                    .with_license(vec![0xaa, 0xbb]),
            )
            .await
            .unwrap();
        self.orchestrator
            .apply_backend_transition(
                BackendTransition::new(id, DownloadState::Completed).with_bytes(100, 100),
                TransitionSource::Callback,
            )
            .await;
    }

    /// Let the signal pump and spawned timers catch up.
    async fn settle(&self) {
        sleep(Duration::from_millis(1)).await;
    }

    async fn start_playing(&self, id: &str) {
        self.completed_download(id).await;
        self.manager.attach_surface(SurfaceHandle(1)).await.unwrap();
        assert!(self.manager.play(id, Duration::ZERO).await.unwrap());
        self.player.signal(PlayerSignal::Ready);
        self.player.signal(PlayerSignal::IsPlayingChanged(true));
        self.settle().await;
    }

    fn drain(&mut self) -> Vec<PlaybackEvent> {
        let mut drained = Vec::new();
        while let Some(Ok(event)) = self.events.try_recv() {
            if let CoreEvent::Playback(event) = event {
                drained.push(event);
            }
        }
        drained
    }
}

#[tokio::test(start_paused = true)]
async fn surface_handshake_starts_exactly_once() {
    let harness = Harness::new(StaticDrmProbe::hardware_secure());
    harness.completed_download("m1").await;

    assert!(harness.manager.play("m1", Duration::from_millis(5000)).await.unwrap());
    let session = harness.manager.session().await;
    assert_eq!(session.state, SessionState::Idle);
    let pending = session.pending_start.expect("pending start");
    assert_eq!(pending.media_source.keyset_handle, Some(vec![0xaa, 0xbb]));
    assert!(pending.media_source.is_local_only());
    assert!(harness.player.calls().is_empty());

    harness.manager.attach_surface(SurfaceHandle(42)).await.unwrap();
    assert_eq!(harness.player.count(&PlayerCall::Prepare), 1);
    assert_eq!(
        harness.player.count(&PlayerCall::Seek(Duration::from_millis(5000))),
        1
    );

    harness.manager.attach_surface(SurfaceHandle(42)).await.unwrap();
    assert_eq!(harness.player.count(&PlayerCall::Prepare), 1);
}

#[tokio::test(start_paused = true)]
async fn incomplete_download_is_not_playable() {
    let mut harness = Harness::new(StaticDrmProbe::hardware_secure());
    harness
        .orchestrator
        .start_download(DownloadRequest::new("m1", "https://cdn/m1.mpd", "T", "720p"))
        .await
        .unwrap();

    assert!(!harness.manager.play("m1", Duration::ZERO).await.unwrap());
    let events = harness.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, PlaybackEventKind::Error);
    assert_eq!(events[0].message.as_deref(), Some("not downloaded"));
}

#[tokio::test(start_paused = true)]
async fn backend_source_keeps_its_own_keyset() {
    let harness = Harness::new(StaticDrmProbe::hardware_secure());
    harness.completed_download("m1").await;
    harness.backend.set_local_source(
        "m1",
        Some(
            MediaSource::local("m1", "file:///m1.mpd", PathBuf::from("/offline"))
                .with_keyset_handle(vec![9]),
        ),
    );

    harness.manager.play("m1", Duration::ZERO).await.unwrap();
    let pending = harness.manager.session().await.pending_start.unwrap();
    assert_eq!(pending.media_source.keyset_handle, Some(vec![9]));
}

#[tokio::test(start_paused = true)]
async fn blocked_video_fails_fast_with_eligibility_flag() {
    let mut harness = Harness::new(StaticDrmProbe::software_only());
    harness.start_playing("m1").await;
    harness.drain();

    // Audio keeps going, but no frame geometry ever arrives
    sleep(Duration::from_millis(2900)).await;
    assert_eq!(harness.manager.state().await, SessionState::Playing);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.manager.state().await, SessionState::Error);
    assert_eq!(harness.player.count(&PlayerCall::Stop), 1);

    let failure = harness
        .drain()
        .into_iter()
        .find(|event| event.kind == PlaybackEventKind::VideoNotRendering)
        .expect("videoNotRendering event");
    assert_eq!(failure.content_id.as_deref(), Some("m1"));
    assert_eq!(failure.device_ineligible, Some(true));
    assert_eq!(
        failure.message.as_deref(),
        Some("ineligible device: Device only supports software DRM (L3)")
    );

    // The failed source does not linger in the player
    harness.manager.stop().await.unwrap();
    assert_eq!(harness.player.count(&PlayerCall::ClearSource), 1);
}

#[tokio::test(start_paused = true)]
async fn blocked_video_on_eligible_device_is_not_flagged_ineligible() {
    let mut harness = Harness::new(StaticDrmProbe::hardware_secure());
    harness.start_playing("m1").await;

    sleep(Duration::from_secs(4)).await;
    let failure = harness
        .drain()
        .into_iter()
        .find(|event| event.kind == PlaybackEventKind::VideoNotRendering)
        .expect("videoNotRendering event");
    assert_eq!(failure.device_ineligible, Some(false));
    assert!(failure
        .message
        .as_deref()
        .is_some_and(|message| message.starts_with("video output blocked")));
}

#[tokio::test(start_paused = true)]
async fn rendered_frame_cancels_render_check() {
    let mut harness = Harness::new(StaticDrmProbe::software_only());
    harness.start_playing("m1").await;

    harness.player.signal(PlayerSignal::VideoSizeChanged { width: 0, height: 0 });
    harness.settle().await;
    harness.player.signal(PlayerSignal::VideoSizeChanged {
        width: 1920,
        height: 1080,
    });
    sleep(Duration::from_secs(5)).await;

    assert_eq!(harness.manager.state().await, SessionState::Playing);
    assert!(!harness
        .drain()
        .iter()
        .any(|event| event.kind == PlaybackEventKind::VideoNotRendering));
}

#[tokio::test(start_paused = true)]
async fn stop_discards_armed_render_check() {
    let mut harness = Harness::new(StaticDrmProbe::software_only());
    harness.start_playing("m1").await;

    sleep(Duration::from_millis(1000)).await;
    harness.manager.stop().await.unwrap();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(harness.manager.state().await, SessionState::Idle);
    assert!(!harness
        .drain()
        .iter()
        .any(|event| event.kind == PlaybackEventKind::VideoNotRendering));
}

#[tokio::test(start_paused = true)]
async fn replay_rearms_render_check_for_new_session() {
    let mut harness = Harness::new(StaticDrmProbe::software_only());
    harness.start_playing("m1").await;
    harness.completed_download("m2").await;

    // The first session's timer would fire at 3.0s
    sleep(Duration::from_millis(2000)).await;
    harness.manager.play("m2", Duration::ZERO).await.unwrap();
    harness.player.signal(PlayerSignal::Ready);
    harness.player.signal(PlayerSignal::IsPlayingChanged(true));
    harness.settle().await;
    harness.drain();

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(harness.manager.state().await, SessionState::Playing);

    sleep(Duration::from_millis(1600)).await;
    let failures: Vec<_> = harness
        .drain()
        .into_iter()
        .filter(|event| event.kind == PlaybackEventKind::VideoNotRendering)
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].content_id.as_deref(), Some("m2"));
}

#[tokio::test(start_paused = true)]
async fn position_events_while_playing() {
    let mut harness = Harness::new(StaticDrmProbe::hardware_secure());
    harness.start_playing("m1").await;
    harness.player.signal(PlayerSignal::VideoSizeChanged {
        width: 1280,
        height: 720,
    });
    harness.player.set_position(Duration::from_millis(2500));
    harness.player.set_duration(Some(Duration::from_secs(600)));
    harness.drain();

    sleep(Duration::from_millis(3100)).await;
    let positions: Vec<_> = harness
        .drain()
        .into_iter()
        .filter(|event| event.kind == PlaybackEventKind::Position)
        .collect();
    assert_eq!(positions.len(), 3);
    assert_eq!(positions[0].position_ms, Some(2500));
    assert_eq!(positions[0].duration_ms, Some(600_000));

    harness.manager.pause().await.unwrap();
    sleep(Duration::from_secs(3)).await;
    assert!(!harness
        .drain()
        .iter()
        .any(|event| event.kind == PlaybackEventKind::Position));
}

#[tokio::test(start_paused = true)]
async fn signals_reach_manager_through_channel() {
    let mut harness = Harness::new(StaticDrmProbe::hardware_secure());
    harness.start_playing("m1").await;
    harness.player.signal(PlayerSignal::Ended);
    harness.settle().await;

    assert_eq!(harness.manager.state().await, SessionState::Ended);
    let kinds: Vec<_> = harness.drain().into_iter().map(|event| event.kind).collect();
    assert_eq!(kinds, vec![PlaybackEventKind::Playing, PlaybackEventKind::Ended]);
}
