//! Timer-driven behaviour of the progress reporter.
//!
//! All tests run with a paused Tokio clock: sleeps complete instantly once
//! every task is idle, so tick timing is deterministic.
//!
//! With the default policy the ticks fire at 0.5s, 1.5s, 2.5s, ... after a
//! download is started.

use bridge_traits::download::{BackendDownloadStatus, BackendState};
use bridge_traits::mock::{FakeDownloadBackend, InMemorySecureStore, InMemorySettingsStore, ManualClock};
use core_downloads::{
    DownloadOrchestrator, DownloadRequest, DownloadState, LicenseStore, MetadataStore,
};
use core_runtime::config::DownloadPolicy;
use core_runtime::events::EventBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn setup() -> (Arc<DownloadOrchestrator>, Arc<FakeDownloadBackend>) {
    let backend = Arc::new(FakeDownloadBackend::new());
    let orchestrator = DownloadOrchestrator::new(
        backend.clone(),
        MetadataStore::new(Arc::new(InMemorySettingsStore::new()), "u1"),
        LicenseStore::new(Arc::new(InMemorySecureStore::new()), "u1"),
        Arc::new(ManualClock::default()),
        EventBus::new(64),
        DownloadPolicy::default(),
    );
    (orchestrator, backend)
}

async fn start(orchestrator: &DownloadOrchestrator, id: &str) {
    orchestrator
        .start_download(DownloadRequest::new(id, format!("http://x/{}.m3u8", id), "T", "720p"))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn reporter_waits_five_idle_ticks_before_stopping() {
    let (orchestrator, backend) = setup();
    start(&orchestrator, "m1").await;
    backend.forget("m1");

    sleep(Duration::from_millis(4000)).await;
    let reporter = orchestrator.progress_reporter();
    assert_eq!(reporter.tick_count(), 4);
    assert!(reporter.is_running().await);

    sleep(Duration::from_millis(2000)).await;
    assert_eq!(reporter.tick_count(), 5);
    assert!(!reporter.is_running().await);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(reporter.tick_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn first_tick_is_delayed() {
    let (orchestrator, _backend) = setup();
    start(&orchestrator, "m1").await;

    sleep(Duration::from_millis(400)).await;
    assert_eq!(orchestrator.progress_reporter().tick_count(), 0);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(orchestrator.progress_reporter().tick_count(), 1);
    orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn polls_forward_progress_of_active_downloads() {
    let (orchestrator, backend) = setup();
    start(&orchestrator, "m1").await;
    backend.set_status(
        BackendDownloadStatus::new("m1", BackendState::Downloading).with_bytes(30, 100),
    );

    sleep(Duration::from_millis(600)).await;
    let record = orchestrator.get_state("m1").await.unwrap();
    assert_eq!(record.state, DownloadState::Downloading);
    assert_eq!(record.bytes_downloaded, 30);

    // Completion arrives through the callback; polls only see active items
    backend.emit(BackendDownloadStatus::new("m1", BackendState::Completed).with_bytes(100, 100));
    sleep(Duration::from_millis(1500)).await;
    assert!(orchestrator.is_downloaded("m1").await);

    // Idle ticks at 1.5s .. 5.5s
    sleep(Duration::from_millis(2900)).await;
    assert!(orchestrator.progress_reporter().is_running().await);
    sleep(Duration::from_millis(1000)).await;
    assert!(!orchestrator.progress_reporter().is_running().await);
}

#[tokio::test(start_paused = true)]
async fn failed_queries_do_not_count_as_idle() {
    let (orchestrator, backend) = setup();
    start(&orchestrator, "m1").await;
    backend.forget("m1");
    backend.set_fail_query(true);

    sleep(Duration::from_secs(10)).await;
    let reporter = orchestrator.progress_reporter();
    assert!(reporter.is_running().await);
    assert_eq!(reporter.idle_ticks(), 0);
    assert!(reporter.tick_count() >= 9);

    backend.set_fail_query(false);
    sleep(Duration::from_secs(6)).await;
    assert!(!reporter.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn ensure_running_resets_idle_counter() {
    let (orchestrator, backend) = setup();
    start(&orchestrator, "m1").await;
    backend.forget("m1");

    sleep(Duration::from_millis(3000)).await;
    let reporter = orchestrator.progress_reporter();
    assert_eq!(reporter.idle_ticks(), 3);

    let spawned = reporter
        .ensure_running(Arc::downgrade(&orchestrator), Duration::ZERO)
        .await;
    assert!(!spawned);
    assert_eq!(reporter.idle_ticks(), 0);

    // Without the reset the loop would have stopped at 4.5s
    sleep(Duration::from_millis(2000)).await;
    assert!(reporter.is_running().await);
    sleep(Duration::from_millis(3000)).await;
    assert!(!reporter.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn resume_restarts_dormant_reporter() {
    let (orchestrator, backend) = setup();
    start(&orchestrator, "m1").await;
    assert!(orchestrator.pause("m1").await.unwrap());

    // The paused item is not active, so the loop winds down
    sleep(Duration::from_secs(7)).await;
    let reporter = orchestrator.progress_reporter();
    assert!(!reporter.is_running().await);
    let ticks = reporter.tick_count();

    assert!(orchestrator.resume("m1").await.unwrap());
    assert!(reporter.is_running().await);
    backend.set_status(
        BackendDownloadStatus::new("m1", BackendState::Downloading).with_bytes(5, 10),
    );
    sleep(Duration::from_millis(600)).await;
    assert_eq!(reporter.tick_count(), ticks + 1);
    assert_eq!(orchestrator.get_state("m1").await.unwrap().bytes_downloaded, 5);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_the_loop() {
    let (orchestrator, _backend) = setup();
    start(&orchestrator, "m1").await;

    orchestrator.shutdown().await;
    assert!(!orchestrator.progress_reporter().is_running().await);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(orchestrator.progress_reporter().tick_count(), 0);
}
