//! # Progress Reporter
//!
//! A single polling loop shared by all active downloads of one user. Each
//! tick enumerates the backend's current downloads and forwards every active
//! one to [`DownloadOrchestrator::apply_backend_transition`] as a
//! [`TransitionSource::Poll`] update.
//!
//! ## Lifecycle
//!
//! - Started by the orchestrator whenever a download becomes active.
//!   Starting an already running loop only resets its idle counter.
//! - The first tick waits `first_poll_delay` so the backend can register a
//!   freshly enqueued item; later ticks run every `poll_interval`.
//! - The loop exits after `idle_ticks_before_stop` consecutive ticks that saw
//!   no active download. A failed query is logged and counts as neither.

use crate::models::{BackendTransition, TransitionSource};
use crate::orchestrator::DownloadOrchestrator;
use bridge_traits::download::DownloadBackend;
use core_async::sync::{CancellationToken, Mutex};
use core_async::time::{sleep, Duration};
use core_runtime::config::DownloadPolicy;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

#[derive(Default)]
struct LoopControl {
    cancel: Option<CancellationToken>,
    generation: u64,
}

struct ReporterShared {
    backend: Arc<dyn DownloadBackend>,
    policy: DownloadPolicy,
    tick_count: AtomicU64,
    idle_ticks: AtomicU32,
    control: Mutex<LoopControl>,
}

pub struct ProgressReporter {
    shared: Arc<ReporterShared>,
}

impl ProgressReporter {
    pub fn new(backend: Arc<dyn DownloadBackend>, policy: DownloadPolicy) -> Self {
        Self {
            shared: Arc::new(ReporterShared {
                backend,
                policy,
                tick_count: AtomicU64::new(0),
                idle_ticks: AtomicU32::new(0),
                control: Mutex::new(LoopControl::default()),
            }),
        }
    }

    /// Start the loop unless it is already running.
    ///
    /// Returns `true` when a new loop was spawned. The loop holds only a weak
    /// reference to `target` and exits once the orchestrator is dropped.
    pub async fn ensure_running(
        &self,
        target: Weak<DownloadOrchestrator>,
        initial_delay: Duration,
    ) -> bool {
        let mut control = self.shared.control.lock().await;
        self.shared.idle_ticks.store(0, Ordering::SeqCst);

        if control.cancel.is_some() {
            debug!("Progress reporter already running");
            return false;
        }

        let cancel = CancellationToken::new();
        control.generation += 1;
        control.cancel = Some(cancel.clone());
        let generation = control.generation;

        core_async::spawn(run_loop(
            Arc::clone(&self.shared),
            target,
            cancel,
            generation,
            initial_delay,
        ));
        debug!(generation, "Progress reporter started");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.shared.control.lock().await.cancel.is_some()
    }

    /// Total ticks since construction, across loop restarts.
    pub fn tick_count(&self) -> u64 {
        self.shared.tick_count.load(Ordering::SeqCst)
    }

    /// Consecutive ticks that observed no active download.
    pub fn idle_ticks(&self) -> u32 {
        self.shared.idle_ticks.load(Ordering::SeqCst)
    }

    pub async fn shutdown(&self) {
        if let Some(cancel) = self.shared.control.lock().await.cancel.take() {
            cancel.cancel();
            debug!("Progress reporter cancelled");
        }
    }
}

async fn run_loop(
    shared: Arc<ReporterShared>,
    target: Weak<DownloadOrchestrator>,
    cancel: CancellationToken,
    generation: u64,
    initial_delay: Duration,
) {
    if !initial_delay.is_zero() {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(initial_delay) => {}
        }
    }

    loop {
        let Some(orchestrator) = target.upgrade() else {
            debug!("Orchestrator dropped, progress reporter exiting");
            return;
        };
        shared.tick(&orchestrator).await;
        drop(orchestrator);

        if shared.idle_limit_reached() {
            // Re-checked under the lock so a concurrent ensure_running either
            // resets the counter first or sees the loop gone
            let mut control = shared.control.lock().await;
            if shared.idle_limit_reached() && control.generation == generation {
                control.cancel = None;
                info!(
                    ticks = shared.tick_count.load(Ordering::SeqCst),
                    "No active downloads, progress reporter stopped"
                );
                return;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(shared.policy.poll_interval()) => {}
        }
    }
}

impl ReporterShared {
    fn idle_limit_reached(&self) -> bool {
        self.idle_ticks.load(Ordering::SeqCst) >= self.policy.idle_ticks_before_stop
    }

    async fn tick(&self, orchestrator: &DownloadOrchestrator) {
        match self.backend.query_current().await {
            Ok(statuses) => {
                let active: Vec<_> = statuses
                    .into_iter()
                    .filter(|status| status.state.is_active())
                    .collect();

                if active.is_empty() {
                    self.idle_ticks.fetch_add(1, Ordering::SeqCst);
                } else {
                    self.idle_ticks.store(0, Ordering::SeqCst);
                }

                for status in active {
                    orchestrator
                        .apply_backend_transition(
                            BackendTransition::from(status),
                            TransitionSource::Poll,
                        )
                        .await;
                }
            }
            Err(e) => {
                warn!(error = %e, "Progress poll failed, retrying next tick");
            }
        }
        self.tick_count.fetch_add(1, Ordering::SeqCst);
    }
}
