//! # Event Bus System
//!
//! Event-driven plumbing for the offline media core using
//! `tokio::sync::broadcast`. The download orchestrator and the playback session
//! manager publish typed events; the service layer fans them out to the host
//! `EventSink`, and any number of in-process subscribers may listen too.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    emit     ┌───────────┐
//! │ Orchestrator ├────────────>│           │   subscribe   ┌────────────┐
//! └──────────────┘             │ EventBus  ├──────────────>│ Host sink  │
//! ┌──────────────┐    emit     │ (broadcast│               └────────────┘
//! │ Player Mgr   ├────────────>│  channel) ├──────────────>  Subscriber
//! └──────────────┘             └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DownloadEvent, DownloadEventKind, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut stream = bus.subscribe();
//!
//! bus.emit(CoreEvent::Download(DownloadEvent::new(
//!     DownloadEventKind::Queued,
//!     "movie-1",
//! )))
//! .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.content_id(), Some("movie-1"));
//! # }
//! ```
//!
//! ## Wire format
//!
//! [`CoreEvent::to_host_payload`] yields the camelCase JSON the host listener
//! expects, for example
//! `{"contentId":"movie-1","type":"progress","progress":0.5,"downloadedBytes":50,"totalBytes":100}`.
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events. Progress is
//!   level-triggered, so the next tick re-reports current state.
//! - **`RecvError::Closed`**: all senders were dropped; treat as shutdown.

use bridge_traits::host::EventChannel;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Download(DownloadEvent),
    Playback(PlaybackEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Download(e) => e.kind.description(),
            CoreEvent::Playback(e) => e.kind.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Download(e) => match e.kind {
                DownloadEventKind::Failed => EventSeverity::Error,
                DownloadEventKind::Completed => EventSeverity::Info,
                DownloadEventKind::Progress => EventSeverity::Debug,
                _ => EventSeverity::Info,
            },
            CoreEvent::Playback(e) => match e.kind {
                PlaybackEventKind::Error => EventSeverity::Error,
                PlaybackEventKind::VideoNotRendering => EventSeverity::Warning,
                PlaybackEventKind::Position | PlaybackEventKind::Buffering => EventSeverity::Debug,
                _ => EventSeverity::Info,
            },
        }
    }

    /// Host listener this event is delivered to.
    pub fn channel(&self) -> EventChannel {
        match self {
            CoreEvent::Download(_) => EventChannel::DownloadProgress,
            CoreEvent::Playback(_) => EventChannel::Playback,
        }
    }

    pub fn content_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Download(e) => Some(&e.content_id),
            CoreEvent::Playback(e) => e.content_id.as_deref(),
        }
    }

    /// The inner event serialized in the host's camelCase layout.
    pub fn to_host_payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            CoreEvent::Download(e) => serde_json::to_value(e),
            CoreEvent::Playback(e) => serde_json::to_value(e),
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Download Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DownloadEventKind {
    Preparing,
    Queued,
    Progress,
    Completed,
    Failed,
    Paused,
    Resumed,
}

impl DownloadEventKind {
    fn description(&self) -> &'static str {
        match self {
            DownloadEventKind::Preparing => "Download preparing",
            DownloadEventKind::Queued => "Download queued",
            DownloadEventKind::Progress => "Download progress",
            DownloadEventKind::Completed => "Download completed",
            DownloadEventKind::Failed => "Download failed",
            DownloadEventKind::Paused => "Download paused",
            DownloadEventKind::Resumed => "Download resumed",
        }
    }
}

/// Per-item download event.
///
/// `progress` is `downloaded_bytes / total_bytes`, `0.0` while the total is
/// unknown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadEvent {
    pub content_id: String,
    #[serde(rename = "type")]
    pub kind: DownloadEventKind,
    pub progress: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DownloadEvent {
    pub fn new(kind: DownloadEventKind, content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            kind,
            progress: 0.0,
            downloaded_bytes: 0,
            total_bytes: 0,
            message: None,
        }
    }

    pub fn with_bytes(mut self, downloaded: u64, total: u64, progress: f64) -> Self {
        self.downloaded_bytes = downloaded;
        self.total_bytes = total;
        self.progress = progress;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ============================================================================
// Playback Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackEventKind {
    Playing,
    Paused,
    Buffering,
    Position,
    Ended,
    Error,
    VideoNotRendering,
    Dismissed,
}

impl PlaybackEventKind {
    fn description(&self) -> &'static str {
        match self {
            PlaybackEventKind::Playing => "Playback started",
            PlaybackEventKind::Paused => "Playback paused",
            PlaybackEventKind::Buffering => "Playback buffering",
            PlaybackEventKind::Position => "Playback position changed",
            PlaybackEventKind::Ended => "Playback ended",
            PlaybackEventKind::Error => "Playback error",
            PlaybackEventKind::VideoNotRendering => "Video not rendering",
            PlaybackEventKind::Dismissed => "Player dismissed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackEvent {
    #[serde(rename = "type")]
    pub kind: PlaybackEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_drm_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_ineligible: Option<bool>,
}

impl PlaybackEvent {
    pub fn new(kind: PlaybackEventKind, content_id: Option<String>) -> Self {
        Self {
            kind,
            content_id,
            position_ms: None,
            duration_ms: None,
            message: None,
            is_drm_error: None,
            device_ineligible: None,
        }
    }

    pub fn with_position(mut self, position_ms: u64, duration_ms: Option<u64>) -> Self {
        self.position_ms = Some(position_ms);
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn error(content_id: Option<String>, message: impl Into<String>, is_drm_error: bool) -> Self {
        let mut event = Self::new(PlaybackEventKind::Error, content_id).with_message(message);
        event.is_drm_error = Some(is_drm_error);
        event
    }

    pub fn video_not_rendering(
        content_id: Option<String>,
        device_ineligible: bool,
        message: impl Into<String>,
    ) -> Self {
        let mut event =
            Self::new(PlaybackEventKind::VideoNotRendering, content_id).with_message(message);
        event.device_ineligible = Some(device_ineligible);
        event
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning shares the underlying channel. Sends never block; slow subscribers
/// get `RecvError::Lagged` instead of holding up the orchestrator.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when nobody is listening. Callers treat that error as a dropped event.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(100);
/// let downloads_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Download(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events that match `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
