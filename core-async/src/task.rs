//! Task spawning and execution abstractions.
//!
//! Spawned tasks may run on any worker thread, so futures must be `Send`.
//! Long-lived loops in the core (backend change pumps, progress polling,
//! playback timers) are spawned here and stopped through a
//! [`CancellationToken`](crate::sync::CancellationToken) rather than by
//! aborting the handle.

pub use tokio::task::{spawn_blocking, yield_now, AbortHandle, JoinError, JoinHandle};

/// Spawns a new asynchronous task on the current runtime.
///
/// # Examples
///
/// ```rust
/// use core_async::task::spawn;
///
/// # async fn example() {
/// let handle = spawn(async { 42 });
/// assert_eq!(handle.await.unwrap(), 42);
/// # }
/// ```
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, JoinError>;
