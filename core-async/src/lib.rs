//! Runtime abstraction layer for the offline media core.
//!
//! Core crates spawn tasks, sleep, and lock through this crate rather than
//! naming Tokio in their public APIs. The download pump, the progress poller
//! and the playback timers all run on whatever Tokio runtime the host drives.
//!
//! # Modules
//!
//! - `task`: Task spawning and join handles
//! - `time`: Sleep, intervals, timeouts and wall-clock helpers
//! - `sync`: Async mutexes, channels and cooperative cancellation
//! - `runtime`: Handle lookup and a blocking bridge for synchronous hooks
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::CancellationToken;
//! use core_async::time::{sleep, Duration};
//!
//! # async fn example() {
//! let token = CancellationToken::new();
//! let child = token.child_token();
//!
//! let handle = core_async::spawn(async move {
//!     tokio::select! {
//!         _ = child.cancelled() => "cancelled",
//!         _ = sleep(Duration::from_secs(3)) => "fired",
//!     }
//! });
//!
//! token.cancel();
//! assert_eq!(handle.await.unwrap(), "cancelled");
//! # }
//! ```

pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};
