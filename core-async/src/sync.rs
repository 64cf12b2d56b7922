//! Synchronization primitives.
//!
//! All primitives are async-aware: holding a [`Mutex`] guard across an
//! `.await` never blocks an executor thread. This is what lets the download
//! orchestrator and the playback session keep a single serialization point
//! while still awaiting bridge calls.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::{mpsc, Mutex};
//!
//! # async fn example() {
//! let counter = Mutex::new(0u32);
//! *counter.lock().await += 1;
//!
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! tx.send("changed").unwrap();
//! assert_eq!(rx.recv().await, Some("changed"));
//! # }
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, RwLock, RwLockReadGuard,
    RwLockWriteGuard, Semaphore, SemaphorePermit,
};

pub use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};
