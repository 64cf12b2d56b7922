//! Executor access for callers that are not already async.

use std::future::Future;
use std::io;

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Runs `future` to completion on a throwaway current-thread runtime.
///
/// Used from synchronous hooks such as tracing layers when no runtime is
/// active. Must not be called from inside a runtime.
pub fn block_on<F: Future>(future: F) -> io::Result<F::Output> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}

/// Returns the current runtime handle, if the caller runs inside one.
pub fn current() -> Option<Handle> {
    Handle::try_current().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_on_outside_runtime() {
        assert_eq!(block_on(async { 7 }).unwrap(), 7);
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn current_inside_runtime() {
        assert!(current().is_some());
    }
}
