//! Task spawning.
//!
//! Thin wrappers over the tokio task API plus [`AbortOnDrop`], the guard the
//! flow primitives use to tie a background producer to the lifetime of its
//! consumer.

use std::future::Future;

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
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

/// Aborts the wrapped task when dropped.
///
/// Background producers spawned on behalf of a stream or stage are owned by
/// one of these, so dropping the consumer cancels the producer at its next
/// suspension point.
#[derive(Debug)]
pub struct AbortOnDrop {
    handle: AbortHandle,
}

impl AbortOnDrop {
    pub fn new<T>(handle: JoinHandle<T>) -> Self {
        Self {
            handle: handle.abort_handle(),
        }
    }

    /// Spawns `future` and returns a guard owning it.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::new(spawn(future))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, JoinError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_abort_on_drop_cancels_task() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let guard = AbortOnDrop::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });
        drop(guard);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawn_blocking_returns_value() {
        let value = spawn_blocking(|| (1..=10).sum::<i32>()).await.unwrap();
        assert_eq!(value, 55);
    }
}
