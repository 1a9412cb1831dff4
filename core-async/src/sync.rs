//! Synchronization primitives.
//!
//! Tokio's async-aware primitives plus the `tokio-util` cancellation token
//! used for cooperative shutdown of stage drivers.

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, RwLock, RwLockReadGuard,
    RwLockWriteGuard, Semaphore,
};
pub use tokio_util::sync::{CancellationToken, DropGuard as CancellationDropGuard};
