//! Time-related re-exports.

pub use std::time::Duration;
pub use tokio::time::{sleep, sleep_until, timeout, Instant, Sleep, Timeout};

/// Error returned when a [`timeout`] elapses.
pub use tokio::time::error::Elapsed as TimeoutError;
