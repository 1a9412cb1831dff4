//! Async runtime facade and stream primitives for the library reader.
//!
//! Every other workspace crate goes through this crate instead of depending on
//! tokio directly. On top of the runtime re-exports it provides the [`flow`]
//! module: the building blocks the reader pipeline is assembled from.
//!
//! # Modules
//!
//! - `task`: task spawning, blocking offload and abort-on-drop guards
//! - `time`: sleep, timeouts and instants
//! - `sync`: channels, locks and cancellation tokens
//! - `flow`: pause signals, pause-aware coalescing, latest-wins mapping,
//!   replay-1 stages and replay-cache invalidation
//!
//! # Examples
//!
//! ```rust
//! use core_async::flow::{conflate_when_paused, ManualPauseManager, PauseManager};
//! use futures::{stream, StreamExt};
//!
//! # async fn example() {
//! let pause = ManualPauseManager::new(false);
//! let mut coalesced = conflate_when_paused(stream::iter(vec![1, 2, 3]), pause.is_paused());
//! while let Some(value) = coalesced.next().await {
//!     println!("{value}");
//! }
//! # }
//! ```

pub mod error;
pub mod flow;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use error::{FlowError, Result};
pub use task::spawn;
pub use time::{sleep, Duration, Instant};
