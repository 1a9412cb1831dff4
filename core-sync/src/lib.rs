//! # Reader Module
//!
//! Turns the one-shot scanner into a reactive library.
//!
//! ## Overview
//!
//! This module keeps derived library collections up to date:
//! - Watching the media index for change pings
//! - Rescanning only while somebody observes, coalescing pings meanwhile
//! - Publishing every collection from one shared scan result
//! - Clearing replay caches when filters change
//! - Serving manual refreshes that wait for a fresh result
//!
//! ## Components
//!
//! - **Change Notifier** (`notifier`): Media index pings as a version counter
//! - **Scan Phase** (`phase`): Scan stage state machine with validated transitions
//! - **Reader Settings** (`settings`): Live, de-duplicated filter values
//! - **Lifecycle Pause** (`lifecycle`): Pause signal that follows the app lifecycle
//! - **Library Reader** (`reader`): The reactive facade
//! - **Simple Reader** (`simple`): One-shot reads without streams

pub mod error;
pub mod lifecycle;
pub mod notifier;
pub mod phase;
pub mod reader;
pub mod settings;
pub mod simple;

pub use error::{ReaderError, Result};
pub use lifecycle::LifecyclePause;
pub use notifier::ChangeNotifier;
pub use phase::{PhaseTracker, ScanPhase};
pub use reader::{LibraryReader, Playlists, ReaderDeps};
pub use settings::{ReaderSettings, ScanFilters};
pub use simple::{LibrarySnapshot, SimpleReader};
