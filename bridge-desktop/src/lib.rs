//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop hosts and tests.
//!
//! ## Overview
//!
//! - `MediaIndex` as [`InMemoryMediaIndex`], a mutable table with real change
//!   notifications, filled through [`AudioRowBuilder`] and [`PlaylistRowBuilder`]
//! - `FileSystemAccess` using `tokio::fs`
//! - `PlaylistSerializer` for M3U/M3U8 files
//! - `PermissionProvider` as fixed answers
//! - `LifecycleObserver` driven by the host window (or by tests)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{AudioRowBuilder, InMemoryMediaIndex, TokioFileSystem};
//!
//! let index = InMemoryMediaIndex::new();
//! index.insert_audio(AudioRowBuilder::new(1, "Intro").path("/music/a/01.Intro.mp3").build());
//! ```

mod background;
mod filesystem;
mod media_index;
mod permissions;
mod playlist;
mod rows;

pub use background::DesktopLifecycleObserver;
pub use filesystem::TokioFileSystem;
pub use media_index::InMemoryMediaIndex;
pub use permissions::StaticPermissions;
pub use playlist::M3uPlaylistSerializer;
pub use rows::{AudioRowBuilder, PlaylistRowBuilder};
