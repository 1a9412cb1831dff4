//! # Host Bridge Traits
//!
//! Contracts between the library reader core and the host platform.
//!
//! ## Overview
//!
//! The reader never talks to the operating system directly. Everything it
//! needs from the host is expressed as a trait in this crate and injected at
//! construction time, so the same core runs against the Android media index,
//! a desktop in-memory index, or a test double.
//!
//! ## Traits
//!
//! ### Media data
//! - [`MediaIndex`](media_index::MediaIndex) - Tabular audio/playlist index with change notifications
//! - [`PlaylistSerializer`](playlist::PlaylistSerializer) - Playlist file reading and writing
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Folder listing and file checks used for covers and playlists
//!
//! ### Platform integration
//! - [`PermissionProvider`](permissions::PermissionProvider) - Capability checks consulted before scanning
//! - [`LifecycleObserver`](background::LifecycleObserver) - App foreground/background transitions
//!
//! ### Utilities
//! - [`Clock`](clock::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](log::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! Missing required capabilities are reported when the core is configured,
//! not when the first scan runs:
//!
//! ```ignore
//! let media_index = builder.media_index
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "MediaIndex".to_string(),
//!         message: "No media index provided.".to_string(),
//!     })?;
//! ```
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! between the stage driver tasks.

pub mod background;
pub mod clock;
pub mod error;
pub mod log;
pub mod media_index;
pub mod permissions;
pub mod playlist;
pub mod storage;

pub use error::BridgeError;

pub use background::{LifecycleChangeStream, LifecycleObserver, LifecycleState};
pub use clock::{Clock, FixedClock, SystemClock};
pub use log::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use media_index::{
    ChangeNotification, ChangeObserver, MediaCollection, MediaIndex, MediaQuery, ObserverId,
    QueryRow, QueryValue,
};
pub use permissions::PermissionProvider;
pub use playlist::PlaylistSerializer;
pub use storage::FileSystemAccess;
