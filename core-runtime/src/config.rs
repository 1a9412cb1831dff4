//! # Core Configuration Module
//!
//! Configuration for the library reader.
//!
//! ## Overview
//!
//! [`CoreConfigBuilder`] collects the host bridges, the initial filter
//! preferences and the per-collection load toggles, then validates them in
//! [`build()`](CoreConfigBuilder::build). Validation is fail-fast: a
//! missing capability or a contradictory combination of options is reported
//! here, not when the first scan runs.
//!
//! ## Required Dependencies
//!
//! - `MediaIndex` - the audio/playlist index the scanner reads
//! - `PermissionProvider` - consulted before every scan
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `FileSystemAccess` - folder cover lookup and playlist files (desktop default: tokio fs)
//! - `PlaylistSerializer` - M3U playlist files (desktop default: `M3uPlaylistSerializer`)
//! - `Clock` - "now" for the recently-added playlist (default: system clock)
//! - `LifecycleObserver` - foreground/background pause source
//! - `LoggerSink` - host log forwarding
//!
//! When the `desktop-shims` feature is enabled, desktop defaults for the
//! permission provider, filesystem and playlist serializer are injected
//! automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, LibraryPreferences};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .media_index(Arc::new(MyMediaIndex))
//!     .permissions(Arc::new(MyPermissions))
//!     .preferences(LibraryPreferences::default().with_min_song_length_secs(30))
//!     .build()?;
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use bridge_traits::{
    Clock, FileSystemAccess, LifecycleObserver, LoggerSink, MediaIndex, PermissionProvider,
    PlaylistSerializer, SystemClock,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;

/// Two weeks, in seconds.
pub const DEFAULT_RECENTLY_ADDED_FILTER_SECS: i64 = 1_209_600;

/// User-facing filter preferences. These are the initial values of the
/// reader's live settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryPreferences {
    /// Songs shorter than this are skipped. `0` keeps everything.
    pub min_song_length_secs: u64,
    /// Folder paths whose direct children are skipped.
    pub blacklisted_folders: BTreeSet<String>,
    /// `Some(true)` forces enhanced cover reading, `Some(false)` disables it,
    /// `None` enables it when the image permission allows.
    pub enhanced_covers: Option<bool>,
    /// Also match wav, ogg, aac and midi files that the index does not flag
    /// as music.
    pub include_extra_formats: bool,
    pub recently_added_filter_secs: i64,
}

impl Default for LibraryPreferences {
    fn default() -> Self {
        Self {
            min_song_length_secs: 0,
            blacklisted_folders: BTreeSet::new(),
            enhanced_covers: None,
            include_extra_formats: false,
            recently_added_filter_secs: DEFAULT_RECENTLY_ADDED_FILTER_SECS,
        }
    }
}

impl LibraryPreferences {
    pub fn with_min_song_length_secs(mut self, secs: u64) -> Self {
        self.min_song_length_secs = secs;
        self
    }

    pub fn with_blacklisted_folder(mut self, folder: impl Into<String>) -> Self {
        self.blacklisted_folders.insert(folder.into());
        self
    }

    pub fn with_enhanced_covers(mut self, enhanced: Option<bool>) -> Self {
        self.enhanced_covers = enhanced;
        self
    }

    pub fn with_extra_formats(mut self, include: bool) -> Self {
        self.include_extra_formats = include;
        self
    }

    pub fn with_recently_added_filter_secs(mut self, secs: i64) -> Self {
        self.recently_added_filter_secs = secs;
        self
    }
}

/// Which derived collections a scan builds. Disabled collections come back
/// empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadToggles {
    pub albums: bool,
    pub album_artists: bool,
    pub artists: bool,
    pub genres: bool,
    pub dates: bool,
    pub folders: bool,
    /// Touch the filesystem at all (folder covers, playlist files).
    pub filesystem: bool,
    /// Build the id and path lookup maps.
    pub id_maps: bool,
}

impl Default for LoadToggles {
    fn default() -> Self {
        Self {
            albums: true,
            album_artists: true,
            artists: true,
            genres: true,
            dates: true,
            folders: true,
            filesystem: true,
            id_maps: true,
        }
    }
}

impl LoadToggles {
    /// Songs only.
    pub fn songs_only() -> Self {
        Self {
            albums: false,
            album_artists: false,
            artists: false,
            genres: false,
            dates: false,
            folders: false,
            filesystem: false,
            id_maps: false,
        }
    }
}

/// Core configuration for the library reader.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    pub media_index: Arc<dyn MediaIndex>,
    pub permissions: Arc<dyn PermissionProvider>,
    pub file_system: Option<Arc<dyn FileSystemAccess>>,
    pub playlist_serializer: Option<Arc<dyn PlaylistSerializer>>,
    pub clock: Arc<dyn Clock>,
    pub lifecycle_observer: Option<Arc<dyn LifecycleObserver>>,
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    pub preferences: LibraryPreferences,
    pub load: LoadToggles,
    /// Scheme of cover stub URIs (`{scheme}://{album_id}{folder}`); `None`
    /// uses the index's per-album art URIs.
    pub cover_stub_scheme: Option<String>,
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("media_index", &"MediaIndex { ... }")
            .field("permissions", &"PermissionProvider { ... }")
            .field(
                "file_system",
                &self.file_system.as_ref().map(|_| "FileSystemAccess { ... }"),
            )
            .field(
                "playlist_serializer",
                &self
                    .playlist_serializer
                    .as_ref()
                    .map(|_| "PlaylistSerializer { ... }"),
            )
            .field(
                "lifecycle_observer",
                &self
                    .lifecycle_observer
                    .as_ref()
                    .map(|_| "LifecycleObserver { ... }"),
            )
            .field("preferences", &self.preferences)
            .field("load", &self.load)
            .field("cover_stub_scheme", &self.cover_stub_scheme)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Checks option combinations.
    ///
    /// - enhanced covers not explicitly disabled while filesystem loading is
    ///   off
    /// - filesystem loading on without a `FileSystemAccess`
    /// - an empty event buffer
    /// - a negative recently-added window
    pub fn validate(&self) -> Result<()> {
        if self.preferences.enhanced_covers != Some(false) && !self.load.filesystem {
            return Err(Error::Config(
                "Enhanced cover reading requires filesystem loading. \
                 Enable LoadToggles::filesystem or set enhanced covers to Some(false)."
                    .to_string(),
            ));
        }

        if self.load.filesystem && self.file_system.is_none() {
            return Err(Error::CapabilityMissing {
                capability: "FileSystemAccess".to_string(),
                message: "Filesystem loading is enabled but no FileSystemAccess was provided. \
                          Inject one or disable LoadToggles::filesystem."
                    .to_string(),
            });
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.preferences.recently_added_filter_secs < 0 {
            return Err(Error::Config(
                "Recently added filter cannot be negative".to_string(),
            ));
        }

        if matches!(self.cover_stub_scheme.as_deref(), Some("")) {
            return Err(Error::Config("Cover stub scheme cannot be empty".to_string()));
        }

        Ok(())
    }
}

fn media_index_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "MediaIndex".to_string(),
        message: "A MediaIndex is required to scan the library. \
                  Android: inject the MediaStore-backed index. \
                  Desktop: inject bridge_desktop::InMemoryMediaIndex or a custom index."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_permissions() -> Result<Arc<dyn PermissionProvider>> {
    Ok(Arc::new(bridge_desktop::StaticPermissions::granted()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_permissions() -> Result<Arc<dyn PermissionProvider>> {
    Err(Error::CapabilityMissing {
        capability: "PermissionProvider".to_string(),
        message: "A PermissionProvider is required so scans can report missing access \
                  instead of an empty library. \
                  Desktop: enable the 'desktop-shims' feature to use StaticPermissions."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Option<Arc<dyn FileSystemAccess>> {
    Some(Arc::new(bridge_desktop::TokioFileSystem::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Option<Arc<dyn FileSystemAccess>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn provide_default_playlist_serializer(
    file_system: Option<&Arc<dyn FileSystemAccess>>,
) -> Option<Arc<dyn PlaylistSerializer>> {
    file_system.map(|fs| {
        let serializer: Arc<dyn PlaylistSerializer> =
            Arc::new(bridge_desktop::M3uPlaylistSerializer::new(Arc::clone(fs)));
        serializer
    })
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_playlist_serializer(
    _file_system: Option<&Arc<dyn FileSystemAccess>>,
) -> Option<Arc<dyn PlaylistSerializer>> {
    None
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    media_index: Option<Arc<dyn MediaIndex>>,
    permissions: Option<Arc<dyn PermissionProvider>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    playlist_serializer: Option<Arc<dyn PlaylistSerializer>>,
    clock: Option<Arc<dyn Clock>>,
    lifecycle_observer: Option<Arc<dyn LifecycleObserver>>,
    logger_sink: Option<Arc<dyn LoggerSink>>,
    preferences: LibraryPreferences,
    load: LoadToggles,
    cover_stub_scheme: Option<String>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the media index (required).
    pub fn media_index(mut self, index: Arc<dyn MediaIndex>) -> Self {
        self.media_index = Some(index);
        self
    }

    /// Sets the permission provider (required without `desktop-shims`).
    pub fn permissions(mut self, permissions: Arc<dyn PermissionProvider>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn playlist_serializer(mut self, serializer: Arc<dyn PlaylistSerializer>) -> Self {
        self.playlist_serializer = Some(serializer);
        self
    }

    /// Time source for the recently-added playlist. Defaults to
    /// [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn lifecycle_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.lifecycle_observer = Some(observer);
        self
    }

    pub fn logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn preferences(mut self, preferences: LibraryPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn load_toggles(mut self, load: LoadToggles) -> Self {
        self.load = load;
        self
    }

    pub fn cover_stub_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.cover_stub_scheme = Some(scheme.into());
        self
    }

    /// Default: [`DEFAULT_EVENT_BUFFER_SIZE`].
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// Fails with [`Error::CapabilityMissing`] when a required bridge is
    /// absent and with [`Error::Config`] when options contradict each other.
    pub fn build(self) -> Result<CoreConfig> {
        let media_index = self.media_index.ok_or_else(media_index_missing_error)?;

        let permissions = match self.permissions {
            Some(permissions) => permissions,
            None => provide_default_permissions()?,
        };

        let file_system = if self.load.filesystem {
            self.file_system.or_else(provide_default_file_system)
        } else {
            self.file_system
        };

        let playlist_serializer = self
            .playlist_serializer
            .or_else(|| provide_default_playlist_serializer(file_system.as_ref()));

        let config = CoreConfig {
            media_index,
            permissions,
            file_system,
            playlist_serializer,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            lifecycle_observer: self.lifecycle_observer,
            logger_sink: self.logger_sink,
            preferences: self.preferences,
            load: self.load,
            cover_stub_scheme: self.cover_stub_scheme,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::media_index::{ChangeObserver, MediaCollection, MediaQuery, ObserverId, QueryRow};
    use std::path::{Path, PathBuf};

    struct EmptyIndex;

    #[async_trait]
    impl MediaIndex for EmptyIndex {
        async fn query(
            &self,
            _collection: MediaCollection,
            _query: &MediaQuery,
        ) -> BridgeResult<Vec<QueryRow>> {
            Ok(Vec::new())
        }

        fn register_observer(
            &self,
            _collection: MediaCollection,
            _notify_for_descendants: bool,
            _observer: Arc<dyn ChangeObserver>,
        ) -> BridgeResult<ObserverId> {
            Ok(ObserverId(1))
        }

        fn unregister_observer(&self, _id: ObserverId) {}
    }

    struct AllowAll;

    impl PermissionProvider for AllowAll {
        fn has_audio_permission(&self) -> bool {
            true
        }

        fn has_image_permission(&self) -> bool {
            true
        }
    }

    mockall::mock! {
        Fs {}

        #[async_trait]
        impl FileSystemAccess for Fs {
            async fn list_directory(&self, path: &Path) -> BridgeResult<Vec<PathBuf>>;
            async fn is_file(&self, path: &Path) -> bool;
            async fn read_to_string(&self, path: &Path) -> BridgeResult<String>;
            async fn write_string(&self, path: &Path, contents: &str) -> BridgeResult<()>;
        }
    }

    fn base_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .media_index(Arc::new(EmptyIndex))
            .permissions(Arc::new(AllowAll))
            .file_system(Arc::new(MockFs::new()))
    }

    #[test]
    fn test_builder_requires_media_index() {
        let err = CoreConfig::builder()
            .permissions(Arc::new(AllowAll))
            .build()
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("MediaIndex"));
        assert!(matches!(err, Error::CapabilityMissing { .. }));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_permissions_without_shims() {
        let err = CoreConfig::builder()
            .media_index(Arc::new(EmptyIndex))
            .file_system(Arc::new(MockFs::new()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("PermissionProvider"));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_defaults_fill_optional_bridges() {
        let config = CoreConfig::builder()
            .media_index(Arc::new(EmptyIndex))
            .build()
            .unwrap();

        assert!(config.file_system.is_some());
        assert!(config.playlist_serializer.is_some());
        assert!(config.permissions.has_audio_permission());
    }

    #[test]
    fn test_builder_defaults() {
        let config = base_builder().build().unwrap();

        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert_eq!(config.load, LoadToggles::default());
        assert_eq!(
            config.preferences.recently_added_filter_secs,
            DEFAULT_RECENTLY_ADDED_FILTER_SECS
        );
        assert!(config.cover_stub_scheme.is_none());
        assert!(config.clock.unix_timestamp() > 0);
    }

    #[test]
    fn test_enhanced_covers_without_filesystem_is_rejected() {
        let err = base_builder()
            .preferences(LibraryPreferences::default().with_enhanced_covers(Some(true)))
            .load_toggles(LoadToggles {
                filesystem: false,
                ..LoadToggles::default()
            })
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("Enhanced cover reading"));
    }

    #[test]
    fn test_unset_enhanced_covers_without_filesystem_is_rejected() {
        let err = CoreConfig::builder()
            .media_index(Arc::new(EmptyIndex))
            .permissions(Arc::new(AllowAll))
            .load_toggles(LoadToggles::songs_only())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_songs_only_with_covers_disabled() {
        let config = CoreConfig::builder()
            .media_index(Arc::new(EmptyIndex))
            .permissions(Arc::new(AllowAll))
            .preferences(LibraryPreferences::default().with_enhanced_covers(Some(false)))
            .load_toggles(LoadToggles::songs_only())
            .build()
            .unwrap();

        assert!(config.file_system.is_none());
        assert!(config.playlist_serializer.is_none());
    }

    #[test]
    fn test_zero_event_buffer_is_rejected() {
        let err = base_builder().event_buffer_size(0).build().unwrap_err();
        assert!(err.to_string().contains("Event buffer size"));
    }

    #[test]
    fn test_empty_cover_scheme_is_rejected() {
        assert!(base_builder().cover_stub_scheme("").build().is_err());
        let config = base_builder().cover_stub_scheme("cover").build().unwrap();
        assert_eq!(config.cover_stub_scheme.as_deref(), Some("cover"));
    }

    #[test]
    fn test_preferences_builder() {
        let preferences = LibraryPreferences::default()
            .with_min_song_length_secs(30)
            .with_blacklisted_folder("/storage/emulated/0/Ringtones")
            .with_extra_formats(true)
            .with_recently_added_filter_secs(3600);

        assert_eq!(preferences.min_song_length_secs, 30);
        assert!(preferences
            .blacklisted_folders
            .contains("/storage/emulated/0/Ringtones"));
        assert!(preferences.include_extra_formats);
        assert_eq!(preferences.recently_added_filter_secs, 3600);
    }

    #[test]
    fn test_config_is_cloneable_and_debuggable() {
        let config = base_builder().build().unwrap();
        let cloned = config.clone();
        assert_eq!(cloned.preferences, config.preferences);
        assert!(format!("{:?}", cloned).contains("MediaIndex { ... }"));
    }
}
