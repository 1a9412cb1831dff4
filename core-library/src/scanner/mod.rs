//! # Bulk Scanner
//!
//! Reads every audio row from the media index and folds it into one
//! [`ScanResult`].
//!
//! ## Pass structure
//!
//! 1. One query, ordered by title.
//! 2. Per row: track inference, skip decision, id/path map registration (for
//!    skipped rows too, so playlists can still reference them) and folding
//!    into the album, artist, genre, date and folder accumulators.
//! 3. Post-pass per album: album artist vote, cover resolution and the
//!    disc/track sort, the latter fanned out over rayon in chunks of
//!    [`ALBUM_SORT_CHUNK`].
//!
//! All accumulators live in a `ScanBuilder` owned by one `scan` call and
//! are frozen into `Arc`s when it finishes.

pub mod album_artist;
pub mod cover;
pub(crate) mod folders;
pub(crate) mod row;
pub(crate) mod track;

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::{
    media_index::{columns, MediaCollection, MediaIndex, MediaQuery},
    permissions::PermissionProvider,
    storage::FileSystemAccess,
};
use chrono::{DateTime, Utc};
use core_async::time::{Duration, Instant};
use core_runtime::config::{LibraryPreferences, LoadToggles};
use rayon::prelude::*;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{LibraryError, Result};
use crate::models::{
    Album, AlbumId, Artist, ArtistId, Date, Genre, ScanResult, ScanStats, Song,
    SongExtras, SongId,
};
use album_artist::find_best_album_artist;
use folders::FolderTrees;
use row::Row;
use track::RawPosition;

/// Albums sorted per rayon task.
pub const ALBUM_SORT_CHUNK: usize = 100;

/// MIME types added to the selection when extra formats are included.
pub const EXTRA_FORMATS: &[&str] = &["audio/x-wav", "audio/ogg", "audio/aac", "audio/midi"];

pub const SORT_ORDER: &str = "title COLLATE UNICODE ASC";

const BASE_PROJECTION: &[&str] = &[
    columns::ID,
    columns::ARTIST,
    columns::ALBUM,
    columns::ALBUM_ARTIST,
    columns::DATA,
    columns::YEAR,
    columns::ALBUM_ID,
    columns::MIME_TYPE,
    columns::TRACK,
    columns::TITLE,
    columns::ARTIST_ID,
    columns::DURATION,
    columns::DATE_ADDED,
    columns::DATE_MODIFIED,
    columns::COMPOSER,
    columns::COMPILATION,
];

const EXTENDED_PROJECTION: &[&str] = &[
    columns::DISC_NUMBER,
    columns::CD_TRACK_NUMBER,
    columns::GENRE,
    columns::WRITER,
    columns::AUTHOR,
    columns::IS_FAVORITE,
    columns::DATE_TAKEN,
];

/// Content identifier of one audio row.
pub fn song_content_uri(id: SongId) -> String {
    format!("{}/{id}", MediaCollection::Audio.content_uri())
}

/// Embedded art identifier of one audio row.
pub fn song_artwork_uri(id: SongId) -> String {
    format!("{}/{id}/albumart", MediaCollection::Audio.content_uri())
}

// =============================================================================
// Options
// =============================================================================

/// Filters and toggles for one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub min_song_length_secs: u64,
    pub blacklisted_folders: BTreeSet<String>,
    /// `Some(true)` demands folder covers, `None` uses them when possible
    pub enhanced_covers: Option<bool>,
    pub include_extra_formats: bool,
    pub load: LoadToggles,
    /// Emit `{scheme}://{album}{folder}` stubs instead of listing folders
    pub cover_stub_scheme: Option<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from_preferences(&LibraryPreferences::default(), LoadToggles::default(), None)
    }
}

impl ScanOptions {
    pub fn from_preferences(
        preferences: &LibraryPreferences,
        load: LoadToggles,
        cover_stub_scheme: Option<String>,
    ) -> Self {
        Self {
            min_song_length_secs: preferences.min_song_length_secs,
            blacklisted_folders: preferences.blacklisted_folders.clone(),
            enhanced_covers: preferences.enhanced_covers,
            include_extra_formats: preferences.include_extra_formats,
            load,
            cover_stub_scheme,
        }
    }

    /// Folder covers need the folder tree, which needs filesystem loading.
    pub fn validate(&self) -> Result<()> {
        if !self.load.filesystem && self.enhanced_covers != Some(false) {
            return Err(LibraryError::ConfigurationMisuse(
                "Folder covers need filesystem loading; disable enhanced covers explicitly"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn selection(&self) -> String {
        let mut selection = format!("{} != 0", columns::IS_MUSIC);
        if self.include_extra_formats {
            for mime_type in EXTRA_FORMATS {
                selection.push_str(&format!(" or {} = '{mime_type}'", columns::MIME_TYPE));
            }
        }
        selection
    }
}

// =============================================================================
// Scanner
// =============================================================================

/// Bulk scanner over one media index.
///
/// Each call to [`scan`](Self::scan) is independent and read-only. Callers
/// serialize calls made on behalf of the same consumer.
#[derive(Clone)]
pub struct Scanner {
    index: Arc<dyn MediaIndex>,
    permissions: Arc<dyn PermissionProvider>,
    fs: Option<Arc<dyn FileSystemAccess>>,
}

impl Scanner {
    pub fn new(index: Arc<dyn MediaIndex>, permissions: Arc<dyn PermissionProvider>) -> Self {
        Self {
            index,
            permissions,
            fs: None,
        }
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn index(&self) -> &Arc<dyn MediaIndex> {
        &self.index
    }

    pub fn permissions(&self) -> &Arc<dyn PermissionProvider> {
        &self.permissions
    }

    pub fn file_system(&self) -> Option<&Arc<dyn FileSystemAccess>> {
        self.fs.as_ref()
    }

    /// The audio query a scan with `options` issues.
    pub fn audio_query(&self, options: &ScanOptions) -> MediaQuery {
        let mut projection: Vec<&str> = BASE_PROJECTION.to_vec();
        if self.index.has_extended_columns() {
            projection.extend_from_slice(EXTENDED_PROJECTION);
        }
        MediaQuery::new(projection)
            .with_selection(options.selection())
            .with_sort_order(SORT_ORDER)
    }

    /// Whether folder covers are looked up for this scan.
    ///
    /// Split media permissions make folder listing depend on the image
    /// permission: without it an explicit request is an error and an unset
    /// preference quietly falls back to generic covers.
    fn resolve_enhanced_covers(&self, options: &ScanOptions) -> Result<bool> {
        if self.permissions.uses_scoped_media_permissions()
            && !self.permissions.has_image_permission()
        {
            return match options.enhanced_covers {
                Some(true) => Err(LibraryError::PermissionDenied(
                    "Folder covers need the image permission".to_string(),
                )),
                _ => Ok(false),
            };
        }
        Ok(options.enhanced_covers != Some(false))
    }

    /// Runs one full scan.
    ///
    /// Fails with `PermissionDenied` before querying when audio access is
    /// missing, and with `ConfigurationMisuse` for contradictory options.
    #[instrument(skip_all, fields(extra_formats = options.include_extra_formats))]
    pub async fn scan(&self, options: &ScanOptions) -> Result<ScanResult> {
        let started = Instant::now();
        options.validate()?;

        if !self.permissions.has_audio_permission() {
            return Err(LibraryError::PermissionDenied(
                "Reading the media index needs the audio permission".to_string(),
            ));
        }
        let enhanced_covers = self.resolve_enhanced_covers(options)?;
        if options.load.filesystem && self.fs.is_none() {
            return Err(LibraryError::ConfigurationMisuse(
                "Filesystem loading is enabled but no FileSystemAccess was provided".to_string(),
            ));
        }

        let rows = self
            .index
            .query(MediaCollection::Audio, &self.audio_query(options))
            .await?;
        debug!(rows = rows.len(), enhanced_covers, "Fetched audio rows");

        let mut builder = ScanBuilder::new(options);
        for row in &rows {
            builder.add_row(Row::new(row, "audio"))?;
        }

        let covers = CoverMode::new(enhanced_covers, options, self.fs.as_deref());
        let mut result = builder.finish(covers).await?;
        result.stats.rows = rows.len();
        result.stats.enhanced_covers = enhanced_covers;
        result.stats.elapsed_ms = saturating_millis(started.elapsed());

        info!(
            songs = result.songs.len(),
            albums = result.albums.len(),
            artists = result.artists.len(),
            skipped = result.stats.skipped,
            elapsed_ms = result.stats.elapsed_ms,
            "Scan finished"
        );
        Ok(result)
    }
}

// =============================================================================
// Accumulation
// =============================================================================

/// Insertion-ordered grouping.
struct Grouped<K, V> {
    positions: HashMap<K, usize>,
    items: Vec<V>,
}

impl<K: Hash + Eq, V> Grouped<K, V> {
    fn new() -> Self {
        Self {
            positions: HashMap::new(),
            items: Vec::new(),
        }
    }

    fn entry(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        let items = &mut self.items;
        let position = *self.positions.entry(key).or_insert_with(|| {
            items.push(make());
            items.len() - 1
        });
        &mut self.items[position]
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let position = *self.positions.get(key)?;
        self.items.get_mut(position)
    }
}

struct AlbumDraft {
    id: Option<AlbumId>,
    title: Option<String>,
    year: Option<i32>,
    date_added: Option<i64>,
    date_modified: Option<i64>,
    songs: Vec<Arc<Song>>,
}

impl AlbumDraft {
    fn new(song: &Song) -> Self {
        Self {
            id: song.album_id,
            title: song.album.clone(),
            year: None,
            date_added: None,
            date_modified: None,
            songs: Vec::new(),
        }
    }

    fn add(&mut self, song: Arc<Song>) {
        self.year = self.year.max(song.year);
        self.date_added = min_present(self.date_added, song.date_added);
        self.date_modified = self.date_modified.max(song.date_modified);
        self.songs.push(song);
    }
}

fn saturating_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn min_present(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

struct ArtistDraft {
    id: Option<ArtistId>,
    name: Option<String>,
    songs: Vec<Arc<Song>>,
    albums: Vec<Arc<Album>>,
}

impl ArtistDraft {
    fn new(id: Option<ArtistId>, name: Option<String>) -> Self {
        Self {
            id,
            name,
            songs: Vec::new(),
            albums: Vec::new(),
        }
    }

    fn freeze(self) -> Arc<Artist> {
        Arc::new(Artist {
            id: self.id,
            name: self.name,
            songs: self.songs,
            albums: self.albums,
        })
    }
}

/// Album artists are grouped by id when one resolved, by name otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum AlbumArtistKey {
    Id(ArtistId),
    Name(Option<String>),
}

/// How album covers are assigned in the post-pass.
enum CoverMode<'a> {
    Generic,
    Stub(&'a str),
    Folder(&'a dyn FileSystemAccess),
}

impl<'a> CoverMode<'a> {
    fn new(
        enhanced: bool,
        options: &'a ScanOptions,
        fs: Option<&'a dyn FileSystemAccess>,
    ) -> Self {
        match (enhanced, options.cover_stub_scheme.as_deref(), fs) {
            (false, _, _) => CoverMode::Generic,
            (true, Some(scheme), _) => CoverMode::Stub(scheme),
            (true, None, Some(fs)) => CoverMode::Folder(fs),
            (true, None, None) => CoverMode::Generic,
        }
    }
}

/// Scan-local accumulators. Nothing here escapes half-built.
struct ScanBuilder<'a> {
    options: &'a ScanOptions,
    songs: Vec<Arc<Song>>,
    id_map: HashMap<SongId, Arc<Song>>,
    path_map: HashMap<PathBuf, Arc<Song>>,
    albums: Grouped<Option<AlbumId>, AlbumDraft>,
    artists: Grouped<Option<ArtistId>, ArtistDraft>,
    /// First artist id seen per artist name
    artist_cache: HashMap<String, ArtistId>,
    genres: Grouped<Option<String>, Genre>,
    dates: Grouped<Option<i32>, Date>,
    trees: FolderTrees,
    skipped: usize,
}

impl<'a> ScanBuilder<'a> {
    fn new(options: &'a ScanOptions) -> Self {
        Self {
            options,
            songs: Vec::new(),
            id_map: HashMap::new(),
            path_map: HashMap::new(),
            albums: Grouped::new(),
            artists: Grouped::new(),
            artist_cache: HashMap::new(),
            genres: Grouped::new(),
            dates: Grouped::new(),
            trees: FolderTrees::new(),
            skipped: 0,
        }
    }

    fn load(&self) -> &LoadToggles {
        &self.options.load
    }

    fn is_too_short(&self, duration_ms: Option<i64>) -> bool {
        let min_ms = i64::try_from(self.options.min_song_length_secs.saturating_mul(1000))
            .unwrap_or(i64::MAX);
        duration_ms.is_some_and(|duration| duration != 0 && duration < min_ms)
    }

    fn add_row(&mut self, row: Row<'_>) -> Result<()> {
        let id = SongId(row.required_int(columns::ID)?);
        let path = row.non_empty(columns::DATA).map(PathBuf::from);
        let folder = path.as_deref().and_then(Path::parent).map(Path::to_path_buf);
        let file_name = path
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str());

        let duration_ms = row.int(columns::DURATION);
        let blacklisted = folder.as_deref().is_some_and(|folder| {
            self.options
                .blacklisted_folders
                .contains(&folder.display().to_string())
        });
        let skip = self.is_too_short(duration_ms) || folder.is_none() || blacklisted;

        let artist = row.tag(columns::ARTIST);
        let has_no_metadata = artist.is_none();
        let title = row.text(columns::TITLE).unwrap_or_else(|| {
            path.as_deref()
                .and_then(Path::file_stem)
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

        let position = track::resolve(RawPosition {
            track: row.int32(columns::TRACK),
            disc: row.int32(columns::DISC_NUMBER),
            cd_track_number: row.text(columns::CD_TRACK_NUMBER),
            file_name,
            title: &title,
            has_no_metadata,
        });

        let song = Arc::new(Song {
            id,
            content_uri: song_content_uri(id),
            artwork_uri: song_artwork_uri(id),
            title,
            artist,
            artist_id: row.int(columns::ARTIST_ID).map(ArtistId),
            album: row.tag(columns::ALBUM),
            album_id: row.int(columns::ALBUM_ID).map(AlbumId),
            album_artist: row.tag(columns::ALBUM_ARTIST),
            genre: row.text(columns::GENRE),
            track_number: position.track,
            disc_number: position.disc,
            year: row.int32(columns::YEAR).filter(|year| *year != 0),
            recorded_at: row
                .int(columns::DATE_TAKEN)
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            duration_ms,
            favorite: match row.int(columns::IS_FAVORITE) {
                Some(1) => Some(true),
                Some(0) => Some(false),
                _ => None,
            },
            mime_type: row.text(columns::MIME_TYPE).unwrap_or_default(),
            date_added: row.int(columns::DATE_ADDED),
            date_modified: row.int(columns::DATE_MODIFIED),
            has_no_metadata,
            extras: SongExtras {
                composer: row.text(columns::COMPOSER),
                writer: row.text(columns::WRITER),
                author: row.text(columns::AUTHOR),
                compilation: row.text(columns::COMPILATION),
                cd_track_number: position.cd_track_number,
            },
            path,
        });

        if self.load().id_maps {
            self.id_map.insert(id, song.clone());
            if let Some(path) = &song.path {
                self.path_map.insert(path.clone(), song.clone());
            }
        }

        let Some(folder) = folder.filter(|_| !skip) else {
            self.skipped += 1;
            return Ok(());
        };
        self.fold(song, &folder);
        Ok(())
    }

    fn fold(&mut self, song: Arc<Song>, folder: &Path) {
        let load = *self.load();

        if load.albums || load.album_artists {
            self.albums
                .entry(song.album_id, || AlbumDraft::new(&song))
                .add(song.clone());
        }

        if load.artists || load.album_artists {
            self.artists
                .entry(song.artist_id, || {
                    ArtistDraft::new(song.artist_id, song.artist.clone())
                })
                .songs
                .push(song.clone());
            if let (Some(name), Some(id)) = (&song.artist, song.artist_id) {
                self.artist_cache.entry(name.clone()).or_insert(id);
            }
        }

        if load.genres {
            self.genres
                .entry(song.genre.clone(), || Genre {
                    name: song.genre.clone(),
                    songs: Vec::new(),
                })
                .songs
                .push(song.clone());
        }

        if load.dates {
            self.dates
                .entry(song.year, || Date {
                    year: song.year,
                    songs: Vec::new(),
                })
                .songs
                .push(song.clone());
        }

        if load.filesystem {
            self.trees.add_to_tree(&song, folder);
        }
        if load.folders {
            self.trees.add_to_shallow(&song, folder);
            self.trees.add_folder(folder);
        }

        self.songs.push(song);
    }

    async fn resolve_cover(&self, album_id: Option<AlbumId>, covers: &CoverMode<'_>) -> Option<String> {
        let album_id = album_id?;
        let folder = match covers {
            CoverMode::Generic => None,
            _ => self.trees.single_album_folder(album_id),
        };
        let resolved = match (covers, folder) {
            (CoverMode::Stub(scheme), Some(folder)) => {
                Some(cover::cover_stub_uri(scheme, album_id, folder))
            }
            (CoverMode::Folder(fs), Some(folder)) => cover::find_best_cover(*fs, folder)
                .await
                .map(|path| cover::file_uri(&path)),
            _ => None,
        };
        Some(resolved.unwrap_or_else(|| cover::album_art_uri(album_id)))
    }

    async fn finish(mut self, covers: CoverMode<'_>) -> Result<ScanResult> {
        let load = *self.load();

        let mut drafts = std::mem::take(&mut self.albums.items);
        drafts = core_async::task::spawn_blocking(move || {
            drafts.par_chunks_mut(ALBUM_SORT_CHUNK).for_each(|chunk| {
                for draft in chunk {
                    draft.songs.sort_by_key(|song| song.sort_key());
                }
            });
            drafts
        })
        .await
        .map_err(|e| LibraryError::Internal(format!("Album sort failed: {e}")))?;

        let mut albums = Vec::with_capacity(drafts.len());
        let mut album_artists: Grouped<AlbumArtistKey, ArtistDraft> = Grouped::new();
        for draft in drafts {
            let resolved = find_best_album_artist(&draft.songs);
            let (artist_name, artist_id) = match resolved {
                Some(artist) => {
                    let id = artist
                        .id
                        .or_else(|| self.artist_cache.get(&artist.name).copied());
                    (Some(artist.name), id)
                }
                None => (None, None),
            };
            let cover_uri = self.resolve_cover(draft.id, &covers).await;

            let album = Arc::new(Album {
                id: draft.id,
                title: draft.title,
                album_artist: artist_name.clone(),
                album_artist_id: artist_id,
                year: draft.year,
                cover_uri,
                date_added: draft.date_added,
                date_modified: draft.date_modified,
                songs: draft.songs,
            });

            if load.album_artists {
                let key = match artist_id {
                    Some(id) => AlbumArtistKey::Id(id),
                    None => AlbumArtistKey::Name(artist_name.clone()),
                };
                let entry = album_artists.entry(key, || ArtistDraft::new(artist_id, artist_name));
                entry.songs.extend(album.songs.iter().cloned());
                entry.albums.push(album.clone());
            }
            if let Some(id) = artist_id {
                if let Some(artist) = self.artists.get_mut(&Some(id)) {
                    artist.albums.push(album.clone());
                }
            }
            albums.push(album);
        }

        let (folder_tree, shallow_tree, folders) = self.trees.finish(&self.options.blacklisted_folders);

        let freeze_artists = |drafts: Vec<ArtistDraft>| -> Vec<Arc<Artist>> {
            drafts.into_iter().map(ArtistDraft::freeze).collect()
        };

        Ok(ScanResult {
            scan_id: Uuid::new_v4(),
            songs: Arc::new(self.songs),
            albums: Arc::new(if load.albums { albums } else { Vec::new() }),
            album_artists: Arc::new(freeze_artists(album_artists.items)),
            artists: Arc::new(if load.artists {
                freeze_artists(self.artists.items)
            } else {
                Vec::new()
            }),
            genres: Arc::new(self.genres.items.into_iter().map(Arc::new).collect()),
            dates: Arc::new(self.dates.items.into_iter().map(Arc::new).collect()),
            id_map: Arc::new(self.id_map),
            path_map: Arc::new(self.path_map),
            folder_tree: Arc::new(folder_tree),
            shallow_tree: Arc::new(shallow_tree),
            folders: Arc::new(folders),
            stats: ScanStats {
                skipped: self.skipped,
                ..ScanStats::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::{AudioRowBuilder, InMemoryMediaIndex, StaticPermissions, TokioFileSystem};

    fn scanner(index: InMemoryMediaIndex) -> Scanner {
        Scanner::new(Arc::new(index), Arc::new(StaticPermissions::granted()))
            .with_file_system(Arc::new(TokioFileSystem::new()))
    }

    #[test]
    fn test_selection_with_extra_formats() {
        let options = ScanOptions {
            include_extra_formats: true,
            ..ScanOptions::default()
        };
        assert_eq!(
            options.selection(),
            "is_music != 0 or mime_type = 'audio/x-wav' or mime_type = 'audio/ogg' \
             or mime_type = 'audio/aac' or mime_type = 'audio/midi'"
        );
        assert_eq!(ScanOptions::default().selection(), "is_music != 0");
    }

    #[test]
    fn test_elapsed_millis_saturate() {
        assert_eq!(saturating_millis(Duration::from_millis(1_500)), 1_500);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_extended_projection_depends_on_index() {
        let options = ScanOptions::default();
        let modern = scanner(InMemoryMediaIndex::new()).audio_query(&options);
        let legacy = scanner(InMemoryMediaIndex::new().without_extended_columns()).audio_query(&options);
        assert!(modern.projection.iter().any(|c| c == columns::DISC_NUMBER));
        assert!(!legacy.projection.iter().any(|c| c == columns::DISC_NUMBER));
        assert_eq!(legacy.sort_order.as_deref(), Some(SORT_ORDER));
    }

    #[test]
    fn test_validate_rejects_covers_without_filesystem() {
        let mut options = ScanOptions {
            load: LoadToggles::songs_only(),
            ..ScanOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(LibraryError::ConfigurationMisuse(_))
        ));
        options.enhanced_covers = Some(false);
        assert!(options.validate().is_ok());
    }

    #[tokio::test]
    async fn test_short_songs_skipped_but_mapped() {
        let index = InMemoryMediaIndex::new();
        index.insert_audio(
            AudioRowBuilder::new(1, "Jingle")
                .path("/music/a/jingle.mp3")
                .duration_ms(4_000)
                .build(),
        );
        index.insert_audio(
            AudioRowBuilder::new(2, "Song")
                .path("/music/a/song.mp3")
                .build(),
        );
        let options = ScanOptions {
            min_song_length_secs: 5,
            enhanced_covers: Some(false),
            ..ScanOptions::default()
        };

        let result = scanner(index).scan(&options).await.unwrap();
        assert_eq!(result.songs.len(), 1);
        assert_eq!(result.stats.skipped, 1);
        assert!(result.song(SongId(1)).is_some());
        assert!(result.song_by_path(Path::new("/music/a/jingle.mp3")).is_some());
    }

    #[tokio::test]
    async fn test_zero_duration_is_not_too_short() {
        let index = InMemoryMediaIndex::new();
        index.insert_audio(
            AudioRowBuilder::new(1, "Stream")
                .path("/music/stream.mp3")
                .duration_ms(0)
                .build(),
        );
        let options = ScanOptions {
            min_song_length_secs: 5,
            enhanced_covers: Some(false),
            ..ScanOptions::default()
        };
        let result = scanner(index).scan(&options).await.unwrap();
        assert_eq!(result.songs.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_artist_is_no_metadata() {
        let index = InMemoryMediaIndex::new();
        index.insert_audio(
            AudioRowBuilder::new(1, "01.Intro")
                .path("/music/01.Intro.mp3")
                .artist("<unknown>", 5)
                .build(),
        );
        let result = scanner(index)
            .scan(&ScanOptions {
                enhanced_covers: Some(false),
                ..ScanOptions::default()
            })
            .await
            .unwrap();

        let song = &result.songs[0];
        assert!(song.has_no_metadata);
        assert_eq!(song.artist, None);
        assert_eq!(song.track_number, Some(1));
        assert_eq!(song.content_uri, "content://media/external/audio/media/1");
        assert_eq!(song.artwork_uri, "content://media/external/audio/media/1/albumart");
    }

    #[tokio::test]
    async fn test_generic_covers_when_disabled() {
        let index = InMemoryMediaIndex::new();
        index.insert_audio(
            AudioRowBuilder::new(1, "a")
                .path("/music/a/a.mp3")
                .album("A", 3)
                .build(),
        );
        let result = scanner(index)
            .scan(&ScanOptions {
                enhanced_covers: Some(false),
                ..ScanOptions::default()
            })
            .await
            .unwrap();
        assert_eq!(
            result.albums[0].cover_uri.as_deref(),
            Some("content://media/external/audio/albumart/3")
        );
    }

    #[tokio::test]
    async fn test_stub_covers_for_single_album_folders() {
        let index = InMemoryMediaIndex::new();
        index.insert_audio_batch(vec![
            AudioRowBuilder::new(1, "a").path("/music/a/a.mp3").album("A", 3).build(),
            AudioRowBuilder::new(2, "b").path("/music/mix/b.mp3").album("B", 4).build(),
            AudioRowBuilder::new(3, "c").path("/music/mix/c.mp3").album("C", 5).build(),
        ]);
        let options = ScanOptions {
            cover_stub_scheme: Some("albumCover".to_string()),
            ..ScanOptions::default()
        };

        let result = scanner(index).scan(&options).await.unwrap();
        let cover = |id: i64| {
            result
                .albums
                .iter()
                .find(|album| album.id == Some(AlbumId(id)))
                .and_then(|album| album.cover_uri.clone())
        };
        assert_eq!(cover(3).as_deref(), Some("albumCover://3/music/a"));
        assert_eq!(
            cover(4).as_deref(),
            Some("content://media/external/audio/albumart/4")
        );
        assert!(result.stats.enhanced_covers);
    }

    #[tokio::test]
    async fn test_folder_cover_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let album_dir = dir.path().join("album");
        tokio::fs::create_dir(&album_dir).await.unwrap();
        tokio::fs::write(album_dir.join("cover.jpg"), b"img").await.unwrap();
        let song_path = album_dir.join("01.mp3");

        let index = InMemoryMediaIndex::new();
        index.insert_audio(
            AudioRowBuilder::new(1, "One")
                .path(song_path.display().to_string())
                .album("A", 8)
                .build(),
        );

        let result = scanner(index).scan(&ScanOptions::default()).await.unwrap();
        assert_eq!(
            result.albums[0].cover_uri,
            Some(cover::file_uri(&album_dir.join("cover.jpg")))
        );
    }

    #[tokio::test]
    async fn test_load_toggles_empty_collections() {
        let index = InMemoryMediaIndex::new();
        index.insert_audio(
            AudioRowBuilder::new(1, "a")
                .path("/music/a/a.mp3")
                .album("A", 3)
                .artist("X", 4)
                .genre("Rock")
                .year(2001)
                .build(),
        );
        let options = ScanOptions {
            load: LoadToggles::songs_only(),
            enhanced_covers: Some(false),
            ..ScanOptions::default()
        };
        let scanner = Scanner::new(Arc::new(index), Arc::new(StaticPermissions::granted()));

        let result = scanner.scan(&options).await.unwrap();
        assert_eq!(result.songs.len(), 1);
        assert!(result.albums.is_empty());
        assert!(result.artists.is_empty());
        assert!(result.album_artists.is_empty());
        assert!(result.genres.is_empty());
        assert!(result.dates.is_empty());
        assert!(result.id_map.is_empty());
        assert!(result.folder_tree.is_empty());
    }

    #[tokio::test]
    async fn test_filesystem_without_access_is_misuse() {
        let scanner = Scanner::new(
            Arc::new(InMemoryMediaIndex::new()),
            Arc::new(StaticPermissions::granted()),
        );
        let err = scanner.scan(&ScanOptions::default()).await.unwrap_err();
        assert!(matches!(err, LibraryError::ConfigurationMisuse(_)));
    }
}
