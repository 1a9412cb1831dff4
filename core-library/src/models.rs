//! Domain models for the library snapshot
//!
//! Everything in this module is produced by one scan and frozen afterwards.
//! Aggregates reference songs through `Arc`, so an album, its artists, its
//! folder node and the flat song list all share the same allocations.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ID Types
// =============================================================================

/// Media index id of a song row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SongId(pub i64);

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Media index id of an album
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlbumId(pub i64);

impl fmt::Display for AlbumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Media index id of an artist
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtistId(pub i64);

impl fmt::Display for ArtistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Media index id of a stored playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaylistId(pub i64);

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Songs
// =============================================================================

/// One playable audio row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    /// Media index id
    pub id: SongId,
    /// Absolute file path, when the index reports one
    pub path: Option<PathBuf>,
    /// Content identifier used for playback
    pub content_uri: String,
    pub title: String,

    // Tags
    /// Song artist, `None` when the index stores the unknown placeholder
    pub artist: Option<String>,
    pub artist_id: Option<ArtistId>,
    pub album: Option<String>,
    pub album_id: Option<AlbumId>,
    /// Raw album-artist tag. The resolved value lives on [`Album`].
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    pub track_number: Option<i32>,
    pub disc_number: Option<i32>,
    /// Release year, `None` for a stored `0`
    pub year: Option<i32>,
    /// Recording date from the `datetaken` column
    pub recorded_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// `None` when the platform has no favourite column
    pub favorite: Option<bool>,
    pub mime_type: String,
    /// Per-song embedded art
    pub artwork_uri: String,

    // Timestamps (unix seconds)
    pub date_added: Option<i64>,
    pub date_modified: Option<i64>,

    /// Set when the index had no artist tag for the file
    pub has_no_metadata: bool,
    pub extras: SongExtras,
}

/// Vendor columns passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongExtras {
    pub composer: Option<String>,
    pub writer: Option<String>,
    pub author: Option<String>,
    pub compilation: Option<String>,
    /// Only kept when it could not be parsed into the track number
    pub cd_track_number: Option<String>,
}

impl Song {
    /// Album ordering key.
    pub fn sort_key(&self) -> i64 {
        i64::from(self.disc_number.unwrap_or(0)) * 1000 + i64::from(self.track_number.unwrap_or(0))
    }

    /// Folder holding the file.
    pub fn folder(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    pub fn is_favorite(&self) -> bool {
        self.favorite == Some(true)
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// Album with its resolved album artist and sorted song list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Album {
    /// `None` groups songs without an album id
    pub id: Option<AlbumId>,
    pub title: Option<String>,
    /// Resolved album artist, see `scanner::album_artist`
    pub album_artist: Option<String>,
    pub album_artist_id: Option<ArtistId>,
    /// Latest year among the songs
    pub year: Option<i32>,
    pub cover_uri: Option<String>,
    /// Earliest add date among the songs
    pub date_added: Option<i64>,
    /// Latest modification date among the songs
    pub date_modified: Option<i64>,
    /// Sorted by disc and track
    pub songs: Vec<Arc<Song>>,
}

impl Album {
    /// Checks that every song belongs to this album.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(stray) = self.songs.iter().find(|song| song.album_id != self.id) {
            return Err(format!(
                "Song {} has album id {:?}, expected {:?}",
                stray.id, stray.album_id, self.id
            ));
        }
        Ok(())
    }

    pub fn duration_ms(&self) -> i64 {
        self.songs.iter().filter_map(|song| song.duration_ms).sum()
    }
}

/// Artist, either as credited on songs or as resolved album artist
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artist {
    pub id: Option<ArtistId>,
    pub name: Option<String>,
    pub songs: Vec<Arc<Song>>,
    /// Albums this artist is the resolved album artist of
    pub albums: Vec<Arc<Album>>,
}

/// Songs sharing one genre string
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Genre {
    pub name: Option<String>,
    pub songs: Vec<Arc<Song>>,
}

/// Songs sharing one release year
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Date {
    pub year: Option<i32>,
    pub songs: Vec<Arc<Song>>,
}

// =============================================================================
// Playlists
// =============================================================================

/// Where a playlist's contents come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaylistKind {
    /// Stored in the media index, optionally backed by a file
    Stored,
    /// Songs flagged as favourite
    Favorite,
    /// Songs added at or after `since` (unix seconds)
    RecentlyAdded { since: i64 },
}

/// Playlist resolved against one scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Playlist {
    /// `None` for synthetic playlists
    pub id: Option<PlaylistId>,
    pub title: Option<String>,
    /// Backing file, `None` for synthetic playlists
    pub path: Option<PathBuf>,
    pub date_added: Option<i64>,
    pub date_modified: Option<i64>,
    pub songs: Vec<Arc<Song>>,
    /// Some member could not be resolved and was dropped
    pub has_gaps: bool,
    pub kind: PlaylistKind,
}

impl Playlist {
    pub fn is_synthetic(&self) -> bool {
        self.kind != PlaylistKind::Stored
    }
}

/// Playlist row as read from the index, before resolution against a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPlaylist {
    pub id: PlaylistId,
    pub title: Option<String>,
    pub path: Option<PathBuf>,
    pub date_added: Option<i64>,
    pub date_modified: Option<i64>,
    /// Member ids by play order. `None` fills skipped play-order slots.
    pub members: Vec<Option<SongId>>,
    /// Paths read from the backing file. Entries that are not existing
    /// files are `None`; the whole list is `None` when the file could not be
    /// read.
    pub paths: Option<Vec<Option<PathBuf>>>,
}

// =============================================================================
// Folders
// =============================================================================

/// Album membership of the songs directly inside a folder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum FolderAlbum {
    #[default]
    Empty,
    /// Every song so far belongs to this album
    Single(AlbumId),
    /// Songs from several albums, or without an album id
    Mixed,
}

impl FolderAlbum {
    fn observe(&mut self, album_id: Option<AlbumId>) {
        *self = match (*self, album_id) {
            (FolderAlbum::Empty, Some(id)) => FolderAlbum::Single(id),
            (FolderAlbum::Single(current), Some(id)) if current == id => FolderAlbum::Single(id),
            _ => FolderAlbum::Mixed,
        };
    }
}

/// Folder tree node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileNode {
    pub name: String,
    /// Children by key (a path component, or a full path in the shallow tree)
    pub folders: BTreeMap<String, FileNode>,
    /// Songs directly inside this folder
    pub songs: Vec<Arc<Song>>,
    pub album: FolderAlbum,
}

impl FileNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_song(&mut self, song: Arc<Song>, album_id: Option<AlbumId>) {
        self.album.observe(album_id);
        self.songs.push(song);
    }

    /// Child under `key`, created with `name` if missing.
    pub fn child_mut(&mut self, key: &str, name: &str) -> &mut FileNode {
        self.folders
            .entry(key.to_string())
            .or_insert_with(|| FileNode::new(name))
    }

    /// Walks `components` from this node.
    pub fn find<'a, I>(&self, components: I) -> Option<&FileNode>
    where
        I: IntoIterator<Item = &'a str>,
    {
        components
            .into_iter()
            .try_fold(self, |node, component| node.folders.get(component))
    }

    /// The album every song in this folder belongs to, if there is one.
    pub fn single_album(&self) -> Option<AlbumId> {
        match self.album {
            FolderAlbum::Single(id) => Some(id),
            _ => None,
        }
    }

    /// Songs in this node and every descendant.
    pub fn song_count(&self) -> usize {
        self.songs.len() + self.folders.values().map(FileNode::song_count).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty() && self.folders.is_empty()
    }
}

// =============================================================================
// Scan Result
// =============================================================================

/// Counters describing one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Rows returned by the index
    pub rows: usize,
    /// Rows kept out of the collections (too short, blacklisted, no folder)
    pub skipped: usize,
    pub elapsed_ms: u64,
    /// Whether folder covers were looked up
    pub enhanced_covers: bool,
}

/// One immutable, internally consistent library snapshot.
///
/// Cloning is cheap; every collection sits behind an `Arc`. Two results with
/// the same `scan_id` come from the same scan.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub scan_id: Uuid,
    pub songs: Arc<Vec<Arc<Song>>>,
    pub albums: Arc<Vec<Arc<Album>>>,
    pub album_artists: Arc<Vec<Arc<Artist>>>,
    pub artists: Arc<Vec<Arc<Artist>>>,
    pub genres: Arc<Vec<Arc<Genre>>>,
    pub dates: Arc<Vec<Arc<Date>>>,
    /// Every row by id, skipped rows included
    pub id_map: Arc<HashMap<SongId, Arc<Song>>>,
    /// Every row with a path, skipped rows included
    pub path_map: Arc<HashMap<PathBuf, Arc<Song>>>,
    pub folder_tree: Arc<FileNode>,
    pub shallow_tree: Arc<FileNode>,
    /// Parent folders of all kept songs plus the blacklist
    pub folders: Arc<BTreeSet<String>>,
    pub stats: ScanStats,
}

impl ScanResult {
    pub const FOLDER_ROOT: &'static str = "storage";
    pub const SHALLOW_ROOT: &'static str = "shallow";

    /// Result of scanning an empty index.
    pub fn empty() -> Self {
        Self {
            scan_id: Uuid::new_v4(),
            songs: Arc::default(),
            albums: Arc::default(),
            album_artists: Arc::default(),
            artists: Arc::default(),
            genres: Arc::default(),
            dates: Arc::default(),
            id_map: Arc::default(),
            path_map: Arc::default(),
            folder_tree: Arc::new(FileNode::new(Self::FOLDER_ROOT)),
            shallow_tree: Arc::new(FileNode::new(Self::SHALLOW_ROOT)),
            folders: Arc::default(),
            stats: ScanStats::default(),
        }
    }

    pub fn song(&self, id: SongId) -> Option<&Arc<Song>> {
        self.id_map.get(&id)
    }

    pub fn song_by_path(&self, path: &Path) -> Option<&Arc<Song>> {
        self.path_map.get(path)
    }

    /// Whether both results hold the same collections, ignoring identity and
    /// timing.
    pub fn same_content(&self, other: &ScanResult) -> bool {
        self.songs == other.songs
            && self.albums == other.albums
            && self.album_artists == other.album_artists
            && self.artists == other.artists
            && self.genres == other.genres
            && self.dates == other.dates
            && self.id_map == other.id_map
            && self.path_map == other.path_map
            && self.folder_tree == other.folder_tree
            && self.shallow_tree == other.shallow_tree
            && self.folders == other.folders
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(id: i64, album_id: Option<i64>) -> Arc<Song> {
        Arc::new(Song {
            id: SongId(id),
            path: Some(PathBuf::from(format!("/music/{id}.mp3"))),
            content_uri: format!("content://media/external/audio/media/{id}"),
            title: format!("Song {id}"),
            artist: None,
            artist_id: None,
            album: None,
            album_id: album_id.map(AlbumId),
            album_artist: None,
            genre: None,
            track_number: None,
            disc_number: None,
            year: None,
            recorded_at: None,
            duration_ms: Some(1000),
            favorite: None,
            mime_type: "audio/mpeg".to_string(),
            artwork_uri: String::new(),
            date_added: None,
            date_modified: None,
            has_no_metadata: true,
            extras: SongExtras::default(),
        })
    }

    #[test]
    fn test_sort_key_combines_disc_and_track() {
        let mut value = (*song(1, None)).clone();
        value.disc_number = Some(2);
        value.track_number = Some(5);
        assert_eq!(value.sort_key(), 2005);
        value.disc_number = None;
        assert_eq!(value.sort_key(), 5);
    }

    #[test]
    fn test_album_validation_catches_foreign_song() {
        let album = Album {
            id: Some(AlbumId(1)),
            title: None,
            album_artist: None,
            album_artist_id: None,
            year: None,
            cover_uri: None,
            date_added: None,
            date_modified: None,
            songs: vec![song(1, Some(1)), song(2, Some(2))],
        };
        assert!(album.validate().is_err());
        assert_eq!(album.duration_ms(), 2000);
    }

    #[test]
    fn test_folder_album_tracking() {
        let mut node = FileNode::new("a");
        assert_eq!(node.album, FolderAlbum::Empty);
        node.add_song(song(1, Some(3)), Some(AlbumId(3)));
        node.add_song(song(2, Some(3)), Some(AlbumId(3)));
        assert_eq!(node.single_album(), Some(AlbumId(3)));
        node.add_song(song(3, None), None);
        assert_eq!(node.album, FolderAlbum::Mixed);
    }

    #[test]
    fn test_file_node_find_and_count() {
        let mut root = FileNode::new(ScanResult::FOLDER_ROOT);
        root.child_mut("music", "music")
            .child_mut("rock", "rock")
            .add_song(song(1, None), None);
        root.child_mut("music", "music").add_song(song(2, None), None);

        assert_eq!(root.song_count(), 2);
        assert!(root.find(["music", "rock"]).is_some());
        assert!(root.find(["music", "jazz"]).is_none());
    }

    #[test]
    fn test_empty_results_have_same_content() {
        let a = ScanResult::empty();
        let b = ScanResult::empty();
        assert_ne!(a.scan_id, b.scan_id);
        assert!(a.same_content(&b));
    }
}
