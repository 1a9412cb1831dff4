//! # Library Module
//!
//! Builds immutable library snapshots from the host media index.
//!
//! ## Overview
//!
//! This crate owns:
//! - The snapshot models: songs, albums, artists, genres, dates, playlists
//!   and the folder trees, bundled into one [`ScanResult`]
//! - The bulk [`Scanner`] that reads the media index into a `ScanResult`
//! - Stored playlist fetching and resolution, plus the synthetic favourites
//!   and recently-added playlists
//! - Incremental list edits and the combinators that remap them through a
//!   projection, plus keyed map edits for grouping a list by album or
//!   artist
//!
//! Nothing here is reactive; `core-sync` decides when scans run.

pub mod error;
pub mod incremental;
pub mod models;
pub mod playlists;
pub mod scanner;

pub use error::{LibraryError, Result};
pub use incremental::{FlatMapIncremental, IncrementalList, IncrementalMap};
pub use models::{
    Album, AlbumId, Artist, ArtistId, Date, FileNode, FolderAlbum, Genre, Playlist, PlaylistId,
    PlaylistKind, RawPlaylist, ScanResult, ScanStats, Song, SongExtras, SongId,
};
pub use playlists::PlaylistFetcher;
pub use scanner::{ScanOptions, Scanner};
