//! Playlist fetching and materialization.
//!
//! Stored playlists are read in two steps. [`PlaylistFetcher::fetch`] reads
//! the playlist rows, their ordered members and (for file-backed playlists)
//! the paths in the backing file into [`RawPlaylist`]s. Those are resolved
//! against a [`ScanResult`] with [`RawPlaylist::resolve`], which prefers the
//! file path and falls back to the member id.
//!
//! The synthetic favourites and recently-added playlists are computed from
//! the song list alone.

use std::path::PathBuf;
use std::sync::Arc;

use bridge_traits::{
    error::BridgeError,
    media_index::{columns, MediaCollection, MediaIndex, MediaQuery},
    playlist::PlaylistSerializer,
    storage::FileSystemAccess,
};
use tracing::{debug, instrument, warn};

use crate::error::{LibraryError, Result};
use crate::models::{Playlist, PlaylistId, PlaylistKind, RawPlaylist, ScanResult, Song, SongId};
use crate::scanner::row::Row;

/// Reads stored playlists from the media index.
#[derive(Clone)]
pub struct PlaylistFetcher {
    index: Arc<dyn MediaIndex>,
    fs: Option<Arc<dyn FileSystemAccess>>,
    serializer: Option<Arc<dyn PlaylistSerializer>>,
}

impl PlaylistFetcher {
    pub fn new(index: Arc<dyn MediaIndex>) -> Self {
        Self {
            index,
            fs: None,
            serializer: None,
        }
    }

    /// Enables reading backing playlist files.
    pub fn with_files(
        mut self,
        fs: Arc<dyn FileSystemAccess>,
        serializer: Arc<dyn PlaylistSerializer>,
    ) -> Self {
        self.fs = Some(fs);
        self.serializer = Some(serializer);
        self
    }

    /// Fetches every stored playlist.
    ///
    /// Fails with `DataInconsistency` when a backing file lists fewer paths
    /// than the index has members for the playlist.
    #[instrument(skip_all)]
    pub async fn fetch(&self) -> Result<Vec<RawPlaylist>> {
        let query = MediaQuery::new([
            columns::ID,
            columns::NAME,
            columns::DATA,
            columns::DATE_ADDED,
            columns::DATE_MODIFIED,
        ]);
        let rows = self.index.query(MediaCollection::Playlists, &query).await?;

        let mut playlists = Vec::with_capacity(rows.len());
        for row in &rows {
            let row = Row::new(row, "playlist");
            let id = PlaylistId(row.required_int(columns::ID)?);
            let path = row.non_empty(columns::DATA).map(PathBuf::from);
            let members = self.fetch_members(id).await?;

            let paths = match &path {
                Some(file) => self.read_paths(file).await?,
                None => None,
            };
            if let (Some(file), Some(paths)) = (&path, &paths) {
                if members.len() > paths.len() {
                    return Err(LibraryError::DataInconsistency {
                        playlist: id.0,
                        file: file.clone(),
                        members: members.len(),
                        paths: paths.len(),
                    });
                }
            }

            playlists.push(RawPlaylist {
                id,
                title: row.non_empty(columns::NAME),
                path,
                date_added: row.int(columns::DATE_ADDED),
                date_modified: row.int(columns::DATE_MODIFIED),
                members,
                paths,
            });
        }

        debug!(playlists = playlists.len(), "Fetched playlists");
        Ok(playlists)
    }

    /// Member ids by play order, with `None` in every skipped position.
    async fn fetch_members(&self, id: PlaylistId) -> Result<Vec<Option<SongId>>> {
        let query = MediaQuery::new([columns::AUDIO_ID, columns::PLAY_ORDER])
            .with_sort_order(format!("{} ASC", columns::PLAY_ORDER));
        let rows = self
            .index
            .query(MediaCollection::PlaylistMembers(id.0), &query)
            .await?;
        Ok(fill_gaps(rows.iter().map(|row| {
            let row = Row::new(row, "playlist member");
            (row.int(columns::PLAY_ORDER), row.int(columns::AUDIO_ID))
        })))
    }

    /// Paths listed in `file`, or `None` when files are not read or the
    /// format is unsupported.
    async fn read_paths(&self, file: &std::path::Path) -> Result<Option<Vec<Option<PathBuf>>>> {
        let (Some(fs), Some(serializer)) = (&self.fs, &self.serializer) else {
            return Ok(None);
        };
        let entries = match serializer.read(file).await {
            Ok(entries) => entries,
            Err(BridgeError::UnsupportedFormat(format)) => {
                debug!(playlist = ?file, %format, "Skipping unsupported playlist file");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::with_capacity(entries.len());
        for entry in entries {
            paths.push(fs.is_file(&entry).await.then_some(entry));
        }
        Ok(Some(paths))
    }
}

/// Lays members out by play order. Orders that jump ahead leave `None`
/// placeholders for the skipped slots; rows without an audio id are `None`
/// themselves.
fn fill_gaps(rows: impl Iterator<Item = (Option<i64>, Option<i64>)>) -> Vec<Option<SongId>> {
    let mut members = Vec::new();
    let mut last_order: Option<i64> = None;
    for (order, audio_id) in rows {
        if let (Some(last), Some(order)) = (last_order, order) {
            for _ in (last + 1)..order {
                members.push(None);
            }
        }
        if order.is_some() {
            last_order = order;
        }
        members.push(audio_id.map(SongId));
    }
    members
}

impl RawPlaylist {
    /// Resolves members against one scan. Each slot is looked up by path
    /// first and by id second; unresolved slots are dropped and flag the
    /// playlist with `has_gaps`.
    pub fn resolve(&self, result: &ScanResult) -> Playlist {
        let slots = self
            .paths
            .as_ref()
            .map_or(self.members.len(), |paths| paths.len());

        let resolved: Vec<Option<Arc<Song>>> = (0..slots)
            .map(|slot| {
                let by_path = self
                    .paths
                    .as_ref()
                    .and_then(|paths| paths.get(slot))
                    .and_then(Option::as_ref)
                    .and_then(|path| result.song_by_path(path));
                let by_id = || {
                    self.members
                        .get(slot)
                        .copied()
                        .flatten()
                        .and_then(|id| result.song(id))
                };
                by_path.or_else(by_id).cloned()
            })
            .collect();

        let songs: Vec<Arc<Song>> = resolved.iter().flatten().cloned().collect();
        let has_gaps = songs.len() != resolved.len();
        if has_gaps {
            debug!(
                playlist = %self.id,
                dropped = resolved.len() - songs.len(),
                "Playlist has unresolved members"
            );
        }

        Playlist {
            id: Some(self.id),
            title: self.title.clone(),
            path: self.path.clone(),
            date_added: self.date_added,
            date_modified: self.date_modified,
            songs,
            has_gaps,
            kind: PlaylistKind::Stored,
        }
    }
}

/// Favourite songs in song-list order.
pub fn favorite_playlist(songs: &[Arc<Song>]) -> Playlist {
    synthetic(
        PlaylistKind::Favorite,
        songs.iter().filter(|song| song.is_favorite()).cloned().collect(),
    )
}

/// Songs added at or after `now - filter_secs`, newest first.
pub fn recently_added_playlist(songs: &[Arc<Song>], now: i64, filter_secs: i64) -> Playlist {
    let since = now.saturating_sub(filter_secs);
    let mut recent: Vec<Arc<Song>> = songs
        .iter()
        .filter(|song| song.date_added.is_some_and(|added| added >= since))
        .cloned()
        .collect();
    recent.sort_by(|a, b| b.date_added.cmp(&a.date_added));
    synthetic(PlaylistKind::RecentlyAdded { since }, recent)
}

fn synthetic(kind: PlaylistKind, songs: Vec<Arc<Song>>) -> Playlist {
    Playlist {
        id: None,
        title: None,
        path: None,
        date_added: None,
        date_modified: None,
        songs,
        has_gaps: false,
        kind,
    }
}

/// Resolves every raw playlist against `result`, logging gap counts.
pub fn resolve_all(raw: &[RawPlaylist], result: &ScanResult) -> Vec<Arc<Playlist>> {
    let playlists: Vec<Arc<Playlist>> = raw
        .iter()
        .map(|playlist| Arc::new(playlist.resolve(result)))
        .collect();
    let gaps = playlists.iter().filter(|playlist| playlist.has_gaps).count();
    if gaps > 0 {
        warn!(gaps, total = playlists.len(), "Some playlists reference missing songs");
    }
    playlists
}
