//! One-shot library reads for hosts that do not consume streams.

use std::sync::Arc;

use bridge_traits::clock::Clock;
use core_library::playlists::{favorite_playlist, recently_added_playlist, resolve_all};
use core_library::{Playlist, PlaylistFetcher, ScanOptions, ScanResult, Scanner};
use tracing::{info, instrument};

use crate::reader::ReaderDeps;
use crate::Result;

/// One consistent read: a scan result and the playlists resolved against it.
#[derive(Debug, Clone)]
pub struct LibrarySnapshot {
    pub scan: Arc<ScanResult>,
    /// Stored playlists, then favourites, then recently added
    pub playlists: Vec<Arc<Playlist>>,
}

pub struct SimpleReader {
    scanner: Scanner,
    playlists: PlaylistFetcher,
    clock: Arc<dyn Clock>,
    options: ScanOptions,
    recently_added_filter_secs: i64,
}

impl SimpleReader {
    pub fn new(
        scanner: Scanner,
        playlists: PlaylistFetcher,
        clock: Arc<dyn Clock>,
        options: ScanOptions,
        recently_added_filter_secs: i64,
    ) -> Self {
        Self {
            scanner,
            playlists,
            clock,
            options,
            recently_added_filter_secs,
        }
    }

    /// Uses the current settings values of `deps`.
    pub fn from_deps(deps: ReaderDeps) -> Self {
        let options = deps
            .settings
            .scan_filters()
            .to_options(deps.load, deps.cover_stub_scheme);
        let window = deps.settings.recently_added_filter_secs();
        Self::new(deps.scanner, deps.playlists, deps.clock, options, window)
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scans, then fetches and resolves playlists against that scan.
    #[instrument(skip(self))]
    pub async fn read(&self) -> Result<LibrarySnapshot> {
        let scan = Arc::new(self.scanner.scan(&self.options).await?);
        let raw = self.playlists.fetch().await?;

        let mut playlists = resolve_all(&raw, &scan);
        playlists.push(Arc::new(favorite_playlist(&scan.songs)));
        playlists.push(Arc::new(recently_added_playlist(
            &scan.songs,
            self.clock.unix_timestamp(),
            self.recently_added_filter_secs,
        )));

        info!(
            songs = scan.songs.len(),
            playlists = playlists.len(),
            "Library read"
        );
        Ok(LibrarySnapshot { scan, playlists })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::{AudioRowBuilder, InMemoryMediaIndex, PlaylistRowBuilder, StaticPermissions};
    use bridge_traits::clock::FixedClock;
    use core_library::PlaylistKind;
    use core_runtime::config::LoadToggles;

    fn reader(index: Arc<InMemoryMediaIndex>) -> SimpleReader {
        let options = ScanOptions {
            enhanced_covers: Some(false),
            load: LoadToggles {
                filesystem: false,
                ..LoadToggles::default()
            },
            ..ScanOptions::default()
        };
        SimpleReader::new(
            Scanner::new(index.clone(), Arc::new(StaticPermissions::granted())),
            PlaylistFetcher::new(index),
            Arc::new(FixedClock::at(10_000)),
            options,
            1_000,
        )
    }

    #[tokio::test]
    async fn test_read_resolves_playlists_against_scan() {
        let index = Arc::new(InMemoryMediaIndex::new());
        index.insert_audio_batch(vec![
            AudioRowBuilder::new(1, "Old")
                .path("/music/old.mp3")
                .date_added(100)
                .build(),
            AudioRowBuilder::new(2, "New")
                .path("/music/new.mp3")
                .date_added(9_500)
                .favorite(true)
                .build(),
        ]);
        index.insert_playlist(PlaylistRowBuilder::new(5, "Both").member(1, 0).member(2, 1).build());

        let snapshot = reader(index).read().await.unwrap();

        assert_eq!(snapshot.scan.songs.len(), 2);
        assert_eq!(snapshot.playlists.len(), 3);
        assert_eq!(snapshot.playlists[0].songs.len(), 2);
        assert_eq!(snapshot.playlists[1].kind, PlaylistKind::Favorite);
        assert_eq!(snapshot.playlists[1].songs.len(), 1);
        assert_eq!(
            snapshot.playlists[2].kind,
            PlaylistKind::RecentlyAdded { since: 9_000 }
        );
        assert_eq!(snapshot.playlists[2].songs[0].title, "New");
    }

    #[tokio::test]
    async fn test_permission_denied_has_no_partial_result() {
        let index = Arc::new(InMemoryMediaIndex::new());
        let reader = SimpleReader::new(
            Scanner::new(index.clone(), Arc::new(StaticPermissions::denied())),
            PlaylistFetcher::new(index),
            Arc::new(FixedClock::at(0)),
            ScanOptions::default(),
            0,
        );

        let err = reader.read().await.unwrap_err();
        assert!(err.is_recoverable());
    }
}
