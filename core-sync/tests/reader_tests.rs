//! Reader pipeline tests against the in-memory media index.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_desktop::{AudioRowBuilder, InMemoryMediaIndex, PlaylistRowBuilder, StaticPermissions};
use bridge_traits::clock::FixedClock;
use bridge_traits::permissions::PermissionProvider;
use bridge_traits::{FileSystemAccess, PlaylistSerializer};
use core_async::flow::{ManualPauseManager, PauseManager};
use core_library::{
    AlbumId, ArtistId, IncrementalList, LibraryError, PlaylistFetcher, PlaylistKind, Scanner,
};
use core_runtime::config::{LibraryPreferences, LoadToggles};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, ScanEvent};
use core_sync::{LibraryReader, ReaderDeps, ReaderError, ReaderSettings, ScanPhase};
use futures::{Stream, StreamExt};
use mockall::mock;

const SETTLE: Duration = Duration::from_millis(50);

mock! {
    Serializer {}

    #[async_trait::async_trait]
    impl PlaylistSerializer for Serializer {
        async fn read(&self, file: &Path) -> bridge_traits::error::Result<Vec<PathBuf>>;
        async fn write(&self, file: &Path, songs: &[PathBuf]) -> bridge_traits::error::Result<()>;
    }
}

mock! {
    Fs {}

    #[async_trait::async_trait]
    impl FileSystemAccess for Fs {
        async fn list_directory(&self, path: &Path) -> bridge_traits::error::Result<Vec<PathBuf>>;
        async fn is_file(&self, path: &Path) -> bool;
        async fn read_to_string(&self, path: &Path) -> bridge_traits::error::Result<String>;
        async fn write_string(&self, path: &Path, contents: &str) -> bridge_traits::error::Result<()>;
    }
}

struct TogglePermissions {
    audio: AtomicBool,
}

impl PermissionProvider for TogglePermissions {
    fn has_audio_permission(&self) -> bool {
        self.audio.load(Ordering::SeqCst)
    }

    fn has_image_permission(&self) -> bool {
        true
    }
}

fn seeded_index() -> Arc<InMemoryMediaIndex> {
    let index = Arc::new(InMemoryMediaIndex::new());
    index.insert_audio_batch(vec![
        AudioRowBuilder::new(1, "Alpha")
            .path("/music/a/alpha.mp3")
            .artist("Band", 10)
            .album("Record", 100)
            .track(1)
            .date_added(999_000)
            .favorite(true)
            .build(),
        AudioRowBuilder::new(2, "Bravo")
            .path("/music/a/bravo.mp3")
            .artist("Band", 10)
            .album("Record", 100)
            .track(2)
            .build(),
    ]);
    index
}

fn deps_with(
    index: Arc<InMemoryMediaIndex>,
    permissions: Arc<dyn PermissionProvider>,
    events: EventBus,
) -> ReaderDeps {
    let preferences = LibraryPreferences::default().with_enhanced_covers(Some(false));
    ReaderDeps {
        scanner: Scanner::new(index.clone(), permissions),
        playlists: PlaylistFetcher::new(index),
        settings: Arc::new(ReaderSettings::new(preferences)),
        clock: Arc::new(FixedClock::at(1_000_000)),
        events,
        load: LoadToggles {
            filesystem: false,
            ..LoadToggles::default()
        },
        cover_stub_scheme: None,
    }
}

fn reader(index: Arc<InMemoryMediaIndex>) -> LibraryReader {
    LibraryReader::new(deps_with(
        index,
        Arc::new(StaticPermissions::granted()),
        EventBus::default(),
    ))
    .unwrap()
}

async fn next_matching<S, T, F>(stream: &mut S, mut predicate: F) -> T
where
    S: Stream<Item = T> + Unpin,
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let value = stream.next().await.expect("stream ended");
            if predicate(&value) {
                return value;
            }
        }
    })
    .await
    .expect("timed out waiting for a matching value")
}

#[tokio::test]
async fn test_no_scan_without_observers() {
    let index = seeded_index();
    let reader = reader(index.clone());

    tokio::time::sleep(SETTLE).await;
    assert_eq!(index.query_count(), 0);
    assert_eq!(reader.current_phase(), ScanPhase::Idle);

    let observer = ManualPauseManager::new(false);
    let mut songs = reader.songs(observer.is_paused());
    let first = next_matching(&mut songs, |_| true).await;
    assert_eq!(first.len(), 2);
    assert!(index.query_count() >= 1);
}

#[tokio::test]
async fn test_change_ping_rescans_while_observed() {
    let index = seeded_index();
    let reader = reader(index.clone());
    let observer = ManualPauseManager::new(false);
    let mut songs = reader.songs(observer.is_paused());
    next_matching(&mut songs, |songs| songs.len() == 2).await;

    index.insert_audio(AudioRowBuilder::new(3, "Charlie").path("/music/b/charlie.mp3").build());

    let songs = next_matching(&mut songs, |songs| songs.len() == 3).await;
    let titles: Vec<&str> = songs.iter().map(|song| song.title.as_str()).collect();
    assert_eq!(titles, vec!["Alpha", "Bravo", "Charlie"]);
}

#[tokio::test]
async fn test_paused_observer_coalesces_pings() {
    let index = seeded_index();
    let reader = reader(index.clone());
    let observer = ManualPauseManager::new(false);
    let mut songs = reader.songs(observer.is_paused());
    next_matching(&mut songs, |songs| songs.len() == 2).await;
    tokio::time::sleep(SETTLE).await;

    observer.set_paused(true);
    tokio::time::sleep(SETTLE).await;
    let before = index.query_count();

    for id in 3..6 {
        index.insert_audio(
            AudioRowBuilder::new(id, format!("Song {id}"))
                .path(format!("/music/b/{id}.mp3"))
                .build(),
        );
    }
    tokio::time::sleep(SETTLE).await;
    assert_eq!(index.query_count(), before);

    observer.set_paused(false);
    next_matching(&mut songs, |songs| songs.len() == 5).await;
    tokio::time::sleep(SETTLE).await;
    assert_eq!(index.query_count(), before + 1);
}

#[tokio::test]
async fn test_refresh_without_observers_scans_each_time() {
    let index = seeded_index();
    let events = EventBus::default();
    let mut received = events.subscribe();
    let reader = LibraryReader::new(deps_with(
        index.clone(),
        Arc::new(StaticPermissions::granted()),
        events,
    ))
    .unwrap();

    let first = reader.refresh().await.unwrap();
    assert_eq!(first.songs.len(), 2);
    assert_eq!(reader.current_phase(), ScanPhase::Published);

    index.insert_audio(AudioRowBuilder::new(3, "Charlie").path("/music/b/charlie.mp3").build());
    let second = reader.refresh().await.unwrap();
    assert_eq!(second.songs.len(), 3);
    assert_ne!(first.scan_id, second.scan_id);
    assert_eq!(reader.publications(), 2);

    let mut saw_request = false;
    let mut saw_completion = false;
    while let Ok(event) = received.try_recv() {
        match event {
            CoreEvent::Library(LibraryEvent::RefreshRequested { .. }) => saw_request = true,
            CoreEvent::Scan(ScanEvent::Completed { .. }) => saw_completion = true,
            _ => {}
        }
    }
    assert!(saw_request);
    assert!(saw_completion);
}

#[tokio::test]
async fn test_permission_denied_keeps_previous_publication() {
    let index = seeded_index();
    let permissions = Arc::new(TogglePermissions {
        audio: AtomicBool::new(true),
    });
    let reader = LibraryReader::new(deps_with(
        index,
        permissions.clone(),
        EventBus::default(),
    ))
    .unwrap();

    let first = reader.refresh().await.unwrap();
    permissions.audio.store(false, Ordering::SeqCst);

    let err = reader.refresh().await.unwrap_err();
    assert!(matches!(
        err,
        ReaderError::ScanFailed(ref e) if matches!(e.as_ref(), LibraryError::PermissionDenied(_))
    ));
    assert!(err.is_recoverable());
    assert_eq!(reader.latest().unwrap().scan_id, first.scan_id);
    assert_eq!(reader.current_phase(), ScanPhase::Published);
}

#[tokio::test]
async fn test_filter_change_clears_cache_and_rescans() {
    let index = seeded_index();
    index.insert_audio(
        AudioRowBuilder::new(3, "Interlude")
            .path("/music/a/interlude.mp3")
            .duration_ms(10_000)
            .build(),
    );
    let reader = reader(index);
    let observer = ManualPauseManager::new(false);
    let mut songs = reader.songs(observer.is_paused());
    next_matching(&mut songs, |songs| songs.len() == 3).await;

    assert!(reader.settings().set_min_song_length_secs(30));
    assert!(reader.latest().is_none());

    let songs = next_matching(&mut songs, |songs| songs.len() == 2).await;
    assert!(songs.iter().all(|song| song.title != "Interlude"));
    assert_eq!(reader.latest().unwrap().stats.skipped, 1);
}

#[tokio::test]
async fn test_playlists_follow_scan_and_playlist_changes() {
    let index = seeded_index();
    index.insert_playlist(
        PlaylistRowBuilder::new(7, "Mix")
            .member(2, 0)
            .member(42, 1)
            .build(),
    );
    let reader = reader(index.clone());
    let observer = ManualPauseManager::new(false);
    let mut playlists = reader.playlists(observer.is_paused()).map(|r| r.unwrap());

    let first = next_matching(&mut playlists, |playlists| !playlists.is_empty()).await;
    assert_eq!(first.len(), 3);
    let mix = &first[0];
    assert_eq!(mix.title.as_deref(), Some("Mix"));
    assert_eq!(mix.songs.len(), 1);
    assert!(mix.has_gaps);
    assert_eq!(first[1].kind, PlaylistKind::Favorite);
    assert_eq!(first[1].songs.len(), 1);
    assert!(matches!(first[2].kind, PlaylistKind::RecentlyAdded { .. }));
    assert_eq!(first[2].songs.len(), 2);
    assert_eq!(first[2].songs[0].title, "Alpha");

    index.insert_playlist(PlaylistRowBuilder::new(8, "Second").member(1, 0).build());
    let second = next_matching(&mut playlists, |playlists| playlists.len() == 4).await;
    assert!(second.iter().any(|playlist| playlist.title.as_deref() == Some("Second")));
}

#[tokio::test]
async fn test_recently_added_window_change_republishes_playlists() {
    let index = seeded_index();
    let reader = reader(index);
    let observer = ManualPauseManager::new(false);
    let mut playlists = reader.playlists(observer.is_paused()).map(|r| r.unwrap());
    next_matching(&mut playlists, |playlists| playlists.len() == 2).await;

    // Alpha was added 1_000 seconds before the fixed clock.
    assert!(reader.settings().set_recently_added_filter_secs(10).unwrap());
    let narrowed = next_matching(&mut playlists, |playlists| {
        playlists
            .iter()
            .any(|playlist| playlist.kind == PlaylistKind::RecentlyAdded { since: 999_990 })
    })
    .await;
    assert!(narrowed[1].songs.is_empty());
}

#[tokio::test]
async fn test_unreadable_playlist_file_surfaces_error() {
    let index = seeded_index();
    index.insert_playlist(
        PlaylistRowBuilder::new(7, "Road")
            .path("/lists/road.m3u")
            .member(1, 1)
            .member(2, 2)
            .build(),
    );
    let mut serializer = MockSerializer::new();
    serializer
        .expect_read()
        .returning(|_| Ok(vec![PathBuf::from("/music/a/alpha.mp3")]));
    let mut fs = MockFs::new();
    fs.expect_is_file().returning(|_| true);

    let mut deps = deps_with(
        index.clone(),
        Arc::new(StaticPermissions::granted()),
        EventBus::default(),
    );
    deps.playlists = PlaylistFetcher::new(index).with_files(Arc::new(fs), Arc::new(serializer));
    let reader = LibraryReader::new(deps).unwrap();

    let err = reader.refresh_playlists().await.unwrap_err();
    assert!(matches!(
        err,
        ReaderError::PlaylistsFailed(ref e)
            if matches!(e.as_ref(), LibraryError::DataInconsistency { playlist: 7, members: 2, paths: 1, .. })
    ));
    assert!(matches!(reader.latest_playlists(), Some(Err(ReaderError::PlaylistsFailed(_)))));

    let observer = ManualPauseManager::new(false);
    let mut playlists = reader.playlists(observer.is_paused());
    let first = next_matching(&mut playlists, |_| true).await;
    assert!(matches!(first, Err(ReaderError::PlaylistsFailed(_))));
    // Songs still publish; only the playlist collection fails.
    assert_eq!(reader.latest().unwrap().songs.len(), 2);
}

#[tokio::test]
async fn test_refresh_playlists_resolves_against_forced_scan() {
    let index = seeded_index();
    index.insert_playlist(PlaylistRowBuilder::new(7, "Mix").member(1, 0).build());
    let reader = reader(index.clone());

    let first = reader.refresh_playlists().await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(first[0].songs.len(), 1);

    index.insert_playlist(PlaylistRowBuilder::new(8, "Second").member(2, 0).build());
    tokio::time::sleep(SETTLE).await;
    let second = reader.refresh_playlists().await.unwrap();
    assert_eq!(second.len(), 4);
    assert!(matches!(reader.latest_playlists(), Some(Ok(ref latest)) if latest.len() == 4));
}

#[tokio::test]
async fn test_refresh_result_survives_filter_change() {
    let index = seeded_index();
    index.insert_audio(
        AudioRowBuilder::new(3, "Interlude")
            .path("/music/a/interlude.mp3")
            .duration_ms(10_000)
            .build(),
    );
    let reader = reader(index);

    let held = reader.refresh().await.unwrap();
    assert_eq!(held.songs.len(), 3);

    assert!(reader.settings().set_min_song_length_secs(30));
    assert!(reader.latest().is_none());
    assert_eq!(held.songs.len(), 3);

    let next = reader.refresh().await.unwrap();
    assert_eq!(next.songs.len(), 2);
    assert_ne!(next.scan_id, held.scan_id);
    assert_eq!(reader.latest().unwrap().scan_id, next.scan_id);
}

#[tokio::test]
async fn test_album_songs_follow_one_album() {
    let index = seeded_index();
    let reader = reader(index.clone());
    let observer = ManualPauseManager::new(false);
    let mut record = reader.album_songs(Some(AlbumId(100)), observer.is_paused());
    let mut missing = reader.album_songs(Some(AlbumId(999)), observer.is_paused());

    let first = next_matching(&mut record, |_| true).await.unwrap();
    assert!(first.is_begin());
    let titles: Vec<&str> = first.after().iter().map(|song| song.title.as_str()).collect();
    assert_eq!(titles, vec!["Alpha", "Bravo"]);
    assert!(next_matching(&mut missing, |_| true).await.is_none());

    index.insert_audio(
        AudioRowBuilder::new(3, "Charlie")
            .path("/music/a/charlie.mp3")
            .artist("Band", 10)
            .album("Record", 100)
            .track(3)
            .build(),
    );
    let grown = next_matching(&mut record, |edit| {
        edit.as_ref().is_some_and(|edit| edit.after().len() == 3)
    })
    .await
    .unwrap();
    assert!(matches!(grown, IncrementalList::Insert { pos: 2, count: 1, .. }));
}

#[tokio::test]
async fn test_artist_queries_group_songs_and_albums() {
    let index = seeded_index();
    index.insert_audio(
        AudioRowBuilder::new(3, "Solo")
            .path("/music/b/solo.mp3")
            .artist("Other", 20)
            .album("Single", 200)
            .build(),
    );
    let reader = reader(index);
    let observer = ManualPauseManager::new(false);
    let mut band_songs = reader.artist_songs(Some(ArtistId(10)), observer.is_paused());
    let mut other_songs = reader.artist_songs(Some(ArtistId(20)), observer.is_paused());
    let mut band_albums = reader.artist_albums(Some(ArtistId(10)), observer.is_paused());

    let band = next_matching(&mut band_songs, |_| true).await.unwrap();
    assert_eq!(band.after().len(), 2);
    let other = next_matching(&mut other_songs, |_| true).await.unwrap();
    assert_eq!(other.after().len(), 1);
    assert_eq!(other.after()[0].title, "Solo");

    let albums = next_matching(&mut band_albums, |_| true).await.unwrap();
    assert_eq!(albums.after().len(), 1);
    assert_eq!(albums.after()[0].title.as_deref(), Some("Record"));
}

#[tokio::test]
async fn test_songs_incremental_emits_edits() {
    let index = seeded_index();
    let reader = reader(index.clone());
    let observer = ManualPauseManager::new(false);
    let mut edits = reader.songs_incremental(observer.is_paused());

    let begin = next_matching(&mut edits, |_| true).await;
    assert!(begin.is_begin());
    assert_eq!(begin.after().len(), 2);

    index.insert_audio(AudioRowBuilder::new(3, "Charlie").path("/music/b/charlie.mp3").build());
    let insert = next_matching(&mut edits, |_| true).await;
    assert!(matches!(insert, IncrementalList::Insert { pos: 2, count: 1, .. }));
}

#[tokio::test]
async fn test_scan_phase_stream() {
    let index = seeded_index();
    let reader = reader(index);
    let mut phases = reader.scan_phase();
    assert_eq!(phases.next().await, Some(ScanPhase::Idle));

    reader.refresh().await.unwrap();
    next_matching(&mut phases, |phase| *phase == ScanPhase::Published).await;
}

#[tokio::test]
async fn test_collections_share_one_scan() {
    let index = seeded_index();
    let reader = reader(index);
    let observer = ManualPauseManager::new(false);
    let mut albums = reader.albums(observer.is_paused());
    let mut artists = reader.artists(observer.is_paused());
    let mut folders = reader.folders(observer.is_paused());

    let albums = next_matching(&mut albums, |_| true).await;
    let artists = next_matching(&mut artists, |_| true).await;
    let folders = next_matching(&mut folders, |_| true).await;

    assert_eq!(albums.len(), 1);
    assert_eq!(albums[0].album_artist.as_deref(), Some("Band"));
    assert_eq!(artists.len(), 1);
    assert_eq!(artists[0].albums.len(), 1);
    assert!(folders.contains("/music/a"));
}
