//! # Library Reader
//!
//! The reactive surface of the library: one replay-1, pausable stream per
//! derived collection, all projected from a single shared scan stage.
//!
//! ## Pipeline
//!
//! ```text
//!  audio changes ──┐
//!                  ├─▶ conflate_when_paused ─┐
//!  scan filters ───┘                         ├─▶ map_latest(scan) ─▶ [scan stage] ─┬─▶ songs, albums, ...
//!  refresh() ────────────────────────────────┘                                     │
//!                                                                                  ▼
//!  playlist changes ──┐                                                             │
//!  recently-added ────┼─▶ conflate_when_paused ─▶ map_latest(resolve) ─▶ [playlist stage]
//!  scan results ──────┘
//! ```
//!
//! The playlist stage caches failures as well as playlists, so a fetch that
//! fails reaches every observer and `refresh_playlists()` instead of leaving
//! the previous value in place.
//!
//! Keyed queries (`album_songs`, `artist_songs`, `artist_albums`) group the
//! incremental song or album list by id and follow a single group.
//!
//! Each stage is paused while none of its subscribers wants work, so nobody
//! observing means no background scans. Change pings that arrive meanwhile
//! collapse into one scan when an observer comes back. `refresh()` bypasses
//! the pause and waits for a result from a scan that started after the call.
//!
//! Filter changes clear replay caches before the new value is visible: the
//! scan filters clear the playlist stage and, through its parent handle, the
//! scan stage; the recently-added window clears only the playlist stage.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let reader = LibraryReader::new(deps)?;
//! let pause = ManualPauseManager::new(false);
//! let mut albums = reader.albums(pause.is_paused());
//! while let Some(albums) = albums.next().await {
//!     render(&albums);
//! }
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bridge_traits::clock::Clock;
use bridge_traits::media_index::MediaCollection;
use core_async::flow::{
    conflate_when_paused, map_latest, watch_stream, InvalidationHandle, InvalidationMode,
    PauseSignal, ReplayStage, StageContext,
};
use uuid::Uuid;
use core_async::sync::watch;
use core_library::incremental::{for_key, group_by_incremental, snapshots_to_incremental};
use core_library::playlists::{favorite_playlist, recently_added_playlist, resolve_all};
use core_library::{
    Album, AlbumId, Artist, ArtistId, Date, FileNode, Genre, IncrementalList, LibraryError,
    Playlist, PlaylistFetcher, RawPlaylist, ScanResult, Scanner, Song,
};
use core_runtime::config::{CoreConfig, LoadToggles};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, ScanEvent};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tracing::{debug, error, info, instrument, warn};

use crate::notifier::ChangeNotifier;
use crate::phase::{PhaseTracker, ScanPhase};
use crate::settings::ReaderSettings;
use crate::{ReaderError, Result};

pub const SCAN_STAGE: &str = "scan";
pub const PLAYLIST_STAGE: &str = "playlists";

pub type Playlists = Arc<Vec<Arc<Playlist>>>;

/// What the playlist stage caches: the playlists resolved against one scan,
/// or the error that prevented it.
#[derive(Clone)]
struct PlaylistOutcome {
    scan_id: Uuid,
    result: std::result::Result<Playlists, Arc<LibraryError>>,
}

impl PlaylistOutcome {
    fn into_result(self) -> Result<Playlists> {
        self.result.map_err(ReaderError::PlaylistsFailed)
    }
}

/// Collaborators of a [`LibraryReader`].
pub struct ReaderDeps {
    pub scanner: Scanner,
    pub playlists: PlaylistFetcher,
    pub settings: Arc<ReaderSettings>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub load: LoadToggles,
    pub cover_stub_scheme: Option<String>,
}

impl ReaderDeps {
    /// Wires the bridges and preferences of `config`.
    pub fn from_config(config: &CoreConfig, events: EventBus) -> Self {
        let mut scanner = Scanner::new(
            Arc::clone(&config.media_index),
            Arc::clone(&config.permissions),
        );
        if let Some(fs) = &config.file_system {
            scanner = scanner.with_file_system(Arc::clone(fs));
        }

        let mut playlists = PlaylistFetcher::new(Arc::clone(&config.media_index));
        if let (Some(fs), Some(serializer)) = (&config.file_system, &config.playlist_serializer) {
            playlists = playlists.with_files(Arc::clone(fs), Arc::clone(serializer));
        }

        Self {
            scanner,
            playlists,
            settings: Arc::new(ReaderSettings::new(config.preferences.clone())),
            clock: Arc::clone(&config.clock),
            events,
            load: config.load,
            cover_stub_scheme: config.cover_stub_scheme.clone(),
        }
    }
}

// =============================================================================
// Scan stage
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanTrigger {
    Change(u64),
    Filters,
    Refresh(u64),
}

impl fmt::Display for ScanTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanTrigger::Change(version) => write!(f, "change:{version}"),
            ScanTrigger::Filters => f.write_str("filters"),
            ScanTrigger::Refresh(ticket) => write!(f, "refresh:{ticket}"),
        }
    }
}

/// What `refresh()` callers wait on.
#[derive(Debug, Clone, Default)]
struct RefreshOutcome {
    /// Highest ticket covered by a published scan
    served: u64,
    /// The scan that covered `served`. Invalidation does not clear it; a
    /// filter change starts a new scan which replaces it once published.
    served_result: Option<Arc<ScanResult>>,
    /// Highest ticket covered by a failed scan
    failed: u64,
    error: Option<Arc<LibraryError>>,
}

struct ScanOutcome {
    generation: u64,
    ticket: u64,
    trigger: ScanTrigger,
    result: std::result::Result<ScanResult, LibraryError>,
}

struct ScanWorker {
    scanner: Scanner,
    settings: Arc<ReaderSettings>,
    load: LoadToggles,
    cover_stub_scheme: Option<String>,
    events: EventBus,
    phase: Arc<PhaseTracker>,
    generation: AtomicU64,
    in_flight: AtomicU64,
    requested: watch::Receiver<u64>,
    outcome: watch::Sender<RefreshOutcome>,
}

impl ScanWorker {
    fn emit(&self, event: ScanEvent) {
        // No subscribers is fine.
        let _ = self.events.emit(CoreEvent::Scan(event));
    }

    async fn run(self: Arc<Self>, trigger: ScanTrigger) -> ScanOutcome {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let superseded = self.in_flight.swap(generation, Ordering::SeqCst);
        if superseded != 0 {
            debug!(superseded, generation, "Scan superseded");
            self.emit(ScanEvent::Superseded {
                generation: superseded,
            });
        }

        let ticket = *self.requested.borrow();
        if let Err(e) = self.phase.transition(ScanPhase::Scanning) {
            warn!(error = %e, "Unexpected scan phase");
        }
        self.emit(ScanEvent::Started {
            generation,
            trigger: trigger.to_string(),
        });
        debug!(generation, %trigger, ticket, "Scan started");

        let options = self
            .settings
            .scan_filters()
            .to_options(self.load, self.cover_stub_scheme.clone());
        let result = self.scanner.scan(&options).await;

        ScanOutcome {
            generation,
            ticket,
            trigger,
            result,
        }
    }

    fn finish(&self, ctx: &StageContext<Arc<ScanResult>>, outcome: ScanOutcome) {
        let _ = self.in_flight.compare_exchange(
            outcome.generation,
            0,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        let ScanOutcome {
            generation,
            ticket,
            trigger,
            result,
        } = outcome;

        match result {
            Ok(result) => {
                let result = Arc::new(result);
                ctx.publish(Arc::clone(&result));
                if let Err(e) = self.phase.transition(ScanPhase::Published) {
                    warn!(error = %e, "Unexpected scan phase");
                }

                info!(
                    generation,
                    %trigger,
                    songs = result.songs.len(),
                    elapsed_ms = result.stats.elapsed_ms,
                    "Scan published"
                );
                self.emit(ScanEvent::Completed {
                    generation,
                    songs: result.songs.len() as u64,
                    albums: result.albums.len() as u64,
                    artists: result.artists.len() as u64,
                    rows: result.stats.rows as u64,
                    duration_ms: result.stats.elapsed_ms,
                });
                self.outcome.send_modify(|outcome| {
                    if ticket >= outcome.served {
                        outcome.served = ticket;
                        outcome.served_result = Some(result);
                    }
                });
            }
            Err(e) => {
                error!(generation, %trigger, error = %e, "Scan failed");
                if let Err(e) = self.phase.fail(ctx.replay_cache().is_some()) {
                    warn!(error = %e, "Unexpected scan phase");
                }
                self.emit(ScanEvent::Failed {
                    generation,
                    message: e.to_string(),
                    recoverable: e.is_recoverable(),
                });
                let error = Arc::new(e);
                self.outcome.send_modify(|outcome| {
                    if ticket >= outcome.failed {
                        outcome.failed = ticket;
                        outcome.error = Some(error);
                    }
                });
            }
        }
    }
}

fn launch_scan_stage(
    worker: Arc<ScanWorker>,
    audio_versions: BoxStream<'static, u64>,
    events: EventBus,
    refreshes: watch::Receiver<u64>,
) -> ReplayStage<Arc<ScanResult>> {
    ReplayStage::launch(SCAN_STAGE, None, move |ctx: StageContext<Arc<ScanResult>>| {
        let filters = worker.settings.scan_filter_changes();
        async move {
            let changes = audio_versions.inspect(move |version| {
                if *version > crate::notifier::INITIAL_VERSION {
                    let _ = events.emit(CoreEvent::Library(LibraryEvent::ChangeDetected {
                        source: MediaCollection::Audio.content_uri(),
                        version: *version,
                    }));
                }
            });
            let automatic = stream::select(
                changes.map(ScanTrigger::Change),
                filters.map(|_| ScanTrigger::Filters),
            );
            let automatic = conflate_when_paused(automatic, ctx.pause());
            let manual = watch_stream(refreshes)
                .filter(|ticket| futures::future::ready(*ticket > 0))
                .map(ScanTrigger::Refresh);

            let runner = Arc::clone(&worker);
            let mut outcomes = map_latest(stream::select(automatic, manual), move |trigger| {
                Arc::clone(&runner).run(trigger)
            });
            while let Some(outcome) = outcomes.next().await {
                worker.finish(&ctx, outcome);
            }
            debug!("Scan stage driver finished");
        }
    })
}

// =============================================================================
// Playlist stage
// =============================================================================

#[derive(Clone)]
struct PlaylistInputs {
    scan: Option<Arc<ScanResult>>,
    version: u64,
    window_secs: i64,
}

enum PlaylistInput {
    Scan(Arc<ScanResult>),
    Members(u64),
    Window(i64),
}

struct PlaylistWorker {
    fetcher: PlaylistFetcher,
    clock: Arc<dyn Clock>,
    events: EventBus,
    raw: Mutex<Option<(u64, Arc<Vec<RawPlaylist>>)>>,
}

impl PlaylistWorker {
    fn cached_raw(&self, version: u64) -> Option<Arc<Vec<RawPlaylist>>> {
        self.raw
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|(cached, _)| *cached == version)
            .map(|(_, raw)| Arc::clone(raw))
    }

    async fn run(self: Arc<Self>, inputs: PlaylistInputs) -> Option<PlaylistOutcome> {
        let scan = inputs.scan.clone()?;
        let result = self.resolve(inputs, &scan).await;
        if let Err(e) = &result {
            error!(error = %e, scan_id = %scan.scan_id, "Playlist resolution failed");
        }
        Some(PlaylistOutcome {
            scan_id: scan.scan_id,
            result: result.map_err(Arc::new),
        })
    }

    async fn resolve(
        &self,
        inputs: PlaylistInputs,
        scan: &ScanResult,
    ) -> std::result::Result<Playlists, LibraryError> {
        let raw = match self.cached_raw(inputs.version) {
            Some(raw) => raw,
            None => {
                let fetched = Arc::new(self.fetcher.fetch().await?);
                *self.raw.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some((inputs.version, Arc::clone(&fetched)));
                fetched
            }
        };

        let mut playlists = resolve_all(&raw, scan);
        let gaps = playlists.iter().filter(|playlist| playlist.has_gaps).count();
        playlists.push(Arc::new(favorite_playlist(&scan.songs)));
        playlists.push(Arc::new(recently_added_playlist(
            &scan.songs,
            self.clock.unix_timestamp(),
            inputs.window_secs,
        )));

        debug!(playlists = playlists.len(), gaps, version = inputs.version, "Playlists resolved");
        let _ = self
            .events
            .emit(CoreEvent::Library(LibraryEvent::PlaylistsReloaded {
                playlists: playlists.len() as u64,
                gaps: gaps as u64,
            }));
        Ok(Arc::new(playlists))
    }
}

fn launch_playlist_stage(
    worker: Arc<PlaylistWorker>,
    scan_stage: ReplayStage<Arc<ScanResult>>,
    parent: InvalidationHandle,
    member_versions: BoxStream<'static, u64>,
    windows: BoxStream<'static, i64>,
    initial: PlaylistInputs,
) -> ReplayStage<PlaylistOutcome> {
    ReplayStage::launch(PLAYLIST_STAGE, Some(parent), move |ctx: StageContext<PlaylistOutcome>| {
        let scans = scan_stage.subscribe(ctx.pause()).into_stream();
        async move {
            let inputs = stream::select_all([
                scans.map(PlaylistInput::Scan).boxed(),
                member_versions.map(PlaylistInput::Members).boxed(),
                windows.map(PlaylistInput::Window).boxed(),
            ])
            .scan(initial, |state, input| {
                match input {
                    PlaylistInput::Scan(scan) => state.scan = Some(scan),
                    PlaylistInput::Members(version) => state.version = version,
                    PlaylistInput::Window(secs) => state.window_secs = secs,
                }
                futures::future::ready(Some(state.clone()))
            })
            .filter(|state| futures::future::ready(state.scan.is_some()));

            let runner = Arc::clone(&worker);
            let mut outcomes = map_latest(conflate_when_paused(inputs, ctx.pause()), move |inputs| {
                Arc::clone(&runner).run(inputs)
            });
            while let Some(outcome) = outcomes.next().await {
                if let Some(outcome) = outcome {
                    ctx.publish(outcome);
                }
            }
            debug!("Playlist stage driver finished");
        }
    })
}

// =============================================================================
// Reader
// =============================================================================

/// Reactive library reader.
///
/// Every collection method takes the subscriber's own pause signal. The
/// returned stream replays the latest value on subscription; intermediate
/// values may be skipped.
pub struct LibraryReader {
    scan_stage: ReplayStage<Arc<ScanResult>>,
    playlist_stage: ReplayStage<PlaylistOutcome>,
    settings: Arc<ReaderSettings>,
    phase: Arc<PhaseTracker>,
    events: EventBus,
    refresh_requests: watch::Sender<u64>,
    refresh_outcome: watch::Receiver<RefreshOutcome>,
    _audio_notifier: ChangeNotifier,
    _playlist_notifier: ChangeNotifier,
}

impl LibraryReader {
    /// Registers change notifiers and launches both stages.
    ///
    /// Must be called from within a runtime. No scan runs until a subscriber
    /// is active or `refresh()` is called.
    pub fn new(deps: ReaderDeps) -> Result<Self> {
        let ReaderDeps {
            scanner,
            playlists,
            settings,
            clock,
            events,
            load,
            cover_stub_scheme,
        } = deps;

        let index = Arc::clone(scanner.index());
        let audio_notifier = ChangeNotifier::watch(Arc::clone(&index), MediaCollection::Audio)?;
        let playlist_notifier = ChangeNotifier::watch(index, MediaCollection::Playlists)?;

        let phase = Arc::new(PhaseTracker::new());
        let (refresh_requests, refresh_rx) = watch::channel(0u64);
        let (outcome_tx, refresh_outcome) = watch::channel(RefreshOutcome::default());

        let scan_worker = Arc::new(ScanWorker {
            scanner,
            settings: Arc::clone(&settings),
            load,
            cover_stub_scheme,
            events: events.clone(),
            phase: Arc::clone(&phase),
            generation: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            requested: refresh_rx.clone(),
            outcome: outcome_tx,
        });
        let scan_stage = launch_scan_stage(
            scan_worker,
            audio_notifier.versions(),
            events.clone(),
            refresh_rx,
        );

        let playlist_worker = Arc::new(PlaylistWorker {
            fetcher: playlists,
            clock,
            events: events.clone(),
            raw: Mutex::new(None),
        });
        let initial = PlaylistInputs {
            scan: None,
            version: playlist_notifier.current(),
            window_secs: settings.recently_added_filter_secs(),
        };
        let playlist_stage = launch_playlist_stage(
            playlist_worker,
            scan_stage.clone(),
            scan_stage.invalidation_handle(InvalidationMode::Never)?,
            playlist_notifier.versions(),
            settings.recently_added_changes(),
            initial,
        );

        settings.on_scan_filters_changed(reporting_handle(
            playlist_stage.invalidation_handle(InvalidationMode::Optional)?,
            InvalidationMode::Optional,
            events.clone(),
        ));
        settings.on_recently_added_changed(reporting_handle(
            playlist_stage.invalidation_handle(InvalidationMode::Never)?,
            InvalidationMode::Never,
            events.clone(),
        ));

        info!(load = ?load, "Library reader started");
        Ok(Self {
            scan_stage,
            playlist_stage,
            settings,
            phase,
            events,
            refresh_requests,
            refresh_outcome,
            _audio_notifier: audio_notifier,
            _playlist_notifier: playlist_notifier,
        })
    }

    /// Convenience over [`ReaderDeps::from_config`].
    pub fn from_config(config: &CoreConfig, events: EventBus) -> Result<Self> {
        Self::new(ReaderDeps::from_config(config, events))
    }

    pub fn settings(&self) -> &Arc<ReaderSettings> {
        &self.settings
    }

    // =========================================================================
    // Collections
    // =========================================================================

    /// Whole scan results.
    pub fn scan_results(&self, pause: PauseSignal) -> BoxStream<'static, Arc<ScanResult>> {
        self.scan_stage.subscribe(pause).into_stream()
    }

    fn project<T, F>(&self, pause: PauseSignal, project: F) -> BoxStream<'static, T>
    where
        T: Send + 'static,
        F: Fn(&ScanResult) -> T + Send + 'static,
    {
        self.scan_results(pause)
            .map(move |result| project(&result))
            .boxed()
    }

    pub fn songs(&self, pause: PauseSignal) -> BoxStream<'static, Arc<Vec<Arc<Song>>>> {
        self.project(pause, |result| Arc::clone(&result.songs))
    }

    pub fn albums(&self, pause: PauseSignal) -> BoxStream<'static, Arc<Vec<Arc<Album>>>> {
        self.project(pause, |result| Arc::clone(&result.albums))
    }

    pub fn album_artists(&self, pause: PauseSignal) -> BoxStream<'static, Arc<Vec<Arc<Artist>>>> {
        self.project(pause, |result| Arc::clone(&result.album_artists))
    }

    pub fn artists(&self, pause: PauseSignal) -> BoxStream<'static, Arc<Vec<Arc<Artist>>>> {
        self.project(pause, |result| Arc::clone(&result.artists))
    }

    pub fn genres(&self, pause: PauseSignal) -> BoxStream<'static, Arc<Vec<Arc<Genre>>>> {
        self.project(pause, |result| Arc::clone(&result.genres))
    }

    pub fn dates(&self, pause: PauseSignal) -> BoxStream<'static, Arc<Vec<Arc<Date>>>> {
        self.project(pause, |result| Arc::clone(&result.dates))
    }

    pub fn folder_tree(&self, pause: PauseSignal) -> BoxStream<'static, Arc<FileNode>> {
        self.project(pause, |result| Arc::clone(&result.folder_tree))
    }

    pub fn shallow_folder_tree(&self, pause: PauseSignal) -> BoxStream<'static, Arc<FileNode>> {
        self.project(pause, |result| Arc::clone(&result.shallow_tree))
    }

    pub fn folders(&self, pause: PauseSignal) -> BoxStream<'static, Arc<BTreeSet<String>>> {
        self.project(pause, |result| Arc::clone(&result.folders))
    }

    /// Stored playlists followed by the favourites and recently-added
    /// playlists.
    ///
    /// Yields `PlaylistsFailed` when the stored playlists of the latest scan
    /// could not be read, for example when a playlist file lists fewer songs
    /// than the index holds members. The stream keeps going and recovers with
    /// the next successful resolution.
    pub fn playlists(&self, pause: PauseSignal) -> BoxStream<'static, Result<Playlists>> {
        self.playlist_stage
            .subscribe(pause)
            .into_stream()
            .map(PlaylistOutcome::into_result)
            .boxed()
    }

    /// Song list changes as edits against the previous list.
    pub fn songs_incremental(&self, pause: PauseSignal) -> BoxStream<'static, IncrementalList<Arc<Song>>> {
        snapshots_to_incremental(self.songs(pause)).boxed()
    }

    pub fn albums_incremental(&self, pause: PauseSignal) -> BoxStream<'static, IncrementalList<Arc<Album>>> {
        snapshots_to_incremental(self.albums(pause)).boxed()
    }

    /// Songs of one album as edits against its previous song list.
    ///
    /// Yields `None` while no song carries `album`; `None` as the id follows
    /// the songs without an album id.
    pub fn album_songs(
        &self,
        album: Option<AlbumId>,
        pause: PauseSignal,
    ) -> BoxStream<'static, Option<IncrementalList<Arc<Song>>>> {
        let groups = group_by_incremental(self.songs_incremental(pause), |song: &Arc<Song>| {
            song.album_id
        });
        for_key(groups, album).boxed()
    }

    /// Songs of one artist, keyed like [`album_songs`](Self::album_songs).
    pub fn artist_songs(
        &self,
        artist: Option<ArtistId>,
        pause: PauseSignal,
    ) -> BoxStream<'static, Option<IncrementalList<Arc<Song>>>> {
        let groups = group_by_incremental(self.songs_incremental(pause), |song: &Arc<Song>| {
            song.artist_id
        });
        for_key(groups, artist).boxed()
    }

    /// Albums whose album artist is `artist`.
    pub fn artist_albums(
        &self,
        artist: Option<ArtistId>,
        pause: PauseSignal,
    ) -> BoxStream<'static, Option<IncrementalList<Arc<Album>>>> {
        let groups = group_by_incremental(self.albums_incremental(pause), |album: &Arc<Album>| {
            album.album_artist_id
        });
        for_key(groups, artist).boxed()
    }

    pub fn scan_phase(&self) -> BoxStream<'static, ScanPhase> {
        self.phase.watch()
    }

    pub fn current_phase(&self) -> ScanPhase {
        self.phase.current()
    }

    /// Latest cached scan result, if any.
    pub fn latest(&self) -> Option<Arc<ScanResult>> {
        self.scan_stage.replay_cache()
    }

    /// Number of scan results published so far.
    pub fn publications(&self) -> u64 {
        self.scan_stage.publications()
    }

    /// Latest cached playlists or playlist error, if any.
    pub fn latest_playlists(&self) -> Option<Result<Playlists>> {
        self.playlist_stage
            .replay_cache()
            .map(PlaylistOutcome::into_result)
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Forces a full scan and waits for its result, whether or not anything
    /// observes the reader.
    ///
    /// A scan started after this call that publishes satisfies it, even if
    /// it was triggered by something else. The result is handed out even if
    /// a filter change has cleared it from the replay caches meanwhile; the
    /// scan that filter change starts is what later calls and subscribers
    /// see.
    ///
    /// # Errors
    ///
    /// `ScanFailed` when the scan serving this request failed; the previous
    /// publication stays cached. `Shutdown` when the scan stage is gone.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<Arc<ScanResult>> {
        let mut ticket = 0;
        self.refresh_requests.send_modify(|requested| {
            *requested += 1;
            ticket = *requested;
        });
        debug!(ticket, "Refresh requested");
        let _ = self
            .events
            .emit(CoreEvent::Library(LibraryEvent::RefreshRequested { ticket }));

        let mut outcome = self.refresh_outcome.clone();
        let outcome = outcome
            .wait_for(|outcome| outcome.served >= ticket || outcome.failed >= ticket)
            .await
            .map_err(|_| ReaderError::Shutdown)?
            .clone();

        if outcome.served >= ticket {
            return outcome.served_result.ok_or(ReaderError::Shutdown);
        }
        match outcome.error {
            Some(error) => Err(ReaderError::ScanFailed(error)),
            None => Err(ReaderError::Shutdown),
        }
    }

    /// Forces a scan like [`refresh`](Self::refresh), then waits for the
    /// playlists resolved against that scan or a newer one.
    ///
    /// # Errors
    ///
    /// Whatever `refresh()` returns, plus `PlaylistsFailed` when the stored
    /// playlists could not be read.
    #[instrument(skip(self))]
    pub async fn refresh_playlists(&self) -> Result<Playlists> {
        // Registered first so the playlist stage follows the forced scan.
        let mut resolved = self.playlist_stage.subscribe_active();
        let scan = self.refresh().await?;
        loop {
            let outcome = resolved.next().await.ok_or(ReaderError::Shutdown)?;
            let newest = self.latest().map(|latest| latest.scan_id);
            if outcome.scan_id == scan.scan_id || Some(outcome.scan_id) == newest {
                return outcome.into_result();
            }
        }
    }
}

impl fmt::Debug for LibraryReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryReader")
            .field("scan_stage", &self.scan_stage)
            .field("playlist_stage", &self.playlist_stage)
            .field("phase", &self.phase.current())
            .finish()
    }
}

fn reporting_handle(
    inner: InvalidationHandle,
    mode: InvalidationMode,
    events: EventBus,
) -> InvalidationHandle {
    let stage = inner.stage().to_string();
    InvalidationHandle::new(stage.clone(), move || {
        inner.invalidate();
        let _ = events.emit(CoreEvent::Library(LibraryEvent::CacheInvalidated {
            stage: stage.clone(),
            mode: format!("{mode:?}"),
        }));
    })
}
