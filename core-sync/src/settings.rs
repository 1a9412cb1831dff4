//! # Reader Settings
//!
//! Live filter values. Each filter has its own `watch` channel; setting a
//! value equal to the current one is not a change and notifies nobody.
//!
//! Invalidation hooks registered with [`ReaderSettings::on_scan_filters_changed`]
//! and [`ReaderSettings::on_recently_added_changed`] run before the new value
//! becomes visible, so a stage can never publish a result for the new value
//! and then have it cleared by the hook.

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use core_async::flow::{distinct_watch_stream, watch_stream, InvalidationHandle};
use core_async::sync::watch;
use core_library::{LibraryError, ScanOptions};
use core_runtime::config::{LibraryPreferences, LoadToggles};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use tracing::debug;

use crate::Result;

/// The filters a scan reads when it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilters {
    pub min_song_length_secs: u64,
    pub blacklisted_folders: BTreeSet<String>,
    pub enhanced_covers: Option<bool>,
    pub include_extra_formats: bool,
}

impl ScanFilters {
    pub fn to_options(&self, load: LoadToggles, cover_stub_scheme: Option<String>) -> ScanOptions {
        ScanOptions {
            min_song_length_secs: self.min_song_length_secs,
            blacklisted_folders: self.blacklisted_folders.clone(),
            enhanced_covers: self.enhanced_covers,
            include_extra_formats: self.include_extra_formats,
            load,
            cover_stub_scheme,
        }
    }
}

#[derive(Default)]
struct Hooks {
    scan_filters: Vec<InvalidationHandle>,
    recently_added: Vec<InvalidationHandle>,
}

pub struct ReaderSettings {
    min_song_length_secs: watch::Sender<u64>,
    blacklisted_folders: watch::Sender<BTreeSet<String>>,
    enhanced_covers: watch::Sender<Option<bool>>,
    include_extra_formats: watch::Sender<bool>,
    recently_added_filter_secs: watch::Sender<i64>,
    hooks: Mutex<Hooks>,
}

impl ReaderSettings {
    pub fn new(preferences: LibraryPreferences) -> Self {
        Self {
            min_song_length_secs: watch::Sender::new(preferences.min_song_length_secs),
            blacklisted_folders: watch::Sender::new(preferences.blacklisted_folders),
            enhanced_covers: watch::Sender::new(preferences.enhanced_covers),
            include_extra_formats: watch::Sender::new(preferences.include_extra_formats),
            recently_added_filter_secs: watch::Sender::new(preferences.recently_added_filter_secs),
            hooks: Mutex::new(Hooks::default()),
        }
    }

    // =========================================================================
    // Hooks
    // =========================================================================

    /// Runs `handle` before any scan-affecting filter changes.
    pub fn on_scan_filters_changed(&self, handle: InvalidationHandle) {
        self.lock_hooks().scan_filters.push(handle);
    }

    /// Runs `handle` before the recently-added window changes.
    pub fn on_recently_added_changed(&self, handle: InvalidationHandle) {
        self.lock_hooks().recently_added.push(handle);
    }

    fn lock_hooks(&self) -> std::sync::MutexGuard<'_, Hooks> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scan_hooks(&self) -> Vec<InvalidationHandle> {
        self.lock_hooks().scan_filters.clone()
    }

    // =========================================================================
    // Setters
    // =========================================================================

    /// Returns whether the value changed.
    pub fn set_min_song_length_secs(&self, secs: u64) -> bool {
        update(&self.min_song_length_secs, secs, &self.scan_hooks(), "min_song_length_secs")
    }

    pub fn set_blacklisted_folders(&self, folders: BTreeSet<String>) -> bool {
        update(&self.blacklisted_folders, folders, &self.scan_hooks(), "blacklisted_folders")
    }

    pub fn add_blacklisted_folder(&self, folder: impl Into<String>) -> bool {
        let mut folders = self.blacklisted_folders.borrow().clone();
        folders.insert(folder.into());
        self.set_blacklisted_folders(folders)
    }

    pub fn remove_blacklisted_folder(&self, folder: &str) -> bool {
        let mut folders = self.blacklisted_folders.borrow().clone();
        folders.remove(folder);
        self.set_blacklisted_folders(folders)
    }

    pub fn set_enhanced_covers(&self, enhanced: Option<bool>) -> bool {
        update(&self.enhanced_covers, enhanced, &self.scan_hooks(), "enhanced_covers")
    }

    pub fn set_include_extra_formats(&self, include: bool) -> bool {
        update(&self.include_extra_formats, include, &self.scan_hooks(), "include_extra_formats")
    }

    /// # Errors
    ///
    /// Rejects a negative window.
    pub fn set_recently_added_filter_secs(&self, secs: i64) -> Result<bool> {
        if secs < 0 {
            return Err(LibraryError::ConfigurationMisuse(format!(
                "Recently added window cannot be negative, got {secs}"
            ))
            .into());
        }
        let hooks = self.lock_hooks().recently_added.clone();
        Ok(update(
            &self.recently_added_filter_secs,
            secs,
            &hooks,
            "recently_added_filter_secs",
        ))
    }

    // =========================================================================
    // Readers
    // =========================================================================

    pub fn scan_filters(&self) -> ScanFilters {
        ScanFilters {
            min_song_length_secs: *self.min_song_length_secs.borrow(),
            blacklisted_folders: self.blacklisted_folders.borrow().clone(),
            enhanced_covers: *self.enhanced_covers.borrow(),
            include_extra_formats: *self.include_extra_formats.borrow(),
        }
    }

    pub fn recently_added_filter_secs(&self) -> i64 {
        *self.recently_added_filter_secs.borrow()
    }

    pub fn snapshot(&self) -> LibraryPreferences {
        let filters = self.scan_filters();
        LibraryPreferences {
            min_song_length_secs: filters.min_song_length_secs,
            blacklisted_folders: filters.blacklisted_folders,
            enhanced_covers: filters.enhanced_covers,
            include_extra_formats: filters.include_extra_formats,
            recently_added_filter_secs: self.recently_added_filter_secs(),
        }
    }

    /// Yields the current scan filters, then the filters after every change
    /// to any of them.
    pub fn scan_filter_changes(&self) -> BoxStream<'static, ScanFilters> {
        let min = self.min_song_length_secs.subscribe();
        let blacklist = self.blacklisted_folders.subscribe();
        let enhanced = self.enhanced_covers.subscribe();
        let extra = self.include_extra_formats.subscribe();

        let pings = stream::select_all([
            ping(min.clone()),
            ping(blacklist.clone()),
            ping(enhanced.clone()),
            ping(extra.clone()),
        ]);
        let filters = pings.map(move |()| ScanFilters {
            min_song_length_secs: *min.borrow(),
            blacklisted_folders: blacklist.borrow().clone(),
            enhanced_covers: *enhanced.borrow(),
            include_extra_formats: *extra.borrow(),
        });
        distinct(filters).boxed()
    }

    pub fn recently_added_changes(&self) -> BoxStream<'static, i64> {
        distinct_watch_stream(self.recently_added_filter_secs.subscribe())
    }
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self::new(LibraryPreferences::default())
    }
}

impl std::fmt::Debug for ReaderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderSettings")
            .field("preferences", &self.snapshot())
            .finish()
    }
}

fn update<T: PartialEq>(
    tx: &watch::Sender<T>,
    value: T,
    hooks: &[InvalidationHandle],
    filter: &'static str,
) -> bool {
    if *tx.borrow() == value {
        return false;
    }
    for hook in hooks {
        hook.invalidate();
    }
    tx.send_replace(value);
    debug!(filter, hooks = hooks.len(), "Reader setting changed");
    true
}

fn ping<T>(rx: watch::Receiver<T>) -> BoxStream<'static, ()>
where
    T: Clone + Send + Sync + 'static,
{
    watch_stream(rx).map(|_| ()).boxed()
}

fn distinct<S>(upstream: S) -> impl Stream<Item = S::Item>
where
    S: Stream,
    S::Item: Clone + PartialEq,
{
    upstream
        .scan(None::<S::Item>, |last, value| {
            let emit = last.as_ref() != Some(&value);
            *last = Some(value.clone());
            futures::future::ready(Some(emit.then_some(value)))
        })
        .filter_map(futures::future::ready)
}
