//! # Change Notifier
//!
//! Turns media index change pings into a version counter.
//!
//! The counter starts at `1`, so a fresh subscriber always sees the current
//! state as one change. Every ping delivered by the index bumps it by one.
//! The counter lives in a `watch` channel: pings that arrive while nobody
//! polls are kept as the latest version instead of being lost, and several
//! such pings collapse into a single observed bump.

use std::fmt;
use std::sync::Arc;

use bridge_traits::media_index::{
    ChangeNotification, ChangeObserver, MediaCollection, MediaIndex, ObserverId,
};
use core_async::flow::watch_stream;
use core_async::sync::watch;
use core_library::LibraryError;
use futures::stream::BoxStream;
use tracing::{debug, trace};

/// Version the counter starts at.
pub const INITIAL_VERSION: u64 = 1;

struct VersionObserver {
    collection: MediaCollection,
    version: watch::Sender<u64>,
}

impl ChangeObserver for VersionObserver {
    fn on_change(&self, notification: &ChangeNotification) {
        self.version.send_modify(|version| *version += 1);
        trace!(
            collection = %self.collection,
            version = *self.version.borrow(),
            uris = notification.uris.len(),
            "Change ping"
        );
    }
}

/// One registration with the media index.
///
/// Dropping the notifier unregisters it; the version streams it handed out
/// end at that point.
pub struct ChangeNotifier {
    collection: MediaCollection,
    index: Arc<dyn MediaIndex>,
    observer_id: ObserverId,
    version: watch::Receiver<u64>,
}

impl ChangeNotifier {
    /// Registers for changes to `collection` and its descendants.
    pub fn watch(
        index: Arc<dyn MediaIndex>,
        collection: MediaCollection,
    ) -> Result<Self, LibraryError> {
        let (tx, version) = watch::channel(INITIAL_VERSION);
        let observer = Arc::new(VersionObserver {
            collection,
            version: tx,
        });
        let observer_id = index.register_observer(collection, true, observer)?;
        debug!(%collection, ?observer_id, "Registered change notifier");

        Ok(Self {
            collection,
            index,
            observer_id,
            version,
        })
    }

    pub fn collection(&self) -> MediaCollection {
        self.collection
    }

    /// Latest version.
    pub fn current(&self) -> u64 {
        *self.version.borrow()
    }

    /// Yields the latest version immediately, then every newer one.
    ///
    /// Each call starts a fresh stream; versions skipped while the stream
    /// was not polled are not replayed.
    pub fn versions(&self) -> BoxStream<'static, u64> {
        watch_stream(self.version.clone())
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        self.index.unregister_observer(self.observer_id);
        debug!(collection = %self.collection, observer_id = ?self.observer_id, "Unregistered change notifier");
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("collection", &self.collection)
            .field("observer_id", &self.observer_id)
            .field("version", &self.current())
            .finish()
    }
}
