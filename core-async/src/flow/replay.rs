//! Replay-1 multicast stages.
//!
//! A [`ReplayStage`] owns a driver task that computes values and publishes
//! them into a single-slot replay cache. Subscribers receive the cached value
//! immediately and every later publication (intermediate values may be
//! skipped when a subscriber falls behind).
//!
//! Each subscription registers its own pause signal with the stage's
//! [`CountingPauseManager`]; the driver reads the aggregate through
//! [`StageContext::pause`] and is expected to stop starting new work while it
//! is set. A stage with no subscribers is therefore frozen at its last
//! publication.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::invalidation::{resolve_parent, InvalidationHandle, InvalidationMode};
use super::pause::{CountingPauseManager, PauseManager, PauseRegistration, PauseSignal};
use crate::error::Result;
use crate::task::AbortOnDrop;

struct StageShared<T> {
    name: Arc<str>,
    cache: watch::Sender<Option<T>>,
    pause: CountingPauseManager,
    parent: Option<InvalidationHandle>,
    publications: AtomicU64,
}

impl<T> StageShared<T> {
    fn publish(&self, value: T) -> u64 {
        self.cache.send_replace(Some(value));
        self.publications.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn clear(&self) -> bool {
        self.cache.send_if_modified(|cached| cached.take().is_some())
    }

    fn invalidate(&self, mode: InvalidationMode) -> Result<()> {
        let parent = resolve_parent(&self.name, self.parent.as_ref(), mode)?;
        let cleared = self.clear();
        debug!(stage = %self.name, cleared, ?mode, "Replay cache invalidated");
        if let Some(parent) = parent {
            parent.invalidate();
        }
        Ok(())
    }
}

struct StageInner<T> {
    shared: Arc<StageShared<T>>,
    driver: AbortOnDrop,
}

/// A named, replay-1, pause-aware multicast stage.
pub struct ReplayStage<T> {
    inner: Arc<StageInner<T>>,
}

impl<T> Clone for ReplayStage<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> ReplayStage<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawns the stage driver.
    ///
    /// `parent` is the invalidation handle of the stage this one reads from,
    /// if any. The driver runs until it returns or every handle to the stage
    /// is dropped.
    pub fn launch<F, Fut>(
        name: impl Into<Arc<str>>,
        parent: Option<InvalidationHandle>,
        driver: F,
    ) -> Self
    where
        F: FnOnce(StageContext<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cache, _rx) = watch::channel(None);
        let shared = Arc::new(StageShared {
            name: name.into(),
            cache,
            pause: CountingPauseManager::new(),
            parent,
            publications: AtomicU64::new(0),
        });
        debug!(stage = %shared.name, "Launching replay stage");

        let context = StageContext {
            shared: Arc::clone(&shared),
        };
        let driver = AbortOnDrop::spawn(driver(context));

        Self {
            inner: Arc::new(StageInner { shared, driver }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.shared.name
    }

    /// Subscribes with the caller's own pause signal.
    pub fn subscribe(&self, pause: PauseSignal) -> Subscription<T> {
        let registration = self.inner.shared.pause.register(pause);
        Subscription {
            rx: self.inner.shared.cache.subscribe(),
            primed: false,
            _registration: registration,
        }
    }

    /// Subscribes as an observer that is never paused.
    pub fn subscribe_active(&self) -> Subscription<T> {
        let registration = self.inner.shared.pause.register_active();
        Subscription {
            rx: self.inner.shared.cache.subscribe(),
            primed: false,
            _registration: registration,
        }
    }

    /// The cached value, if any.
    pub fn replay_cache(&self) -> Option<T> {
        self.inner.shared.cache.borrow().clone()
    }

    /// Number of values published since launch.
    pub fn publications(&self) -> u64 {
        self.inner.shared.publications.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.shared.pause.observer_count()
    }

    /// Aggregate pause signal of this stage's subscribers.
    pub fn pause_signal(&self) -> PauseSignal {
        self.inner.shared.pause.is_paused()
    }

    pub fn is_running(&self) -> bool {
        !self.inner.driver.is_finished()
    }

    /// Clears the cache and forwards the invalidation upstream per `mode`.
    pub fn invalidate(&self, mode: InvalidationMode) -> Result<()> {
        self.inner.shared.invalidate(mode)
    }

    /// Returns a handle that invalidates this stage with `mode`, suitable as
    /// the `parent` of a downstream stage.
    ///
    /// Fails immediately when `mode` is `Required` and this stage has no
    /// parent of its own.
    pub fn invalidation_handle(&self, mode: InvalidationMode) -> Result<InvalidationHandle> {
        let shared = &self.inner.shared;
        resolve_parent(&shared.name, shared.parent.as_ref(), mode)?;

        let weak: Weak<StageShared<T>> = Arc::downgrade(shared);
        Ok(InvalidationHandle::new(Arc::clone(&shared.name), move || {
            if let Some(shared) = weak.upgrade() {
                if let Err(e) = shared.invalidate(mode) {
                    warn!(stage = %shared.name, error = %e, "Invalidation propagation failed");
                }
            }
        }))
    }
}

impl<T> std::fmt::Debug for ReplayStage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayStage")
            .field("name", &self.inner.shared.name)
            .field("publications", &self.inner.shared.publications)
            .finish()
    }
}

/// The driver's view of its stage.
pub struct StageContext<T> {
    shared: Arc<StageShared<T>>,
}

impl<T> StageContext<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Aggregate pause signal: set while no subscriber is active.
    pub fn pause(&self) -> PauseSignal {
        self.shared.pause.is_paused()
    }

    /// Replaces the cached value and notifies subscribers. Returns the
    /// publication count.
    pub fn publish(&self, value: T) -> u64 {
        self.shared.publish(value)
    }

    pub fn replay_cache(&self) -> Option<T> {
        self.shared.cache.borrow().clone()
    }

    pub fn parent(&self) -> Option<&InvalidationHandle> {
        self.shared.parent.as_ref()
    }

    pub fn invalidate(&self, mode: InvalidationMode) -> Result<()> {
        self.shared.invalidate(mode)
    }
}

/// A live subscription to a [`ReplayStage`].
///
/// Dropping it unregisters the subscriber's pause signal.
pub struct Subscription<T> {
    rx: watch::Receiver<Option<T>>,
    primed: bool,
    _registration: PauseRegistration,
}

impl<T> Subscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Waits for the next value. The first call returns the replayed value
    /// when the cache holds one. Returns `None` once the stage is gone.
    pub async fn next(&mut self) -> Option<T> {
        if !self.primed {
            self.primed = true;
            if let Some(value) = self.rx.borrow_and_update().clone() {
                return Some(value);
            }
        }

        loop {
            self.rx.changed().await.ok()?;
            // An invalidation also notifies; skip the empty slot.
            if let Some(value) = self.rx.borrow_and_update().clone() {
                return Some(value);
            }
        }
    }

    /// The currently cached value without waiting.
    pub fn current(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    pub fn into_stream(self) -> BoxStream<'static, T> {
        stream::unfold(self, |mut subscription| async move {
            let value = subscription.next().await?;
            Some((value, subscription))
        })
        .boxed()
    }
}
