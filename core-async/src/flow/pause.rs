//! Pause signals.
//!
//! A pause signal is a `watch` channel of `bool` where `true` means "nobody
//! wants new work right now". Producers hold the sender side through one of
//! the [`PauseManager`] implementations; consumers read it through a
//! [`PauseSignal`].
//!
//! A signal whose sender has been dropped keeps its last value. The flow
//! primitives treat a closed signal as unpaused, since nothing can ever
//! resume it otherwise.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::trace;

use crate::task::AbortOnDrop;

/// Receiving side of a pause signal.
pub type PauseSignal = watch::Receiver<bool>;

/// Source of a pause signal.
pub trait PauseManager: Send + Sync {
    /// Subscribes to the pause state. The current value is available
    /// immediately through `borrow()`.
    fn is_paused(&self) -> PauseSignal;
}

/// Reads the current value of `signal`, treating a closed signal as
/// unpaused.
pub fn currently_paused(signal: &mut PauseSignal) -> bool {
    if signal.has_changed().is_err() {
        return false;
    }
    *signal.borrow_and_update()
}

/// Waits until `signal` reports unpaused (or closes).
pub async fn wait_until_unpaused(signal: &mut PauseSignal) {
    // `wait_for` errors once the sender is gone, which counts as unpaused.
    let _ = signal.wait_for(|paused| !*paused).await;
}

// ============================================================================
// Fixed and manual managers
// ============================================================================

/// A pause manager that is never paused.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverPaused;

impl PauseManager for NeverPaused {
    fn is_paused(&self) -> PauseSignal {
        let (_tx, rx) = watch::channel(false);
        rx
    }
}

/// A pause manager toggled explicitly by its owner.
#[derive(Debug)]
pub struct ManualPauseManager {
    tx: watch::Sender<bool>,
}

impl ManualPauseManager {
    pub fn new(paused: bool) -> Self {
        let (tx, _rx) = watch::channel(paused);
        Self { tx }
    }

    pub fn set_paused(&self, paused: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != paused;
            *current = paused;
            changed
        });
    }

    pub fn paused(&self) -> bool {
        *self.tx.borrow()
    }
}

impl PauseManager for ManualPauseManager {
    fn is_paused(&self) -> PauseSignal {
        self.tx.subscribe()
    }
}

// ============================================================================
// Counting manager
// ============================================================================

/// Aggregates the pause signals of every registered observer.
///
/// The aggregate is paused when there are no registered observers or when
/// every registered observer is paused. A replay stage uses one of these to
/// decide whether its upstream should do any work at all.
#[derive(Clone)]
pub struct CountingPauseManager {
    shared: Arc<CountingShared>,
}

struct CountingShared {
    state: Mutex<CountingState>,
    out: watch::Sender<bool>,
}

#[derive(Default)]
struct CountingState {
    next_id: u64,
    inputs: HashMap<u64, Observer>,
}

struct Observer {
    signal: PauseSignal,
    _forwarder: AbortOnDrop,
}

impl CountingShared {
    fn recompute(&self) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let paused = state
            .inputs
            .values()
            .all(|observer| observer_paused(&observer.signal));
        let observers = state.inputs.len();
        drop(state);

        self.out.send_if_modified(|current| {
            if *current == paused {
                return false;
            }
            trace!(paused, observers, "Aggregate pause state changed");
            *current = paused;
            true
        });
    }
}

fn observer_paused(signal: &PauseSignal) -> bool {
    // A closed observer signal counts as unpaused.
    signal.has_changed().is_ok() && *signal.borrow()
}

impl CountingPauseManager {
    pub fn new() -> Self {
        let (out, _rx) = watch::channel(true);
        Self {
            shared: Arc::new(CountingShared {
                state: Mutex::new(CountingState::default()),
                out,
            }),
        }
    }

    /// Registers an observer with its own pause signal.
    ///
    /// The observer counts towards the aggregate until the returned
    /// registration is dropped. Must be called from within a runtime.
    pub fn register(&self, signal: PauseSignal) -> PauseRegistration {
        let mut watcher = signal.clone();
        let weak = Arc::downgrade(&self.shared);
        let forwarder = AbortOnDrop::spawn(async move {
            while watcher.changed().await.is_ok() {
                match weak.upgrade() {
                    Some(shared) => shared.recompute(),
                    None => return,
                }
            }
            if let Some(shared) = weak.upgrade() {
                shared.recompute();
            }
        });

        let id = {
            let mut state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let id = state.next_id;
            state.next_id += 1;
            state.inputs.insert(
                id,
                Observer {
                    signal,
                    _forwarder: forwarder,
                },
            );
            id
        };
        self.shared.recompute();

        PauseRegistration {
            id,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Registers an observer that is never paused.
    pub fn register_active(&self) -> PauseRegistration {
        self.register(NeverPaused.is_paused())
    }

    pub fn observer_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .inputs
            .len()
    }
}

impl Default for CountingPauseManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseManager for CountingPauseManager {
    fn is_paused(&self) -> PauseSignal {
        self.shared.out.subscribe()
    }
}

impl std::fmt::Debug for CountingPauseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountingPauseManager")
            .field("observers", &self.observer_count())
            .field("paused", &*self.shared.out.borrow())
            .finish()
    }
}

/// Keeps an observer registered with a [`CountingPauseManager`].
pub struct PauseRegistration {
    id: u64,
    shared: Arc<CountingShared>,
}

impl Drop for PauseRegistration {
    fn drop(&mut self) {
        let removed = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .inputs
            .remove(&self.id);
        // The forwarder is aborted outside the lock.
        drop(removed);
        self.shared.recompute();
    }
}

impl std::fmt::Debug for PauseRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PauseRegistration")
            .field("id", &self.id)
            .finish()
    }
}
