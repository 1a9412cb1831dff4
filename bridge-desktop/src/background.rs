//! Lifecycle observer for desktop hosts.

use async_trait::async_trait;
use bridge_traits::{
    background::{LifecycleChangeStream, LifecycleObserver, LifecycleState},
    error::Result,
};
use core_async::sync::watch;
use tracing::debug;

/// Lifecycle observer whose state is pushed by the host (window focus and
/// minimize events) or by tests. Starts in the foreground.
#[derive(Debug)]
pub struct DesktopLifecycleObserver {
    state: watch::Sender<LifecycleState>,
}

impl DesktopLifecycleObserver {
    pub fn new() -> Self {
        let (state, _rx) = watch::channel(LifecycleState::Foreground);
        Self { state }
    }

    /// Records a transition. Repeating the current state is not a change.
    pub fn set_state(&self, next: LifecycleState) {
        let changed = self.state.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
        if changed {
            debug!(state = ?next, "Lifecycle state changed");
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }
}

impl Default for DesktopLifecycleObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LifecycleObserver for DesktopLifecycleObserver {
    async fn get_state(&self) -> Result<LifecycleState> {
        Ok(self.state())
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn LifecycleChangeStream>> {
        Ok(Box::new(DesktopLifecycleChangeStream {
            rx: self.state.subscribe(),
        }))
    }
}

/// Yields each state transition after subscription.
struct DesktopLifecycleChangeStream {
    rx: watch::Receiver<LifecycleState>,
}

#[async_trait]
impl LifecycleChangeStream for DesktopLifecycleChangeStream {
    async fn next(&mut self) -> Option<LifecycleState> {
        self.rx.changed().await.ok()?;
        let state = *self.rx.borrow_and_update();
        Some(state)
    }
}
