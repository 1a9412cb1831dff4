//! Pause signal derived from the app lifecycle: paused unless the app is in
//! the foreground.

use std::sync::Arc;

use bridge_traits::background::LifecycleObserver;
use bridge_traits::error::Result as BridgeResult;
use core_async::flow::{ManualPauseManager, PauseManager, PauseSignal};
use core_async::task::AbortOnDrop;
use tracing::debug;

/// Forwards lifecycle transitions into a pause signal for as long as it is
/// alive.
pub struct LifecyclePause {
    pause: Arc<ManualPauseManager>,
    _forwarder: AbortOnDrop,
}

impl LifecyclePause {
    pub async fn new(observer: Arc<dyn LifecycleObserver>) -> BridgeResult<Self> {
        let initial = observer.get_state().await?;
        let mut changes = observer.subscribe_changes().await?;
        let pause = Arc::new(ManualPauseManager::new(!initial.is_foreground()));

        let target = Arc::clone(&pause);
        let forwarder = AbortOnDrop::spawn(async move {
            while let Some(state) = changes.next().await {
                debug!(?state, paused = !state.is_foreground(), "Lifecycle pause update");
                target.set_paused(!state.is_foreground());
            }
        });

        Ok(Self {
            pause,
            _forwarder: forwarder,
        })
    }

    pub fn paused(&self) -> bool {
        self.pause.paused()
    }
}

impl PauseManager for LifecyclePause {
    fn is_paused(&self) -> PauseSignal {
        self.pause.is_paused()
    }
}

impl std::fmt::Debug for LifecyclePause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecyclePause")
            .field("paused", &self.paused())
            .finish()
    }
}
