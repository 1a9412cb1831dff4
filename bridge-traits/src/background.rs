//! Application lifecycle.
//!
//! The reader treats a backgrounded app as an observer that does not want
//! new work: streams subscribed with a lifecycle-derived pause signal stop
//! triggering rescans until the app returns to the foreground.

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// At least one screen is visible
    Foreground,
    Background,
    /// The host is about to freeze the process
    Suspended,
}

impl LifecycleState {
    /// Whether UI consumers are visible in this state.
    pub fn is_foreground(&self) -> bool {
        matches!(self, LifecycleState::Foreground)
    }
}

/// Source of lifecycle transitions.
///
/// # Platform Support
///
/// - **Android**: process lifecycle owner callbacks
/// - **Desktop**: window focus/minimize events
///
/// # Example
///
/// ```ignore
/// let mut changes = observer.subscribe_changes().await?;
/// while let Some(state) = changes.next().await {
///     pause.set_paused(!state.is_foreground());
/// }
/// ```
#[async_trait::async_trait]
pub trait LifecycleObserver: Send + Sync {
    async fn get_state(&self) -> Result<LifecycleState>;

    /// Changes after the call; the current state is not repeated.
    async fn subscribe_changes(&self) -> Result<Box<dyn LifecycleChangeStream>>;
}

#[async_trait::async_trait]
pub trait LifecycleChangeStream: Send {
    /// `None` once the observer is gone.
    async fn next(&mut self) -> Option<LifecycleState>;
}
