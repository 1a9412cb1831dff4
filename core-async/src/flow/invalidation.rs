//! Replay-cache invalidation.
//!
//! A downstream stage that knows its inputs went stale can tell the stage
//! feeding it to drop its cached value. Handles are passed explicitly at
//! construction; a stage without a parent simply holds `None`.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{FlowError, Result};

/// How far an invalidation travels upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidationMode {
    /// Propagate to the parent; a missing parent is a wiring error.
    Required,
    /// Propagate to the parent if there is one.
    Optional,
    /// Stop here.
    Never,
}

/// Callback that clears one stage's replay cache (and whatever that stage
/// chooses to propagate further).
#[derive(Clone)]
pub struct InvalidationHandle {
    stage: Arc<str>,
    invalidate: Arc<dyn Fn() + Send + Sync>,
}

impl InvalidationHandle {
    pub fn new<F>(stage: impl Into<Arc<str>>, invalidate: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            stage: stage.into(),
            invalidate: Arc::new(invalidate),
        }
    }

    /// Name of the stage this handle clears.
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Clears the target cache. Clearing an already-empty cache is a no-op.
    pub fn invalidate(&self) {
        debug!(stage = %self.stage, "Invalidating replay cache");
        (self.invalidate)();
    }
}

impl fmt::Debug for InvalidationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationHandle")
            .field("stage", &self.stage)
            .finish()
    }
}

/// Returns the parent handle, failing when `mode` is `Required` and there is
/// none. `Never` always yields `None`.
pub fn resolve_parent<'a>(
    stage: &str,
    parent: Option<&'a InvalidationHandle>,
    mode: InvalidationMode,
) -> Result<Option<&'a InvalidationHandle>> {
    match mode {
        InvalidationMode::Never => Ok(None),
        InvalidationMode::Optional => Ok(parent),
        InvalidationMode::Required => parent.map(Some).ok_or_else(|| {
            FlowError::InvalidationUnavailable {
                stage: stage.to_string(),
            }
        }),
    }
}

/// Forwards an invalidation to `parent` according to `mode`.
pub fn propagate(
    stage: &str,
    parent: Option<&InvalidationHandle>,
    mode: InvalidationMode,
) -> Result<()> {
    if let Some(parent) = resolve_parent(stage, parent, mode)? {
        parent.invalidate();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handle() -> (InvalidationHandle, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = InvalidationHandle::new("parent", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (handle, calls)
    }

    #[test]
    fn test_required_without_parent_fails() {
        let err = propagate("child", None, InvalidationMode::Required).unwrap_err();
        assert_eq!(
            err,
            FlowError::InvalidationUnavailable {
                stage: "child".to_string()
            }
        );
    }

    #[test]
    fn test_optional_without_parent_is_noop() {
        assert!(propagate("child", None, InvalidationMode::Optional).is_ok());
    }

    #[test]
    fn test_modes_reach_parent() {
        let (handle, calls) = counting_handle();

        propagate("child", Some(&handle), InvalidationMode::Required).unwrap();
        propagate("child", Some(&handle), InvalidationMode::Optional).unwrap();
        propagate("child", Some(&handle), InvalidationMode::Never).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
