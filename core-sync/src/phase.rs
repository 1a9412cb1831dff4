//! # Scan Phase State Machine
//!
//! Tracks where the scan stage is with validated transitions.
//!
//! ## State Machine
//!
//! ```text
//! Idle ──→ Scanning ──→ Published
//!   ↑        │  ↺  ↑        │
//!   └────────┘     └────────┘
//! ```
//!
//! `Scanning → Scanning` is a superseded scan restarting. A failed scan
//! returns to `Published` when an earlier result is still cached, otherwise
//! to `Idle`.

use std::fmt;

use core_async::flow::watch_stream;
use core_async::sync::watch;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{ReaderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    /// Nothing published yet and no scan running
    Idle,
    /// A scan is running
    Scanning,
    /// The latest scan result is cached
    Published,
}

impl ScanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::Idle => "idle",
            ScanPhase::Scanning => "scanning",
            ScanPhase::Published => "published",
        }
    }

    pub fn can_transition_to(&self, to: ScanPhase) -> bool {
        matches!(
            (self, to),
            (ScanPhase::Idle, ScanPhase::Scanning)
                | (ScanPhase::Scanning, ScanPhase::Scanning)
                | (ScanPhase::Scanning, ScanPhase::Published)
                | (ScanPhase::Scanning, ScanPhase::Idle)
                | (ScanPhase::Published, ScanPhase::Scanning)
        )
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of the current phase; observers read it through [`PhaseTracker::watch`].
#[derive(Debug)]
pub struct PhaseTracker {
    phase: watch::Sender<ScanPhase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        let (phase, _rx) = watch::channel(ScanPhase::Idle);
        Self { phase }
    }

    pub fn current(&self) -> ScanPhase {
        *self.phase.borrow()
    }

    /// Moves to `to`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` without changing the phase when the state
    /// machine does not allow the move.
    pub fn transition(&self, to: ScanPhase) -> Result<()> {
        let mut rejected = None;
        self.phase.send_if_modified(|current| {
            if !current.can_transition_to(to) {
                rejected = Some(*current);
                return false;
            }
            trace!(from = %current, %to, "Scan phase transition");
            let changed = *current != to;
            *current = to;
            changed
        });

        match rejected {
            Some(from) => Err(ReaderError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Phase after a failed scan.
    pub fn fail(&self, has_published: bool) -> Result<()> {
        self.transition(if has_published {
            ScanPhase::Published
        } else {
            ScanPhase::Idle
        })
    }

    /// Yields the current phase, then every change.
    pub fn watch(&self) -> BoxStream<'static, ScanPhase> {
        watch_stream(self.phase.subscribe())
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_happy_path() {
        let tracker = PhaseTracker::new();
        assert_eq!(tracker.current(), ScanPhase::Idle);

        tracker.transition(ScanPhase::Scanning).unwrap();
        tracker.transition(ScanPhase::Published).unwrap();
        tracker.transition(ScanPhase::Scanning).unwrap();
        tracker.transition(ScanPhase::Scanning).unwrap();
        tracker.transition(ScanPhase::Published).unwrap();
        assert_eq!(tracker.current(), ScanPhase::Published);
    }

    #[test]
    fn test_invalid_transition_keeps_phase() {
        let tracker = PhaseTracker::new();
        let err = tracker.transition(ScanPhase::Published).unwrap_err();
        assert!(matches!(
            err,
            ReaderError::InvalidTransition { ref from, ref to } if from == "idle" && to == "published"
        ));
        assert_eq!(tracker.current(), ScanPhase::Idle);
    }

    #[test]
    fn test_failure_returns_to_previous_rest_state() {
        let tracker = PhaseTracker::new();
        tracker.transition(ScanPhase::Scanning).unwrap();
        tracker.fail(false).unwrap();
        assert_eq!(tracker.current(), ScanPhase::Idle);

        tracker.transition(ScanPhase::Scanning).unwrap();
        tracker.fail(true).unwrap();
        assert_eq!(tracker.current(), ScanPhase::Published);
    }

    #[tokio::test]
    async fn test_watch_sees_changes() {
        let tracker = PhaseTracker::new();
        let mut phases = tracker.watch();
        assert_eq!(phases.next().await, Some(ScanPhase::Idle));

        tracker.transition(ScanPhase::Scanning).unwrap();
        assert_eq!(phases.next().await, Some(ScanPhase::Scanning));
    }
}
