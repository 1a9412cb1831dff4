//! # Event Bus System
//!
//! Broadcasts what the reader pipeline is doing, using
//! `tokio::sync::broadcast`. Hosts use it for diagnostics and progress
//! indicators; the collection streams themselves never depend on it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    emit     ┌───────────┐   subscribe   ┌────────────┐
//! │ scan stage   ├────────────>│           ├──────────────>│ Subscriber │
//! └──────────────┘             │ EventBus  │               └────────────┘
//! ┌──────────────┐    emit     │ (broadcast│   subscribe   ┌────────────┐
//! │ playlists    ├────────────>│  channel) ├──────────────>│ Subscriber │
//! └──────────────┘             └───────────┘               └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, ScanEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Scan(ScanEvent::Started { generation: 1, trigger: "change".into() })).ok();
//! assert!(matches!(rx.recv().await, Ok(CoreEvent::Scan(ScanEvent::Started { .. }))));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; it can keep
//!   receiving.
//! - **`RecvError::Closed`**: every sender is gone; treat it as shutdown.
//!
//! Emitting with no subscribers returns an error that callers ignore.

use std::fmt;

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Bulk scan lifecycle.
    Scan(ScanEvent),
    /// Change notifications, playlist reloads, invalidations.
    Library(LibraryEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Scan(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Scan(ScanEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Scan(ScanEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Library(LibraryEvent::PlaylistsReloaded { gaps, .. }) if *gaps > 0 => {
                EventSeverity::Warning
            }
            CoreEvent::Library(LibraryEvent::RefreshRequested { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Scan Events
// ============================================================================

/// One bulk scan, identified by its generation number (1 for the first scan
/// a reader runs).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ScanEvent {
    Started {
        generation: u64,
        /// What asked for the scan: `change`, `config` or `refresh`.
        trigger: String,
    },
    Completed {
        generation: u64,
        songs: u64,
        albums: u64,
        artists: u64,
        /// Rows read from the index, including skipped songs.
        rows: u64,
        duration_ms: u64,
    },
    Failed {
        generation: u64,
        message: String,
        /// Permission failures can succeed later; inconsistencies cannot.
        recoverable: bool,
    },
    /// A newer trigger arrived while this scan was running; its result was
    /// discarded.
    Superseded { generation: u64 },
}

impl ScanEvent {
    fn description(&self) -> &str {
        match self {
            ScanEvent::Started { .. } => "Library scan started",
            ScanEvent::Completed { .. } => "Library scan completed",
            ScanEvent::Failed { .. } => "Library scan failed",
            ScanEvent::Superseded { .. } => "Library scan superseded",
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            ScanEvent::Started { generation, .. }
            | ScanEvent::Completed { generation, .. }
            | ScanEvent::Failed { generation, .. }
            | ScanEvent::Superseded { generation } => *generation,
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// The media index reported a change.
    ChangeDetected {
        /// `songs` or `playlists`.
        source: String,
        version: u64,
    },
    PlaylistsReloaded {
        playlists: u64,
        /// Playlists with at least one unresolved member.
        gaps: u64,
    },
    RefreshRequested { ticket: u64 },
    CacheInvalidated { stage: String, mode: String },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::ChangeDetected { .. } => "Media index changed",
            LibraryEvent::PlaylistsReloaded { .. } => "Playlists reloaded",
            LibraryEvent::RefreshRequested { .. } => "Manual refresh requested",
            LibraryEvent::CacheInvalidated { .. } => "Replay cache invalidated",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel. Cheap to clone; all clones share the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a bus that buffers `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes to all current subscribers and returns how many there were.
    /// Fails when nobody is subscribed.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let scans_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Scan(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Next event passing the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing
    /// matching is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(generation: u64) -> CoreEvent {
        CoreEvent::Scan(ScanEvent::Completed {
            generation,
            songs: 120,
            albums: 12,
            artists: 8,
            rows: 125,
            duration_ms: 40,
        })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_emission_without_subscribers_fails() {
        let bus = EventBus::new(10);
        assert!(bus.emit(completed(1)).is_err());
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        assert_eq!(bus.emit(completed(3)).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), completed(3));
        assert_eq!(sub2.recv().await.unwrap(), completed(3));
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Library(_)));

        bus.emit(completed(1)).ok();
        let refresh = CoreEvent::Library(LibraryEvent::RefreshRequested { ticket: 1 });
        bus.emit(refresh.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), refresh);
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for generation in 0..5 {
            bus.emit(CoreEvent::Scan(ScanEvent::Superseded { generation }))
                .ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Scan(ScanEvent::Failed {
            generation: 2,
            message: "Permission denied: audio".to_string(),
            recoverable: true,
        });
        assert_eq!(failed.severity(), EventSeverity::Error);
        assert_eq!(completed(1).severity(), EventSeverity::Info);

        let with_gaps = CoreEvent::Library(LibraryEvent::PlaylistsReloaded {
            playlists: 4,
            gaps: 1,
        });
        assert_eq!(with_gaps.severity(), EventSeverity::Warning);

        let change = CoreEvent::Library(LibraryEvent::ChangeDetected {
            source: "songs".to_string(),
            version: 2,
        });
        assert_eq!(change.severity(), EventSeverity::Debug);
        assert_eq!(change.description(), "Media index changed");
    }

    #[test]
    fn test_scan_event_generation() {
        assert_eq!(ScanEvent::Superseded { generation: 7 }.generation(), 7);
        assert_eq!(
            ScanEvent::Started {
                generation: 3,
                trigger: "refresh".to_string()
            }
            .generation(),
            3
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Library(LibraryEvent::CacheInvalidated {
            stage: "playlists".to_string(),
            mode: "Optional".to_string(),
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("CacheInvalidated"));
        assert!(json.contains("playlists"));

        let deserialized: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }

    #[tokio::test]
    async fn test_try_recv() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe());
        assert!(stream.try_recv().is_none());

        bus.emit(completed(1)).ok();
        assert_eq!(stream.try_recv().unwrap().unwrap(), completed(1));
    }
}
