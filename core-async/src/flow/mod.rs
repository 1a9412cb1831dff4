//! Stream primitives the reader pipeline is assembled from.
//!
//! - [`pause`]: pause signals and the managers producing them
//! - [`coalesce`]: pause-aware single-slot coalescing and latest-wins mapping
//! - [`replay`]: replay-1 multicast stages with subscriber-driven pausing
//! - [`invalidation`]: explicit replay-cache invalidation handles

pub mod coalesce;
pub mod invalidation;
pub mod pause;
pub mod replay;

pub use coalesce::{conflate_when_paused, map_latest};
pub use invalidation::{propagate, resolve_parent, InvalidationHandle, InvalidationMode};
pub use pause::{
    currently_paused, wait_until_unpaused, CountingPauseManager, ManualPauseManager, NeverPaused,
    PauseManager, PauseRegistration, PauseSignal,
};
pub use replay::{ReplayStage, StageContext, Subscription};

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::watch;

/// Turns a `watch` receiver into a stream that yields the current value
/// first and then every observed change. Ends when the sender is dropped.
pub fn watch_stream<T>(rx: watch::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first {
            rx.changed().await.ok()?;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, (rx, false)))
    })
    .boxed()
}

/// Like [`watch_stream`] but skips values equal to the previously yielded
/// one.
pub fn distinct_watch_stream<T>(rx: watch::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    watch_stream(rx)
        .scan(None::<T>, |last, value| {
            let emit = last.as_ref() != Some(&value);
            *last = Some(value.clone());
            futures::future::ready(Some(emit.then_some(value)))
        })
        .filter_map(futures::future::ready)
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watch_stream_yields_current_then_changes() {
        let (tx, rx) = watch::channel(1);
        let mut values = watch_stream(rx);
        assert_eq!(values.next().await, Some(1));

        tx.send(2).unwrap();
        assert_eq!(values.next().await, Some(2));

        drop(tx);
        assert_eq!(values.next().await, None);
    }

    #[tokio::test]
    async fn test_distinct_watch_stream_skips_repeats() {
        let (tx, rx) = watch::channel(1);
        let mut values = distinct_watch_stream(rx);
        assert_eq!(values.next().await, Some(1));

        tx.send(1).unwrap();
        tx.send(3).unwrap();
        assert_eq!(values.next().await, Some(3));
    }
}
