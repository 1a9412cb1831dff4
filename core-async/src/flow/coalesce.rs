//! Pause-aware coalescing.
//!
//! [`conflate_when_paused`] turns a bursty upstream into a stream that holds
//! at most one pending item: while the pause signal is set nothing is
//! delivered and newer items overwrite older ones; once it clears, the latest
//! pending item is delivered exactly once.
//!
//! [`map_latest`] runs one unit of work per item and drops (cancels) the
//! in-flight unit as soon as a newer item arrives.
//!
//! Chained together they form the stage trigger used by the reader:
//!
//! ```text
//!   changes ──▶ conflate_when_paused ──▶ map_latest(scan) ──▶ publish
//!                 ▲
//!                 └── pause signal (paused while nobody observes)
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::Notify;

use super::pause::{currently_paused, PauseSignal};
use crate::task::AbortOnDrop;

/// Single-value mailbox shared by the upstream producer and the consumer.
struct ConflatedSlot<T> {
    inner: Mutex<SlotState<T>>,
    notify: Notify,
}

struct SlotState<T> {
    value: Option<T>,
    closed: bool,
}

impl<T> ConflatedSlot<T> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(SlotState {
                value: None,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn put(&self, value: T) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .value = Some(value);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
        self.notify.notify_one();
    }

    fn take(&self) -> (Option<T>, bool) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        (state.value.take(), state.closed)
    }
}

struct Conflated<T> {
    slot: Arc<ConflatedSlot<T>>,
    pause: PauseSignal,
    pause_closed: bool,
    _producer: AbortOnDrop,
}

impl<T> Conflated<T> {
    fn paused(&mut self) -> bool {
        !self.pause_closed && currently_paused(&mut self.pause)
    }

    async fn next_unpaused(&mut self) -> Option<T> {
        loop {
            if self.paused() {
                if self.pause.changed().await.is_err() {
                    self.pause_closed = true;
                }
                continue;
            }

            match self.slot.take() {
                (Some(value), _) => return Some(value),
                (None, true) => return None,
                (None, false) => {}
            }

            tokio::select! {
                changed = self.pause.changed(), if !self.pause_closed => {
                    if changed.is_err() {
                        self.pause_closed = true;
                    }
                }
                _ = self.slot.notify.notified() => {}
            }
        }
    }
}

/// Collects `upstream` eagerly into a single-slot buffer and delivers the
/// buffered value only while `pause` is unset.
///
/// The upstream is driven by a background task for as long as the returned
/// stream is alive, so signals that arrive while paused are never lost; they
/// are collapsed into the latest one. The stream ends once the upstream has
/// ended and the slot is drained.
pub fn conflate_when_paused<S>(upstream: S, pause: PauseSignal) -> BoxStream<'static, S::Item>
where
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
{
    let slot = Arc::new(ConflatedSlot::new());
    let producer = {
        let slot = Arc::clone(&slot);
        AbortOnDrop::spawn(async move {
            futures::pin_mut!(upstream);
            while let Some(item) = upstream.next().await {
                slot.put(item);
            }
            slot.close();
        })
    };

    let state = Conflated {
        slot,
        pause,
        pause_closed: false,
        _producer: producer,
    };
    stream::unfold(state, |mut state| async move {
        let item = state.next_unpaused().await?;
        Some((item, state))
    })
    .boxed()
}

struct Latest<T, R, F> {
    upstream: BoxStream<'static, T>,
    upstream_done: bool,
    in_flight: Option<BoxFuture<'static, R>>,
    work: F,
}

impl<T, R, F, Fut> Latest<T, R, F>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    async fn next_output(&mut self) -> Option<R> {
        loop {
            if self.upstream_done && self.in_flight.is_none() {
                return None;
            }

            tokio::select! {
                biased;
                item = self.upstream.next(), if !self.upstream_done => match item {
                    // Replacing the future drops the superseded unit of work.
                    Some(item) => self.in_flight = Some((self.work)(item).boxed()),
                    None => self.upstream_done = true,
                },
                output = poll_in_flight(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.in_flight = None;
                    return Some(output);
                }
            }
        }
    }
}

async fn poll_in_flight<R>(in_flight: &mut Option<BoxFuture<'static, R>>) -> R {
    match in_flight.as_mut() {
        Some(future) => future.await,
        None => futures::future::pending().await,
    }
}

/// Maps each upstream item through `work`, cancelling the previous unit of
/// work whenever a newer item arrives before it completes.
///
/// Cancellation happens by dropping the in-flight future, so the superseded
/// computation stops at its next suspension point and never yields output.
pub fn map_latest<S, F, Fut>(upstream: S, work: F) -> BoxStream<'static, Fut::Output>
where
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
    F: FnMut(S::Item) -> Fut + Send + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let state = Latest {
        upstream: upstream.boxed(),
        upstream_done: false,
        in_flight: None,
        work,
    };
    stream::unfold(state, |mut state| async move {
        let output = state.next_output().await?;
        Some((output, state))
    })
    .boxed()
}
