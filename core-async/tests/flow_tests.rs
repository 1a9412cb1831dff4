//! Timing scenarios for the pause-aware flow primitives, run on virtual time.

use std::sync::{Arc, Mutex};

use core_async::flow::{conflate_when_paused, map_latest, ManualPauseManager, PauseManager};
use core_async::{sleep, task, Duration};
use futures::{stream, StreamExt};

fn ticking_source(count: u32, period: Duration) -> impl futures::Stream<Item = u32> + Send {
    stream::unfold(0, move |i| async move {
        if i >= count {
            return None;
        }
        sleep(period).await;
        Some((i, i + 1))
    })
}

#[tokio::test(start_paused = true)]
async fn test_pause_schedule_delivers_latest_on_resume() {
    let pause = ManualPauseManager::new(true);
    let signal = pause.is_paused();
    let out = Arc::new(Mutex::new(Vec::new()));

    let collected = out.clone();
    let collector = task::spawn(async move {
        let mut values = conflate_when_paused(ticking_source(10, Duration::from_millis(100)), signal);
        while let Some(value) = values.next().await {
            collected.lock().unwrap().push(value);
        }
    });

    sleep(Duration::from_millis(250)).await;
    pause.set_paused(false);
    sleep(Duration::from_millis(200)).await;
    pause.set_paused(true);
    sleep(Duration::from_millis(300)).await;
    pause.set_paused(false);
    sleep(Duration::from_millis(500)).await;

    assert_eq!(*out.lock().unwrap(), vec![1, 2, 3, 6, 7, 8, 9]);
    collector.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_burst_while_paused_runs_one_unit_of_work() {
    let pause = ManualPauseManager::new(false);
    let signal = pause.is_paused();
    let runs = Arc::new(Mutex::new(Vec::new()));

    // Signals at t=0, 100, 200, 300; paused from t=50 to t=550.
    let source = stream::iter(0..4u32).then(|i| async move {
        if i > 0 {
            sleep(Duration::from_millis(100)).await;
        }
        i
    });

    let recorded = runs.clone();
    let worker = task::spawn(async move {
        let mut outputs = map_latest(conflate_when_paused(source, signal), move |value| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().unwrap().push(value);
                value
            }
        });
        let mut last = None;
        while let Some(value) = outputs.next().await {
            last = Some(value);
        }
        last
    });

    sleep(Duration::from_millis(50)).await;
    pause.set_paused(true);
    sleep(Duration::from_millis(500)).await;
    pause.set_paused(false);

    assert_eq!(worker.await.unwrap(), Some(3));
    assert_eq!(*runs.lock().unwrap(), vec![0, 3]);
}
