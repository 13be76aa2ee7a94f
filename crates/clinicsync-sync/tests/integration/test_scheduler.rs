//! Trigger tests for SyncScheduler
//!
//! Runs on a paused tokio clock, so the queue is the in-memory fake.

use std::time::Duration;

use chrono::{NaiveTime, Weekday};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use clinicsync_core::domain::OperationKind;
use clinicsync_core::ports::IOperationQueue;
use clinicsync_sync::{SchedulerSettings, SyncScheduler, SyncSettings};

use crate::common::{memory_harness, table, FakeRemote, Harness, MemoryQueue};

const DAY: Duration = Duration::from_secs(86_400);

fn settings(interval: Duration, probe_interval: Duration) -> SchedulerSettings {
    SchedulerSettings {
        interval,
        probe_interval,
        weekly_flush: None,
    }
}

async fn enqueue_one(h: &Harness<MemoryQueue>) {
    h.queue
        .enqueue(OperationKind::Insert, &table("patients"), json!({"name": "Ana"}))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_manual_trigger_runs_a_pass() {
    let h = memory_harness(FakeRemote::online(), SyncSettings::default());
    enqueue_one(&h).await;

    let scheduler = SyncScheduler::new(h.orchestrator.clone(), settings(DAY, DAY))
        .with_clock(h.clock.clone());
    let trigger = scheduler.trigger();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.remote.calls().is_empty());

    assert!(trigger.request());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.remote.calls().len(), 1);
    assert_eq!(h.queue.count_pending().await.unwrap(), 0);

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_edge_runs_a_pass() {
    let h = memory_harness(FakeRemote::offline(), SyncSettings::default());
    enqueue_one(&h).await;

    let scheduler = SyncScheduler::new(
        h.orchestrator.clone(),
        settings(DAY, Duration::from_secs(30)),
    );
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    // First re-probe still finds the store down
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(!h.monitor.is_online());
    assert!(h.remote.calls().is_empty());

    // Next re-probe sees it back; the offline -> online edge drains the queue
    h.remote.set_online(true);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(h.monitor.is_online());
    assert_eq!(h.remote.calls().len(), 1);

    // Staying online does not trigger more passes
    enqueue_one(&h).await;
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(h.remote.calls().len(), 1);

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_interval_pass_skips_first_tick() {
    let h = memory_harness(FakeRemote::online(), SyncSettings::default());
    enqueue_one(&h).await;

    let scheduler = SyncScheduler::new(
        h.orchestrator.clone(),
        settings(Duration::from_secs(300), DAY),
    );
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_secs(299)).await;
    assert!(h.remote.calls().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.remote.calls().len(), 1);

    enqueue_one(&h).await;
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.remote.calls().len(), 2);

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_weekly_flush_fires_at_slot() {
    let h = memory_harness(FakeRemote::online(), SyncSettings::default());
    enqueue_one(&h).await;

    // The harness clock reads Monday 2026-03-02 08:00 UTC
    let scheduler = SyncScheduler::new(
        h.orchestrator.clone(),
        SchedulerSettings {
            interval: DAY,
            probe_interval: DAY,
            weekly_flush: Some((Weekday::Mon, NaiveTime::from_hms_opt(8, 10, 0).unwrap())),
        },
    )
    .with_clock(h.clock.clone());
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_secs(599)).await;
    assert!(h.remote.calls().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.remote.calls().len(), 1);

    // Rescheduled a week out, not re-fired immediately
    enqueue_one(&h).await;
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(h.remote.calls().len(), 1);

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_the_loop() {
    let h = memory_harness(FakeRemote::online(), SyncSettings::default());
    let scheduler = SyncScheduler::new(h.orchestrator.clone(), SchedulerSettings::default());
    let trigger = scheduler.trigger();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler should stop")
        .unwrap();

    // Receiver is gone with the loop
    assert!(!trigger.request());
}
