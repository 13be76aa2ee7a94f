//! Write path tests for OfflineWriter

use std::time::Duration;

use serde_json::json;

use clinicsync_core::domain::{newtypes::RecordId, DomainError, OperationKind};
use clinicsync_core::ports::{IOperationQueue, IReadCache, ReadFilter, RemoteError};
use clinicsync_sync::interceptor::{OFFLINE_ID_FIELD, PENDING_SYNC_FIELD};
use clinicsync_sync::{ReadOutcome, SyncSettings, WriteError, WriteOutcome};

use crate::common::{memory_harness, sqlite_harness, table, FakeRemote};

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn test_online_write_is_confirmed_and_not_queued() {
    let h = sqlite_harness(FakeRemote::online(), SyncSettings::default()).await;
    let writer = h.writer();
    let patients = table("patients");

    let outcome = writer
        .insert(&patients, json!({"name": "Ana"}))
        .await
        .unwrap();

    assert_eq!(outcome, WriteOutcome::Confirmed(json!({"id": 1, "name": "Ana"})));
    assert_eq!(h.queue.count_pending().await.unwrap(), 0);

    let key = ReadFilter::by_id(&RecordId::new("1").unwrap()).cache_key();
    let cached = h.queue.cache_read(&patients, &key).await.unwrap().unwrap();
    assert_eq!(cached.payload, json!([{"id": 1, "name": "Ana"}]));
}

#[tokio::test]
async fn test_offline_write_is_queued_with_markers() {
    let h = sqlite_harness(FakeRemote::offline(), SyncSettings::default()).await;
    let writer = h.writer();

    let outcome = writer
        .insert(&table("appointments"), json!({"patient_id": "p-1", "slot": "09:00"}))
        .await
        .unwrap();

    let WriteOutcome::Queued {
        record,
        operation_id,
    } = outcome
    else {
        panic!("expected a queued write");
    };
    assert_eq!(record["slot"], "09:00");
    assert_eq!(record[OFFLINE_ID_FIELD], operation_id.as_str());
    assert_eq!(record[PENDING_SYNC_FIELD], true);

    // The queued operation holds the payload as submitted, without markers
    let op = h.queue.get(&operation_id).await.unwrap().unwrap();
    assert_eq!(op.kind(), OperationKind::Insert);
    assert_eq!(op.payload(), &json!({"patient_id": "p-1", "slot": "09:00"}));
    assert_eq!(h.orchestrator.status().pending_operations, 1);
}

#[tokio::test]
async fn test_application_rejection_is_surfaced_and_not_queued() {
    let h = sqlite_harness(FakeRemote::online(), SyncSettings::default()).await;
    let writer = h.writer();
    h.remote.fail_next(RemoteError::Application {
        status: Some(400),
        code: Some("23502".into()),
        message: "null value in column \"slot\"".into(),
    });

    let err = writer
        .insert(&table("appointments"), json!({"patient_id": "p-1"}))
        .await
        .unwrap_err();

    match err {
        WriteError::Application(RemoteError::Application { status, .. }) => {
            assert_eq!(status, Some(400));
        }
        other => panic!("expected an application error, got {other:?}"),
    }
    assert_eq!(h.queue.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_payload_is_rejected_before_any_io() {
    let h = sqlite_harness(FakeRemote::online(), SyncSettings::default()).await;
    let writer = h.writer();

    let err = writer
        .update(&table("patients"), json!({"phone": "555-0101"}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WriteError::Invalid(DomainError::MissingRecordId { .. })
    ));

    let err = writer
        .insert(&table("patients"), json!(["not", "an", "object"]))
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::Invalid(DomainError::InvalidPayload(_))));

    assert!(h.remote.calls().is_empty());
    assert_eq!(h.queue.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_forced_offline_skips_remote() {
    let h = sqlite_harness(FakeRemote::online(), SyncSettings::default()).await;
    let writer = h.writer();
    writer.set_force_offline(true);

    let outcome = writer
        .delete(&table("appointments"), json!({"id": 42}))
        .await
        .unwrap();

    assert!(outcome.is_pending());
    assert!(h.remote.calls().is_empty());
    assert_eq!(h.queue.count_pending().await.unwrap(), 1);

    writer.set_force_offline(false);
    assert!(!writer.is_force_offline());
}

#[tokio::test]
async fn test_write_queues_behind_pending_work_on_same_record() {
    let h = sqlite_harness(FakeRemote::online(), SyncSettings::default()).await;
    let writer = h.writer();
    let patients = table("patients");

    let created = writer
        .insert(&patients, json!({"id": "p1", "phone": "000"}))
        .await
        .unwrap();
    assert!(!created.is_pending());

    h.remote.set_online(false);
    let first = writer
        .update(&patients, json!({"id": "p1", "phone": "111"}))
        .await
        .unwrap();
    assert!(first.is_pending());

    // Back online, but the older update is still queued
    h.remote.set_online(true);
    let second = writer
        .update(&patients, json!({"id": "p1", "phone": "222"}))
        .await
        .unwrap();
    assert!(second.is_pending());
    let third = writer
        .insert(&patients, json!({"id": "p2", "phone": "333"}))
        .await
        .unwrap();
    assert!(third.is_pending());
    assert_eq!(h.queue.count_pending().await.unwrap(), 3);

    // Other tables are not held back
    let other = writer
        .insert(&table("appointments"), json!({"slot": "09:00"}))
        .await
        .unwrap();
    assert!(!other.is_pending());

    h.orchestrator.sync_pending().await.unwrap();
    let rows = h.remote.rows("patients");
    let p1 = rows.iter().find(|row| row["id"] == "p1").unwrap();
    assert_eq!(p1["phone"], "222");
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_unreadable_queue_fails_write_before_remote_attempt() {
    let h = memory_harness(FakeRemote::online(), SyncSettings::default());
    let writer = h.writer();
    h.queue.set_broken(true);

    let err = writer
        .update(&table("patients"), json!({"id": "p1", "phone": "111"}))
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::Storage(_)));
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn test_hanging_remote_write_is_queued_after_timeout() {
    let h = sqlite_harness(FakeRemote::online(), SyncSettings::default()).await;
    let writer = h.writer();
    h.remote.set_hang(true);

    let outcome = writer
        .insert(&table("patients"), json!({"name": "Ana"}))
        .await
        .unwrap();

    assert!(outcome.is_pending());
    assert_eq!(h.queue.count_pending().await.unwrap(), 1);
}

#[tokio::test]
async fn test_queue_failure_after_connectivity_loss_is_storage_error() {
    let h = memory_harness(FakeRemote::offline(), SyncSettings::default());
    let writer = h.writer();
    h.queue.set_broken(true);

    let err = writer
        .insert(&table("patients"), json!({"name": "Ana"}))
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::Storage(_)));
}

#[tokio::test]
async fn test_connectivity_failure_triggers_background_probe() {
    let h = sqlite_harness(FakeRemote::online(), SyncSettings::default()).await;
    let writer = h.writer();
    assert!(h.monitor.refresh().await);

    h.remote.set_online(false);
    let outcome = writer
        .insert(&table("patients"), json!({"name": "Ana"}))
        .await
        .unwrap();
    assert!(outcome.is_pending());

    for _ in 0..100 {
        if !h.monitor.is_online() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!h.monitor.is_online());
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_reads_fall_back_to_cache_when_offline() {
    let h = sqlite_harness(FakeRemote::online(), SyncSettings::default()).await;
    let writer = h.writer();
    let patients = table("patients");
    writer
        .insert(&patients, json!({"id": "p-1", "name": "Ana", "doctor_id": "7"}))
        .await
        .unwrap();
    writer
        .insert(&patients, json!({"id": "p-2", "name": "Luis", "doctor_id": "7"}))
        .await
        .unwrap();

    let filter = ReadFilter::new().with_eq("doctor_id", "7");
    let fresh = writer.read(&patients, &filter).await.unwrap();
    assert!(matches!(fresh, ReadOutcome::Fresh(ref rows) if rows.len() == 2));

    h.remote.set_online(false);
    let cached = writer.read(&patients, &filter).await.unwrap();
    assert!(cached.is_cached());
    assert_eq!(cached.records(), fresh.records());

    let err = writer
        .read(&patients, &ReadFilter::new().with_eq("doctor_id", "9"))
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::Connectivity(_)));
}
