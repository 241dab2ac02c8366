use super::*;
use crate::storage::{
    Criteria, EntityStore, SqliteBackend, SqliteEntityStore, SqliteSyncRunStore, SyncRunStore,
};
use crate::testing::{FakeRecord, FakeSource, TestEngine};
use casesync_api::{EntityFields, EntityKind, RunStatus, SyncError, SyncRunKind};
use chrono::Utc;
use proptest::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn sample_records() -> Vec<FakeRecord> {
    vec![
        FakeRecord::contact("C1", "Jane Doe"),
        FakeRecord::contact("C2", "John Roe"),
        FakeRecord::matter("M1", "Doe 1031", Some("C1")),
        FakeRecord::task("T1", "Collect deed", Some("M1")),
        FakeRecord::task("T2", "Order title report", Some("M1")),
    ]
}

/// Orchestrator over its own connection pool to a shared database file, as a
/// separate CLI process would have
async fn file_orchestrator(
    path: &Path,
    source: Arc<FakeSource>,
    settings: SyncSettings,
) -> anyhow::Result<(SyncOrchestrator<FakeSource>, Arc<SqliteSyncRunStore>)> {
    let backend = SqliteBackend::open(path, 2).await?;
    let store = Arc::new(SqliteEntityStore::new(backend.clone()));
    let runs = Arc::new(SqliteSyncRunStore::new(backend));
    let orchestrator = SyncOrchestrator::new(source, store, runs.clone()).with_settings(settings);
    Ok((orchestrator, runs))
}

fn short_lease(millis: u64) -> SyncSettings {
    SyncSettings {
        run_lease: Duration::from_millis(millis),
        ..SyncSettings::default()
    }
}

async fn exchange_client_id(store: &SqliteEntityStore, matter: &str) -> Option<i64> {
    let entity = store
        .find_one(EntityKind::Matter, Criteria::ExternalId(matter))
        .await
        .unwrap()
        .unwrap();
    match entity.fields {
        EntityFields::Exchange(e) => e.client_id,
        other => panic!("expected exchange, got {:?}", other),
    }
}

#[tokio::test]
async fn test_full_sync_is_idempotent() -> anyhow::Result<()> {
    let source = Arc::new(FakeSource::with_records(sample_records()));
    let engine = TestEngine::new(source.clone()).await?;
    let cancel = CancellationToken::new();

    let first = engine
        .orchestrator
        .run_full_sync(Some("test"), &cancel)
        .await?;
    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(first.records_processed, 5);
    assert_eq!(first.records_created, 5);
    assert_eq!(first.records_updated, 0);
    assert!(first.completed_at.is_some());
    assert_eq!(first.details.entity(EntityKind::Task).unwrap().created, 2);

    let second = engine.orchestrator.run_full_sync(None, &cancel).await?;
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.records_processed, 5);
    assert_eq!(second.records_created, 0);
    assert_eq!(second.records_updated, 5);

    assert_eq!(engine.store.count(EntityKind::Contact).await?, 2);
    assert_eq!(engine.store.count(EntityKind::Matter).await?, 1);
    assert_eq!(engine.store.count(EntityKind::Task).await?, 2);

    // Client participant linked once despite two runs
    let exchange = engine
        .store
        .find_one(EntityKind::Matter, Criteria::ExternalId("M1"))
        .await?
        .unwrap();
    assert_eq!(engine.store.participants(exchange.id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_updates_overwrite_changed_fields() -> anyhow::Result<()> {
    let source = Arc::new(FakeSource::with_records(vec![FakeRecord::contact(
        "C1", "Jane Doe",
    )]));
    let engine = TestEngine::new(source.clone()).await?;
    let cancel = CancellationToken::new();
    engine.orchestrator.sync_contacts(None, &cancel).await?;

    source.set_records(vec![FakeRecord::contact("C1", "Jane Doe").renamed("Jane Smith")]);
    let run = engine.orchestrator.sync_contacts(None, &cancel).await?;
    assert_eq!(run.kind, SyncRunKind::Contacts);
    assert_eq!(run.records_updated, 1);

    let contact = engine
        .store
        .find_one(EntityKind::Contact, Criteria::ExternalId("C1"))
        .await?
        .unwrap();
    match contact.fields {
        EntityFields::Contact(c) => assert_eq!(c.name, "Jane Smith"),
        other => panic!("expected contact, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_foreign_key_resolves_on_later_run() -> anyhow::Result<()> {
    let source = Arc::new(FakeSource::with_records(vec![FakeRecord::matter(
        "M1",
        "Doe 1031",
        Some("C9"),
    )]));
    let engine = TestEngine::new(source.clone()).await?;
    let cancel = CancellationToken::new();

    let first = engine.orchestrator.run_full_sync(None, &cancel).await?;
    assert_eq!(first.status, RunStatus::Success);
    assert!(!first.has_record_errors());
    assert_eq!(exchange_client_id(&engine.store, "M1").await, None);

    source.set_records(vec![
        FakeRecord::contact("C9", "Late Client"),
        FakeRecord::matter("M1", "Doe 1031", Some("C9")),
    ]);
    engine.orchestrator.run_full_sync(None, &cancel).await?;

    let contact = engine
        .store
        .find_one(EntityKind::Contact, Criteria::ExternalId("C9"))
        .await?
        .unwrap();
    assert_eq!(exchange_client_id(&engine.store, "M1").await, Some(contact.id));
    Ok(())
}

#[tokio::test]
async fn test_one_bad_record_does_not_abort_the_batch() -> anyhow::Result<()> {
    let mut records: Vec<FakeRecord> = (1..=4)
        .map(|i| FakeRecord::contact(&format!("C{}", i), &format!("Contact {}", i)))
        .collect();
    records.insert(2, FakeRecord::without_id(EntityKind::Contact));
    let source = Arc::new(FakeSource::with_records(records));
    let engine = TestEngine::new(source).await?;

    let run = engine
        .orchestrator
        .sync_contacts(None, &CancellationToken::new())
        .await?;
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.records_processed, 5);
    assert_eq!(run.records_created, 4);
    assert!(run.has_record_errors());

    let contacts = run.details.entity(EntityKind::Contact).unwrap();
    assert_eq!(
        contacts.errors,
        vec!["contact <unknown>: missing required field 'id'".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_fatal_error_keeps_completed_kinds() -> anyhow::Result<()> {
    let source = Arc::new(FakeSource::with_records(sample_records()));
    source.fail_fetch(
        EntityKind::Matter,
        SyncError::RemoteApi {
            status: 500,
            body: "upstream exploded".to_string(),
        },
    );
    let engine = TestEngine::new(source.clone()).await?;

    let run = engine
        .orchestrator
        .run_full_sync(None, &CancellationToken::new())
        .await?;
    assert_eq!(run.status, RunStatus::Error);
    assert_eq!(run.records_created, 2);
    assert!(run.error_message.as_deref().unwrap().contains("HTTP 500"));

    let failure = run.details.failure.as_ref().unwrap();
    assert_eq!(failure.entity, Some(EntityKind::Matter));
    assert_eq!(failure.stage, "fetch");
    assert_eq!(failure.category, "remote_api");
    assert!(!failure.chain.is_empty());
    assert!(run.details.entity(EntityKind::Task).is_none());

    // Contacts stayed, tasks were never fetched
    assert_eq!(engine.store.count(EntityKind::Contact).await?, 2);
    assert_eq!(engine.store.count(EntityKind::Task).await?, 0);
    assert_eq!(source.fetch_calls(), 2);

    // A later run starts over and completes
    source.clear_failures();
    let retry = engine
        .orchestrator
        .run_full_sync(None, &CancellationToken::new())
        .await?;
    assert_eq!(retry.status, RunStatus::Success);
    assert_eq!(retry.records_updated, 2);
    assert_eq!(retry.records_created, 3);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_before_start_closes_run_as_error() -> anyhow::Result<()> {
    let source = Arc::new(FakeSource::with_records(sample_records()));
    let engine = TestEngine::new(source.clone()).await?;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let run = engine.orchestrator.run_full_sync(None, &cancel).await?;
    assert_eq!(run.status, RunStatus::Error);
    assert!(run.error_message.unwrap().starts_with("Sync cancelled"));
    assert_eq!(run.details.failure.unwrap().category, "cancelled");
    assert_eq!(source.fetch_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_run_is_rejected_and_cancel_ends_first() -> anyhow::Result<()> {
    let source = Arc::new(FakeSource::with_records(sample_records()));
    source.block_fetch(EntityKind::Contact);
    let engine = TestEngine::new(source.clone()).await?;
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        engine.orchestrator.run_full_sync(Some("first"), &cancel),
        async {
            source.fetch_started().await;
            assert!(engine.orchestrator.is_running());
            let second = engine
                .orchestrator
                .sync_tasks(Some("second"), &CancellationToken::new())
                .await;
            cancel.cancel();
            second
        }
    );

    assert_eq!(second.unwrap_err(), SyncError::AlreadyRunning);

    let first = first?;
    assert_eq!(first.status, RunStatus::Error);
    assert_eq!(first.details.failure.as_ref().unwrap().category, "cancelled");

    // The rejected run left no trace
    let runs = engine.runs.recent_runs(10).await?;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].triggered_by.as_deref(), Some("first"));
    assert!(!engine.orchestrator.is_running());
    Ok(())
}

#[tokio::test]
async fn test_shared_run_lock_spans_orchestrators() -> anyhow::Result<()> {
    let source = Arc::new(FakeSource::new());
    let engine = TestEngine::new(source.clone()).await?;
    let other = SyncOrchestrator::new(source, engine.store.clone(), engine.runs.clone())
        .with_run_lock(engine.orchestrator.run_lock());

    let held = engine.orchestrator.run_lock();
    let _guard = held.lock().await;
    let err = other
        .run_full_sync(None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, SyncError::AlreadyRunning);
    Ok(())
}

#[tokio::test]
async fn test_status_report_reflects_runs_and_counts() -> anyhow::Result<()> {
    let source = Arc::new(FakeSource::with_records(sample_records()));
    let engine = TestEngine::new(source.clone()).await?;
    let cancel = CancellationToken::new();

    let full = engine.orchestrator.run_full_sync(None, &cancel).await?;
    source.fail_fetch(EntityKind::Task, SyncError::Transport("connection reset".into()));
    engine.orchestrator.sync_tasks(None, &cancel).await?;

    let status = engine.orchestrator.get_sync_status().await?;
    assert_eq!(status.recent_runs.len(), 2);
    assert_eq!(status.recent_runs[0].kind, SyncRunKind::Tasks);
    assert_eq!(status.recent_runs[0].status, RunStatus::Error);
    assert_eq!(status.last_successful_full_sync.unwrap().id, full.id);
    assert_eq!(status.entity_counts.contacts, 2);
    assert_eq!(status.entity_counts.exchanges, 1);
    assert_eq!(status.entity_counts.tasks, 2);
    assert_eq!(status.statistics.runs_last_24h, 2);
    assert_eq!(status.statistics.success_rate, Some(50.0));
    assert!(!status.sync_in_progress);
    Ok(())
}

#[tokio::test]
async fn test_recover_fails_only_expired_leases() -> anyhow::Result<()> {
    let settings = short_lease(50);
    let engine = TestEngine::with_settings(Arc::new(FakeSource::new()), settings.clone()).await?;
    // Created straight in the log, so nothing heartbeats it
    let orphan = engine
        .runs
        .create_run(SyncRunKind::Full, None, settings.stale_before(Utc::now()))
        .await?;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(engine.orchestrator.recover_abandoned_runs().await?, 1);
    let orphan = engine.runs.get_run(&orphan.id).await?.unwrap();
    assert_eq!(orphan.status, RunStatus::Error);
    assert_eq!(orphan.error_message.as_deref(), Some(ABANDONED_RUN_REASON));
    assert_eq!(engine.orchestrator.recover_abandoned_runs().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_expired_lease_does_not_block_new_run() -> anyhow::Result<()> {
    let settings = short_lease(50);
    let engine = TestEngine::with_settings(
        Arc::new(FakeSource::with_records(sample_records())),
        settings.clone(),
    )
    .await?;
    engine
        .runs
        .create_run(SyncRunKind::Full, None, settings.stale_before(Utc::now()))
        .await?;

    tokio::time::sleep(Duration::from_millis(150)).await;
    let run = engine
        .orchestrator
        .run_full_sync(None, &CancellationToken::new())
        .await?;
    assert_eq!(run.status, RunStatus::Success);
    Ok(())
}

#[tokio::test]
async fn test_live_run_of_another_process_is_left_alone() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("casesync.db");

    let busy_source = Arc::new(FakeSource::with_records(sample_records()));
    busy_source.block_fetch(EntityKind::Contact);
    let (busy, _) = file_orchestrator(&path, busy_source.clone(), short_lease(200)).await?;
    let (other, other_runs) = file_orchestrator(
        &path,
        Arc::new(FakeSource::with_records(sample_records())),
        short_lease(200),
    )
    .await?;
    let cancel = CancellationToken::new();

    let (busy_result, ()) = tokio::join!(busy.run_full_sync(Some("cron"), &cancel), async {
        busy_source.fetch_started().await;
        // Outlive the lease several times over; heartbeats keep it fresh
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(other.recover_abandoned_runs().await.unwrap(), 0);
        let err = other
            .run_full_sync(Some("manual"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::AlreadyRunning);

        let runs = other_runs.recent_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Running);
        cancel.cancel();
    });

    // The busy run still owns its row and closes it itself
    let busy_run = busy_result?;
    assert_eq!(busy_run.status, RunStatus::Error);
    assert_eq!(busy_run.details.failure.as_ref().unwrap().category, "cancelled");
    assert_ne!(busy_run.error_message.as_deref(), Some(ABANDONED_RUN_REASON));

    let next = other
        .run_full_sync(Some("manual"), &CancellationToken::new())
        .await?;
    assert_eq!(next.status, RunStatus::Success);
    Ok(())
}

#[tokio::test]
async fn test_cancel_during_upsert_counts_written_records() -> anyhow::Result<()> {
    let records: Vec<FakeRecord> = (1..=6)
        .map(|i| FakeRecord::contact(&format!("C{}", i), "Someone"))
        .collect();
    let source = Arc::new(FakeSource::with_records(records));
    source.block_transform("C2");
    let settings = SyncSettings {
        batch_sizes: BatchSizes {
            contacts: 3,
            ..BatchSizes::default()
        },
        ..SyncSettings::default()
    };
    let engine = TestEngine::with_settings(source.clone(), settings).await?;
    let cancel = CancellationToken::new();

    let (run, ()) = tokio::join!(engine.orchestrator.sync_contacts(None, &cancel), async {
        source.transform_blocked().await;
        cancel.cancel();
        source.release_transforms();
    });

    let run = run?;
    assert_eq!(run.status, RunStatus::Error);
    assert_eq!(run.details.failure.as_ref().unwrap().stage, "upsert");
    assert_eq!(run.records_created, 3);
    assert_eq!(engine.store.count(EntityKind::Contact).await?, 3);
    Ok(())
}

#[tokio::test]
async fn test_health_check_delegates_to_source() -> anyhow::Result<()> {
    let engine = TestEngine::new(Arc::new(FakeSource::new())).await?;
    let report = engine.orchestrator.health_check().await;
    assert!(report.healthy);
    assert_eq!(report.status_code, Some(200));
    Ok(())
}

#[tokio::test]
async fn test_small_batches_still_cover_every_record() -> anyhow::Result<()> {
    let records: Vec<FakeRecord> = (0..23)
        .map(|i| FakeRecord::contact(&format!("C{}", i), "Someone"))
        .collect();
    let settings = SyncSettings {
        batch_sizes: BatchSizes {
            contacts: 4,
            ..BatchSizes::default()
        },
        ..SyncSettings::default()
    };
    let engine =
        TestEngine::with_settings(Arc::new(FakeSource::with_records(records)), settings).await?;

    let run = engine
        .orchestrator
        .sync_contacts(None, &CancellationToken::new())
        .await?;
    assert_eq!(run.records_created, 23);
    assert_eq!(engine.store.count(EntityKind::Contact).await?, 23);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// However often ids repeat within and across runs, each maps to one row
    #[test]
    fn prop_external_ids_map_to_single_rows(
        runs in prop::collection::vec(prop::collection::vec(0u8..12, 0..20), 1..4)
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let source = Arc::new(FakeSource::new());
            let engine = TestEngine::new(source.clone()).await.unwrap();
            let mut seen = std::collections::HashSet::new();

            for ids in &runs {
                let records: Vec<FakeRecord> = ids
                    .iter()
                    .map(|id| FakeRecord::contact(&format!("C{}", id), "Repeated"))
                    .collect();
                seen.extend(ids.iter().copied());
                source.set_records(records);

                let run = engine
                    .orchestrator
                    .sync_contacts(None, &CancellationToken::new())
                    .await
                    .unwrap();
                assert_eq!(run.status, RunStatus::Success);
                assert_eq!(run.records_processed, ids.len() as u64);
                assert!(!run.has_record_errors());
            }

            let count = engine.store.count(EntityKind::Contact).await.unwrap();
            assert_eq!(count, seen.len() as i64);
        });
    }
}
