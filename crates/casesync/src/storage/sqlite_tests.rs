use super::*;
use crate::testing::fixtures::{contact_fields, exchange_fields, task_fields};
use casesync_api::{
    BatchResult, EntityFields, EntityKind, ExchangeStatus, ParticipantLink, RunCompletion,
    RunDetails, RunStatus, SyncRunKind,
};

async fn create_test_backend() -> SqliteBackend {
    SqliteBackend::open_in_memory().await.unwrap()
}

mod entity_store_tests {
    use super::*;

    #[tokio::test]
    async fn test_find_or_create_is_keyed_on_external_id() {
        let store = SqliteEntityStore::new(create_test_backend().await);
        let fields = contact_fields("C1", "Jane Doe");

        let (first, created) = store.find_or_create(&fields).await.unwrap();
        assert!(created);
        assert_eq!(first.external_id(), "C1");

        let renamed = contact_fields("C1", "Jane Smith");
        let (second, created) = store.find_or_create(&renamed).await.unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        // find_or_create never overwrites an existing row
        assert_eq!(second.fields, first.fields);

        assert_eq!(store.count(EntityKind::Contact).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_reports_content_changes_only() {
        let store = SqliteEntityStore::new(create_test_backend().await);
        let (entity, _) = store
            .find_or_create(&contact_fields("C1", "Jane Doe"))
            .await
            .unwrap();

        // Same content, newer sync stamp
        let resynced = contact_fields("C1", "Jane Doe");
        assert!(!store.update(&entity, &resynced).await.unwrap());

        let renamed = contact_fields("C1", "Jane Smith");
        assert!(store.update(&entity, &renamed).await.unwrap());

        let stored = store
            .find_one(EntityKind::Contact, Criteria::Id(entity.id))
            .await
            .unwrap()
            .unwrap();
        match stored.fields {
            EntityFields::Contact(c) => assert_eq!(c.name, "Jane Smith"),
            other => panic!("expected contact, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_rejects_mismatched_identity() {
        let store = SqliteEntityStore::new(create_test_backend().await);
        let (entity, _) = store
            .find_or_create(&contact_fields("C1", "Jane Doe"))
            .await
            .unwrap();

        let err = store
            .update(&entity, &contact_fields("C2", "Other"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_exchange_and_task_round_trip_through_rows() {
        let store = SqliteEntityStore::new(create_test_backend().await);
        let (client, _) = store
            .find_or_create(&contact_fields("C1", "Jane Doe"))
            .await
            .unwrap();

        let exchange = exchange_fields("M1", "Smith 1031", Some(client.id));
        let (stored_exchange, created) = store.find_or_create(&exchange).await.unwrap();
        assert!(created);
        assert!(stored_exchange.fields.same_content(&exchange));

        let task = task_fields("T1", "Collect deed", Some(stored_exchange.id));
        let (stored_task, _) = store.find_or_create(&task).await.unwrap();
        assert!(stored_task.fields.same_content(&task));

        let found = store
            .find_one(EntityKind::Matter, Criteria::ExternalId("M1"))
            .await
            .unwrap()
            .unwrap();
        match found.fields {
            EntityFields::Exchange(e) => {
                assert_eq!(e.status, ExchangeStatus::IdentificationPeriod);
                assert_eq!(e.client_id, Some(client.id));
            }
            other => panic!("expected exchange, got {:?}", other),
        }

        assert!(
            store
                .find_one(EntityKind::Task, Criteria::ExternalId("missing"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_user_lookup_ignores_case() {
        let store = SqliteEntityStore::new(create_test_backend().await);
        let user = store
            .upsert_user("Coordinator@Example.com", Some("Casey"))
            .await
            .unwrap();

        let found = store
            .find_user_by_email("coordinator@example.COM")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, user.id);
        assert!(store.find_user_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_participant_links_are_created_once() {
        let store = SqliteEntityStore::new(create_test_backend().await);
        let (client, _) = store
            .find_or_create(&contact_fields("C1", "Jane Doe"))
            .await
            .unwrap();
        let user = store.upsert_user("casey@example.com", None).await.unwrap();
        let (exchange, _) = store
            .find_or_create(&exchange_fields("M1", "Smith 1031", Some(client.id)))
            .await
            .unwrap();

        let client_link = ParticipantLink::client(client.id);
        let coordinator_link = ParticipantLink::coordinator(user.id);

        assert!(store.link_participant(exchange.id, &client_link).await.unwrap());
        assert!(store.link_participant(exchange.id, &coordinator_link).await.unwrap());
        assert!(!store.link_participant(exchange.id, &client_link).await.unwrap());

        let links = store.participants(exchange.id).await.unwrap();
        assert_eq!(links, vec![client_link, coordinator_link]);
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("casesync.db");

        {
            let backend = SqliteBackend::open(&path, 2).await.unwrap();
            let store = SqliteEntityStore::new(backend);
            store
                .find_or_create(&contact_fields("C1", "Jane Doe"))
                .await
                .unwrap();
        }

        let backend = SqliteBackend::open(&path, 2).await.unwrap();
        let store = SqliteEntityStore::new(backend);
        assert_eq!(store.count(EntityKind::Contact).await.unwrap(), 1);
    }
}

mod sync_run_store_tests {
    use super::*;
    use chrono::{Duration, Utc};

    /// Cutoff for a five minute lease
    fn lease_cutoff() -> chrono::DateTime<Utc> {
        Utc::now() - Duration::minutes(5)
    }

    fn details_with(created: u64) -> RunDetails {
        let mut details = RunDetails::default();
        details.entities.insert(
            "contacts".to_string(),
            BatchResult {
                processed: created,
                created,
                updated: 0,
                errors: Vec::new(),
            },
        );
        details
    }

    #[tokio::test]
    async fn test_run_transitions_exactly_once() {
        let runs = SqliteSyncRunStore::new(create_test_backend().await);
        let run = runs
            .create_run(SyncRunKind::Contacts, Some("scheduler"), lease_cutoff())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.completed_at.is_none());

        let done = runs
            .complete_run(&run.id, RunCompletion::success(details_with(3)))
            .await
            .unwrap();
        assert_eq!(done.status, RunStatus::Success);
        assert_eq!(done.records_created, 3);
        assert!(done.completed_at.unwrap() >= done.started_at);
        assert_eq!(done.triggered_by.as_deref(), Some("scheduler"));
        assert_eq!(done.details, details_with(3));

        let err = runs
            .complete_run(&run.id, RunCompletion::failure("late", RunDetails::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidState(_)));

        let stored = runs.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_complete_unknown_run_is_not_found() {
        let runs = SqliteSyncRunStore::new(create_test_backend().await);
        let err = runs
            .complete_run("nope", RunCompletion::success(RunDetails::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_recent_runs_and_last_successful() {
        let runs = SqliteSyncRunStore::new(create_test_backend().await);

        let first = runs.create_run(SyncRunKind::Full, None, lease_cutoff()).await.unwrap();
        runs.complete_run(&first.id, RunCompletion::success(RunDetails::default()))
            .await
            .unwrap();
        let second = runs.create_run(SyncRunKind::Full, None, lease_cutoff()).await.unwrap();
        runs.complete_run(&second.id, RunCompletion::failure("boom", RunDetails::default()))
            .await
            .unwrap();
        let third = runs.create_run(SyncRunKind::Tasks, None, lease_cutoff()).await.unwrap();

        let recent = runs.recent_runs(10).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![third.id.as_str(), second.id.as_str(), first.id.as_str()]);
        assert_eq!(runs.recent_runs(1).await.unwrap().len(), 1);

        let last = runs.last_successful(SyncRunKind::Full).await.unwrap().unwrap();
        assert_eq!(last.id, first.id);
        assert!(runs.last_successful(SyncRunKind::Tasks).await.unwrap().is_none());

        let since = runs.runs_since(first.started_at).await.unwrap();
        assert_eq!(since.len(), 3);
    }

    #[tokio::test]
    async fn test_abandoned_runs_are_failed_once_stale() {
        let runs = SqliteSyncRunStore::new(create_test_backend().await);
        let finished = runs.create_run(SyncRunKind::Contacts, None, lease_cutoff()).await.unwrap();
        runs.complete_run(&finished.id, RunCompletion::success(RunDetails::default()))
            .await
            .unwrap();
        let stale = runs.create_run(SyncRunKind::Full, None, lease_cutoff()).await.unwrap();

        // Heartbeat is newer than a five minute cutoff
        assert_eq!(runs.fail_abandoned_runs("process exited", lease_cutoff()).await.unwrap(), 0);

        let everything_stale = Utc::now() + Duration::seconds(1);
        assert_eq!(
            runs.fail_abandoned_runs("process exited", everything_stale)
                .await
                .unwrap(),
            1
        );

        let stale = runs.get_run(&stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, RunStatus::Error);
        assert_eq!(stale.error_message.as_deref(), Some("process exited"));
        assert!(stale.completed_at.is_some());
        assert!(!runs.heartbeat(&stale.id).await.unwrap());

        let finished = runs.get_run(&finished.id).await.unwrap().unwrap();
        assert_eq!(finished.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_live_lease_is_shared_across_pools() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("casesync.db");
        let first = SqliteSyncRunStore::new(SqliteBackend::open(&path, 2).await.unwrap());
        let second = SqliteSyncRunStore::new(SqliteBackend::open(&path, 2).await.unwrap());

        let live = first.create_run(SyncRunKind::Full, Some("cron"), lease_cutoff()).await.unwrap();
        assert!(first.heartbeat(&live.id).await.unwrap());

        let err = second
            .create_run(SyncRunKind::Tasks, Some("manual"), lease_cutoff())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::RunInProgress));
        assert_eq!(second.fail_abandoned_runs("abandoned", lease_cutoff()).await.unwrap(), 0);

        // Completing the run releases the lease for everyone
        first
            .complete_run(&live.id, RunCompletion::success(RunDetails::default()))
            .await
            .unwrap();
        let next = second
            .create_run(SyncRunKind::Tasks, Some("manual"), lease_cutoff())
            .await
            .unwrap();
        assert_eq!(next.status, RunStatus::Running);
        assert_eq!(first.recent_runs(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_lease_does_not_block_create() {
        let runs = SqliteSyncRunStore::new(create_test_backend().await);
        runs.create_run(SyncRunKind::Full, None, lease_cutoff()).await.unwrap();

        let everything_stale = Utc::now() + Duration::seconds(1);
        let next = runs
            .create_run(SyncRunKind::Contacts, None, everything_stale)
            .await
            .unwrap();
        assert_eq!(next.kind, SyncRunKind::Contacts);
    }
}
