// libs/appointplan-cell/tests/commit_test.rs
mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use serde_json::json;

use appointplan_cell::models::{AppointplanError, PlannedAppointment};
use appointplan_cell::services::batch::BatchTransport;
use appointplan_cell::services::commit::{CommitCoordinator, RollbackReport};
use appointplan_cell::services::mappings::StoreMappings;
use common::{interval, FakeStore};
use shared_utils::test_utils::TestConfig;

fn appointments(count: usize) -> Vec<PlannedAppointment> {
    (0..count)
        .map(|i| PlannedAppointment {
            specialist_id: 3,
            patient_id: 77,
            type_code: "R".to_string(),
            interval: interval(
                &format!("2025-01-{:02} 09:00", 6 + i),
                &format!("2025-01-{:02} 09:30", 6 + i),
            ),
            remote_id: None,
        })
        .collect()
}

fn coordinator(store: Arc<FakeStore>) -> CommitCoordinator {
    let transport: Arc<dyn BatchTransport> = store;
    CommitCoordinator::new(
        transport,
        TestConfig::default().to_arc(),
        Arc::new(StoreMappings::new(vec![(25, "R".to_string())], vec![("51".to_string(), "R".to_string())])),
    )
}

#[tokio::test]
async fn test_commit_attaches_remote_ids_in_order() {
    let store = Arc::new(FakeStore::new());

    let committed = coordinator(store.clone()).commit(4521, appointments(3)).await.unwrap();

    let ids: Vec<Option<u64>> = committed.iter().map(|a| a.remote_id).collect();
    assert_eq!(ids, vec![Some(100), Some(101), Some(102)]);
    assert_eq!(store.item_count(), 3);

    let calls = store.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].1, "creates must be sent with halt");
}

#[tokio::test]
async fn test_commit_writes_mapped_fields() {
    let store = Arc::new(FakeStore::new());

    coordinator(store.clone()).commit(4521, appointments(1)).await.unwrap();

    let item = &store.items()[0];
    assert_eq!(item["assignedById"], json!("3"));
    assert_eq!(item["ufCrm3Children"], json!("77"));
    assert_eq!(item["ufCrm3ParentDeal"], json!("4521"));
    assert_eq!(item["ufCrm3Code"], json!("51"));
    assert_eq!(item["ufCrm3Status"], json!("50"));
    assert_eq!(item["ufCrm3StartDate"], json!("2025-01-06T09:00:00+03:00"));
    assert_eq!(item["ufCrm3EndDate"], json!("2025-01-06T09:30:00+03:00"));
}

#[tokio::test]
async fn test_failing_third_of_five_rolls_back_two() {
    let store = Arc::new(FakeStore::failing_create(3));

    let result = coordinator(store.clone()).commit(4521, appointments(5)).await;

    assert_matches!(
        result,
        Err(AppointplanError::Commit { ref reason, rolled_back: 2, rollback_failed: false })
            if reason.contains("create_2")
    );
    assert_eq!(store.commands_of("delete_"), 2);
    assert_eq!(store.item_count(), 0);

    let calls = store.calls();
    assert_eq!(calls.len(), 2);
    assert!(!calls[1].1, "rollback must not halt");
}

#[tokio::test]
async fn test_first_create_failure_needs_no_rollback() {
    let store = Arc::new(FakeStore::failing_create(1));

    let result = coordinator(store.clone()).commit(4521, appointments(2)).await;

    assert_matches!(result, Err(AppointplanError::Commit { rolled_back: 0, rollback_failed: false, .. }));
    assert_eq!(store.calls().len(), 1);
    assert_eq!(store.item_count(), 0);
}

#[tokio::test]
async fn test_transport_failure_mid_commit_rolls_back_earlier_chunks() {
    let mut store = FakeStore::new();
    store.fail_call_at = Some(2);
    let store = Arc::new(store);
    let config = {
        let mut c = TestConfig::default();
        c.batch_limit = 2;
        c.to_arc()
    };
    let transport: Arc<dyn BatchTransport> = store.clone();
    let coordinator = CommitCoordinator::new(transport, config, Arc::new(StoreMappings::default()));

    let result = coordinator.commit(4521, appointments(5)).await;

    assert_matches!(result, Err(AppointplanError::Commit { rolled_back: 2, .. }));
    assert_eq!(store.commands_of("delete_"), 2);
    assert_eq!(store.item_count(), 0);
}

#[tokio::test]
async fn test_rollback_failure_does_not_mask_commit_error() {
    let mut store = FakeStore::failing_create(2);
    store.fail_deletes = true;
    let store = Arc::new(store);

    let result = coordinator(store.clone()).commit(4521, appointments(3)).await;

    assert_matches!(
        result,
        Err(AppointplanError::Commit { ref reason, rolled_back: 0, rollback_failed: true })
            if reason.contains("create_1")
    );
    assert_eq!(store.item_count(), 1);
}

#[tokio::test]
async fn test_interrupted_rollback_counts_deletes_already_made() {
    // Creates go out two per call and the fifth fails; the second delete call then drops.
    let mut store = FakeStore::failing_create(5);
    store.fail_call_at = Some(5);
    let store = Arc::new(store);
    let config = {
        let mut c = TestConfig::default();
        c.batch_limit = 2;
        c.to_arc()
    };
    let transport: Arc<dyn BatchTransport> = store.clone();
    let coordinator = CommitCoordinator::new(transport, config, Arc::new(StoreMappings::default()));

    let result = coordinator.commit(4521, appointments(5)).await;

    assert_matches!(
        result,
        Err(AppointplanError::Commit { ref reason, rolled_back: 2, rollback_failed: true })
            if reason.contains("create_4")
    );
    assert_eq!(store.calls().len(), 5);
    assert_eq!(store.item_count(), 2);
}

#[tokio::test]
async fn test_rollback_reports_every_delete() {
    let store = Arc::new(FakeStore::new());
    let coordinator = coordinator(store.clone());
    let created = coordinator.commit(4521, appointments(3)).await.unwrap();
    let ids: Vec<u64> = created.iter().filter_map(|a| a.remote_id).collect();

    let report = coordinator.rollback(&ids).await;

    assert_eq!(report, RollbackReport { requested: 3, deleted: 3 });
    assert!(report.is_complete());
    assert_eq!(store.item_count(), 0);
}

#[tokio::test]
async fn test_empty_commit_is_a_no_op() {
    let store = Arc::new(FakeStore::new());
    let committed = coordinator(store.clone()).commit(4521, vec![]).await.unwrap();
    assert!(committed.is_empty());
    assert!(store.calls().is_empty());
}
