//! End-to-end inventory and purge flows against the in-memory backend

use std::sync::Arc;

use backup_inventory::storage::{ListRequest, MemoryBackend};
use backup_inventory::verify::{wait_for_presence, PresencePolicy};
use backup_inventory::{
    full_prefix, BackendKind, BackupLocation, BackupLocator, BackupPurger, BucketScanner,
    InventoryError, ObjectStoreBackend,
};
use futures::TryStreamExt;
use tokio_test::{assert_err, assert_ok};

fn scenario_backend() -> Arc<MemoryBackend> {
    Arc::new(MemoryBackend::new().with_objects(
        "velero",
        [
            "backups/alpha-1/a.json",
            "backups/alpha-1/b.json",
            "backups/beta-2/c.json",
        ],
    ))
}

#[tokio::test]
async fn test_scan_yields_every_object_whatever_the_page_size() {
    let keys: Vec<String> = (0..25).map(|i| format!("backups/b1/part-{:02}", i)).collect();

    for page_size in [1, 2, keys.len()] {
        let backend = MemoryBackend::new()
            .with_page_size(page_size)
            .with_objects("velero", keys.clone());
        let request = ListRequest::recursive("velero", "backups/");
        let scanner = BucketScanner::new(&backend);
        let listed: Vec<String> = scanner
            .scan(&request)
            .map_ok(|entry| entry.key)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(listed, keys, "page size {}", page_size);
    }
}

#[test]
fn test_full_prefix_trimming() {
    assert_eq!(full_prefix("backups/", "b1").unwrap(), "backups/b1/");
    assert_eq!(full_prefix("", "b1").unwrap(), "b1/");
}

#[tokio::test]
async fn test_exists_matches_by_substring() {
    let backend = Arc::new(MemoryBackend::new().with_objects(
        "velero",
        ["backups/mybackup-20210101/velero-backup.json"],
    ));
    let locator = BackupLocator::new(backend);
    let location = BackupLocation::new("velero", "backups");

    assert!(assert_ok!(locator.exists(&location, "mybackup").await));
    assert!(!assert_ok!(locator.exists(&location, "yourbackup").await));
}

#[tokio::test]
async fn test_prepare_bucket_twice() {
    let backend = MemoryBackend::new();
    assert_ok!(backend.prepare_bucket("velero").await);
    assert_ok!(backend.prepare_bucket("velero").await);
    assert!(backend.has_bucket("velero"));
}

#[tokio::test]
async fn test_purge_without_objects_is_a_no_op() {
    let backend = scenario_backend();
    let report = BackupPurger::new(backend.clone())
        .purge(&BackupLocation::new("velero", "backups/"), "gamma-3")
        .await
        .unwrap();

    assert_eq!(report.matched, 0);
    assert_eq!(report.deleted, 0);
    assert_eq!(backend.delete_calls(), 0);
    assert_eq!(backend.keys("velero").len(), 3);
}

#[tokio::test]
async fn test_exists_scenario() {
    let locator = BackupLocator::new(scenario_backend());
    let location = BackupLocation::new("velero", "backups/");

    assert!(locator.exists(&location, "alpha").await.unwrap());
    assert!(!locator.exists(&location, "gamma").await.unwrap());
}

#[tokio::test]
async fn test_purge_scenario() {
    let backend = scenario_backend();
    let report = BackupPurger::new(backend.clone())
        .purge(&BackupLocation::new("velero", "backups/"), "alpha-1")
        .await
        .unwrap();

    assert_eq!(report.full_prefix, "backups/alpha-1/");
    assert_eq!(report.deleted, 2);
    assert_eq!(backend.keys("velero"), vec!["backups/beta-2/c.json".to_string()]);
}

#[tokio::test]
async fn test_substring_match_can_hit_a_longer_name() {
    let backend = Arc::new(MemoryBackend::new().with_objects("velero", ["backups/backup10/x"]));
    let locator = BackupLocator::new(backend.clone());
    let location = BackupLocation::new("velero", "backups");

    // The locator reports `backup1` as present, the purger only ever touches `backup1/`
    assert!(locator.exists(&location, "backup1").await.unwrap());
    let report = BackupPurger::new(backend.clone())
        .purge(&location, "backup1")
        .await
        .unwrap();
    assert_eq!(report.deleted, 0);
    assert_eq!(backend.keys("velero").len(), 1);
}

#[tokio::test]
async fn test_subdir_layout() {
    let backend = Arc::new(MemoryBackend::new().with_objects(
        "velero",
        [
            "cluster-a/backups/nightly-1/meta.json",
            "cluster-a/backups/nightly-1/data.tar.gz",
            "cluster-a/restores/nightly-1/log",
        ],
    ));
    let location = BackupLocation::new("velero", "cluster-a").with_subdir("backups");

    assert!(BackupLocator::new(backend.clone())
        .exists(&location, "nightly-1")
        .await
        .unwrap());
    let report = BackupPurger::new(backend.clone())
        .purge(&location, "nightly-1")
        .await
        .unwrap();

    assert_eq!(report.full_prefix, "cluster-a/backups/nightly-1/");
    assert_eq!(report.deleted, 2);
    assert_eq!(backend.keys("velero"), vec!["cluster-a/restores/nightly-1/log".to_string()]);
}

#[tokio::test]
async fn test_failed_batch_reports_progress() {
    let keys: Vec<String> = (0..6).map(|i| format!("backups/b1/{}", i)).collect();
    let backend = Arc::new(
        MemoryBackend::new()
            .with_max_delete_batch(2)
            .failing_delete_at(1)
            .with_objects("velero", keys),
    );
    let result = BackupPurger::new(backend.clone())
        .purge(&BackupLocation::new("velero", "backups"), "b1")
        .await;

    match assert_err!(result) {
        InventoryError::Delete { deleted, prefix, .. } => {
            assert_eq!(deleted, 2);
            assert_eq!(prefix, "backups/b1/");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Nothing is rolled back
    assert_eq!(backend.keys("velero").len(), 4);
}

#[tokio::test]
async fn test_listing_failure_during_lookup() {
    let backend = Arc::new(scenario_backend_failing_list());
    let result = BackupLocator::new(backend)
        .exists(&BackupLocation::new("velero", "backups"), "alpha")
        .await;
    assert!(matches!(result, Err(InventoryError::List { .. })));
}

fn scenario_backend_failing_list() -> MemoryBackend {
    MemoryBackend::new()
        .failing_list_at(0)
        .with_objects("velero", ["backups/alpha-1/a.json"])
}

#[tokio::test]
async fn test_wait_for_absence_after_purge() {
    let backend = scenario_backend();
    let location = BackupLocation::new("velero", "backups");
    let policy = PresencePolicy {
        attempts: 2,
        interval: std::time::Duration::from_millis(1),
    };
    let locator = BackupLocator::new(backend.clone());

    assert_ok!(wait_for_presence(&locator, &location, "alpha-1", true, policy).await);
    assert_ok!(BackupPurger::new(backend).purge(&location, "alpha-1").await);
    assert_ok!(wait_for_presence(&locator, &location, "alpha-1", false, policy).await);
}

#[tokio::test]
async fn test_facade_rejects_incomplete_config() {
    let result = backup_inventory::is_objects_in_bucket(
        BackendKind::Aws,
        None,
        "velero",
        "backups",
        "s3ForcePathStyle=true",
        "alpha",
    )
    .await;
    assert!(matches!(result, Err(InventoryError::Config(_))));

    let result = backup_inventory::delete_objects_in_bucket(
        BackendKind::Azure,
        None,
        "velero",
        "backups",
        "not-a-pair",
        "alpha",
    )
    .await;
    assert!(matches!(result, Err(InventoryError::Config(_))));
}
