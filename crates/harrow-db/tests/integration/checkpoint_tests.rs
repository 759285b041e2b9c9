use chrono::{TimeDelta, Utc};
use harrow_core::checkpoint::{
    Checkpoint, CheckpointFilter, CheckpointKey, CheckpointStatus, CrawlMode, ItemType,
    ProgressUpdate,
};
use harrow_core::checkpoint_store::CheckpointStore;
use harrow_core::snapshot::FileSnapshotStore;
use harrow_core::traits::{PrimaryStore, SnapshotStore};
use harrow_db::CheckpointRepository;
use serde_json::json;
use uuid::Uuid;

use crate::integration::common::setup_test_db;

fn search_key(keywords: &str) -> CheckpointKey {
    CheckpointKey::new("xhs", CrawlMode::Search).with_scope(keywords)
}

#[tokio::test]
async fn upsert_and_get_roundtrip() {
    let (pool, _container) = setup_test_db().await;
    let repo = CheckpointRepository::new(pool);

    let mut cp = Checkpoint::new(&search_key("rust,tokio").with_project("demo"));
    cp.update_progress(ProgressUpdate {
        keyword_index: Some(1),
        page: Some(3),
        cursor: Some(Some("c3".into())),
        ..Default::default()
    })
    .unwrap();
    cp.set_meta("search_cursor", json!("abc"));
    cp.notes_fetched = 7;
    repo.upsert_checkpoint(&cp).await.unwrap();

    let stored = repo.get_checkpoint(cp.task_id).await.unwrap().unwrap();
    assert_eq!(stored.mode, CrawlMode::Search);
    assert_eq!(stored.scope_key.as_deref(), Some("rust,tokio"));
    assert_eq!(stored.project.as_deref(), Some("demo"));
    assert_eq!(stored.current_keyword_index, 1);
    assert_eq!(stored.current_page, 3);
    assert_eq!(stored.cursor.as_deref(), Some("c3"));
    assert_eq!(stored.notes_fetched, 7);
    assert_eq!(stored.meta_str("search_cursor"), Some("abc"));
    assert_eq!(stored.status, CheckpointStatus::Running);

    // Upsert replaces progress in place.
    cp.update_progress(ProgressUpdate {
        page: Some(4),
        ..Default::default()
    })
    .unwrap();
    repo.upsert_checkpoint(&cp).await.unwrap();
    let stored = repo.get_checkpoint(cp.task_id).await.unwrap().unwrap();
    assert_eq!(stored.current_page, 4);
}

#[tokio::test]
async fn find_matching_skips_terminal_and_other_keys() {
    let (pool, _container) = setup_test_db().await;
    let repo = CheckpointRepository::new(pool);
    let key = search_key("rust");

    let mut done = Checkpoint::new(&key);
    done.complete().unwrap();
    repo.upsert_checkpoint(&done).await.unwrap();

    let other = Checkpoint::new(&search_key("go"));
    repo.upsert_checkpoint(&other).await.unwrap();

    assert!(repo.find_matching(&key).await.unwrap().is_none());

    let mut paused = Checkpoint::new(&key);
    paused.pause().unwrap();
    repo.upsert_checkpoint(&paused).await.unwrap();

    let found = repo.find_matching(&key).await.unwrap().unwrap();
    assert_eq!(found.task_id, paused.task_id);
    assert_eq!(found.status, CheckpointStatus::Paused);

    // Project is part of the key, NULL included.
    assert!(
        repo.find_matching(&key.clone().with_project("p"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn ledger_insert_is_idempotent() {
    let (pool, _container) = setup_test_db().await;
    let repo = CheckpointRepository::new(pool);
    let cp = Checkpoint::new(&search_key("rust"));
    repo.upsert_checkpoint(&cp).await.unwrap();

    assert!(!repo.is_processed(cp.task_id, "n1", ItemType::Note).await.unwrap());
    assert!(repo.add_processed(cp.task_id, "n1", ItemType::Note).await.unwrap());
    assert!(!repo.add_processed(cp.task_id, "n1", ItemType::Note).await.unwrap());
    assert!(repo.add_processed(cp.task_id, "n1", ItemType::Comment).await.unwrap());

    assert!(repo.is_processed(cp.task_id, "n1", ItemType::Note).await.unwrap());
    assert_eq!(repo.ledger_count(cp.task_id).await.unwrap(), 2);
}

#[tokio::test]
async fn delete_removes_ledger_rows() {
    let (pool, _container) = setup_test_db().await;
    let repo = CheckpointRepository::new(pool);
    let cp = Checkpoint::new(&search_key("rust"));
    repo.upsert_checkpoint(&cp).await.unwrap();
    repo.add_processed(cp.task_id, "n1", ItemType::Note).await.unwrap();

    assert!(repo.delete_checkpoint(cp.task_id).await.unwrap());
    assert_eq!(repo.ledger_count(cp.task_id).await.unwrap(), 0);
    assert!(repo.get_checkpoint(cp.task_id).await.unwrap().is_none());
    assert!(!repo.delete_checkpoint(cp.task_id).await.unwrap());
}

#[tokio::test]
async fn list_filters_and_limits() {
    let (pool, _container) = setup_test_db().await;
    let repo = CheckpointRepository::new(pool);

    for scope in ["a", "b", "c"] {
        repo.upsert_checkpoint(&Checkpoint::new(&search_key(scope)))
            .await
            .unwrap();
    }
    let mut failed = Checkpoint::new(&CheckpointKey::new("dy", CrawlMode::Feed));
    failed.fail("blocked").unwrap();
    repo.upsert_checkpoint(&failed).await.unwrap();

    let all = repo.list_checkpoints(&CheckpointFilter::default()).await.unwrap();
    assert_eq!(all.len(), 4);

    let xhs = repo
        .list_checkpoints(&CheckpointFilter {
            platform: Some("xhs".into()),
            limit: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(xhs.len(), 2);

    let failed_only = repo
        .list_checkpoints(&CheckpointFilter {
            status: Some(CheckpointStatus::Failed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failed_only.len(), 1);
    assert_eq!(failed_only[0].error_message.as_deref(), Some("blocked"));
}

#[tokio::test]
async fn store_cleanup_removes_stale_checkpoints() {
    let (pool, _container) = setup_test_db().await;
    let repo = CheckpointRepository::new(pool);
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(repo.clone(), FileSnapshotStore::new(dir.path()));

    let mut stale = Checkpoint::new(&search_key("old"));
    stale.updated_at = Utc::now() - TimeDelta::days(30);
    repo.upsert_checkpoint(&stale).await.unwrap();
    repo.add_processed(stale.task_id, "n1", ItemType::Note).await.unwrap();

    let fresh = store.get_or_create(&search_key("new")).await.unwrap();

    assert_eq!(store.cleanup_older_than(7).await.unwrap(), 1);
    assert!(repo.get_checkpoint(stale.task_id).await.unwrap().is_none());
    assert_eq!(repo.ledger_count(stale.task_id).await.unwrap(), 0);
    assert!(store.get(fresh.task_id).await.unwrap().is_some());
}

#[tokio::test]
async fn store_resumes_from_database() {
    let (pool, _container) = setup_test_db().await;
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(
        CheckpointRepository::new(pool),
        FileSnapshotStore::new(dir.path()),
    );
    let key = search_key("rust");

    let mut first = store.get_or_create(&key).await.unwrap();
    first
        .update_progress(ProgressUpdate {
            page: Some(2),
            ..Default::default()
        })
        .unwrap();
    store.save(&mut first).await.unwrap();
    store
        .add_processed_note(&mut first, "n1", ItemType::Note)
        .await
        .unwrap();

    let resumed = store.get_or_create(&key).await.unwrap();
    assert_eq!(resumed.task_id, first.task_id);
    assert_eq!(resumed.current_page, 2);
    assert!(
        store
            .is_note_processed(resumed.task_id, "n1", ItemType::Note)
            .await
            .unwrap()
    );
    assert!(
        !store
            .is_note_processed(Uuid::new_v4(), "n1", ItemType::Note)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn second_resumable_checkpoint_for_a_key_is_rejected() {
    let (pool, _container) = setup_test_db().await;
    let repo = CheckpointRepository::new(pool);
    let key = search_key("rust").with_project("demo");

    let first = Checkpoint::new(&key);
    repo.upsert_checkpoint(&first).await.unwrap();
    assert!(repo.upsert_checkpoint(&Checkpoint::new(&key)).await.is_err());

    let second = Checkpoint::new(&key);
    let stored = repo.insert_if_absent(&second).await.unwrap();
    assert_eq!(stored.task_id, first.task_id);
    assert!(repo.get_checkpoint(second.task_id).await.unwrap().is_none());

    // Once the first one is terminal the key is free again.
    let mut done = first.clone();
    done.complete().unwrap();
    repo.upsert_checkpoint(&done).await.unwrap();
    let stored = repo.insert_if_absent(&second).await.unwrap();
    assert_eq!(stored.task_id, second.task_id);
}

#[tokio::test]
async fn concurrent_get_or_create_shares_one_checkpoint() {
    let (pool, _container) = setup_test_db().await;
    let repo = CheckpointRepository::new(pool);
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    // Separate stores stand in for separate processes.
    let store_a = CheckpointStore::new(repo.clone(), FileSnapshotStore::new(dir_a.path()));
    let store_b = CheckpointStore::new(repo.clone(), FileSnapshotStore::new(dir_b.path()));
    let key = search_key("rust,tokio");

    let (a, b) = tokio::join!(store_a.get_or_create(&key), store_b.get_or_create(&key));
    assert_eq!(a.unwrap().task_id, b.unwrap().task_id);

    let running = repo
        .list_checkpoints(&CheckpointFilter {
            status: Some(CheckpointStatus::Running),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(running.len(), 1);
}

#[tokio::test]
async fn stale_snapshot_does_not_revive_completed_checkpoint() {
    let (pool, _container) = setup_test_db().await;
    let repo = CheckpointRepository::new(pool);
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(repo.clone(), FileSnapshotStore::new(dir.path()));
    let key = search_key("rust");

    let running = store.get_or_create(&key).await.unwrap();
    let mut done = running.clone();
    done.complete().unwrap();
    repo.upsert_checkpoint(&done).await.unwrap();

    assert!(store.find_matching_checkpoint(&key).await.unwrap().is_none());
    let stored = repo.get_checkpoint(running.task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, CheckpointStatus::Completed);

    let fresh = store.get_or_create(&key).await.unwrap();
    assert_ne!(fresh.task_id, running.task_id);
}

#[tokio::test]
async fn both_tiers_load_identical_checkpoints() {
    let (pool, _container) = setup_test_db().await;
    let repo = CheckpointRepository::new(pool);
    let dir = tempfile::tempdir().unwrap();
    let snapshots = FileSnapshotStore::new(dir.path());
    let store = CheckpointStore::new(repo.clone(), snapshots.clone());

    let mut cp = store
        .get_or_create(&CheckpointKey::new("xhs", CrawlMode::Detail).with_scope("n1,n2,n3"))
        .await
        .unwrap();
    cp.update_progress(ProgressUpdate {
        id_index: Some(2),
        cursor: Some(Some("page-2".into())),
        ..Default::default()
    })
    .unwrap();
    cp.set_meta(
        "comment_cursors",
        json!({"n1": "c-40", "n2": {"cursor": "c-7", "depth": [1, 2, {"sub": null}]}}),
    );
    cp.set_meta("comments_done", json!(["n0", "n9"]));
    cp.set_meta("ratio", json!(0.25));
    store.save(&mut cp).await.unwrap();

    let from_primary = repo.get_checkpoint(cp.task_id).await.unwrap().unwrap();
    let from_snapshot = snapshots.load_snapshot(cp.task_id).await.unwrap().unwrap();
    assert_eq!(from_primary, cp);
    assert_eq!(from_snapshot, cp);

    store.mark_completed(&mut cp).await.unwrap();
    let from_primary = repo.get_checkpoint(cp.task_id).await.unwrap().unwrap();
    let from_snapshot = snapshots.load_snapshot(cp.task_id).await.unwrap().unwrap();
    assert_eq!(from_primary, from_snapshot);
    assert!(from_primary.completed_at.is_some());
}
