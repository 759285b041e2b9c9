use chrono::{TimeDelta, Utc};
use harrow_core::account::{Account, AccountStatus, FailureKind, NewAccount};
use harrow_core::rotator::{AccountRotator, RotationConfig};
use harrow_core::traits::AccountStore;
use harrow_db::AccountRepository;
use uuid::Uuid;

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn create_and_get_account() {
    let (pool, _container) = setup_test_db().await;
    let repo = AccountRepository::new(pool);

    let account = Account::new("xhs", "sid=1").with_notes("main");
    repo.create_account(&account).await.unwrap();

    let stored = repo.get_account(account.id).await.unwrap().unwrap();
    assert_eq!(stored.platform, "xhs");
    assert_eq!(stored.credential, "sid=1");
    assert_eq!(stored.status, AccountStatus::Active);
    assert_eq!(stored.notes.as_deref(), Some("main"));
    assert_eq!(stored.request_count, 0);
}

#[tokio::test]
async fn get_unknown_account_is_none() {
    let (pool, _container) = setup_test_db().await;
    let repo = AccountRepository::new(pool);

    assert!(repo.get_account(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn list_filters_by_platform_and_status() {
    let (pool, _container) = setup_test_db().await;
    let repo = AccountRepository::new(pool);

    let a = Account::new("xhs", "a");
    let mut b = Account::new("xhs", "b");
    b.ban(TimeDelta::hours(24), Utc::now());
    let c = Account::new("dy", "c");
    for account in [&a, &b, &c] {
        repo.create_account(account).await.unwrap();
    }

    assert_eq!(repo.list_accounts(None, None).await.unwrap().len(), 3);
    assert_eq!(repo.list_accounts(Some("xhs"), None).await.unwrap().len(), 2);

    let banned = repo
        .list_accounts(Some("xhs"), Some(AccountStatus::Banned))
        .await
        .unwrap();
    assert_eq!(banned.len(), 1);
    assert_eq!(banned[0].id, b.id);
    assert!(banned[0].banned_until.is_some());
}

#[tokio::test]
async fn update_and_delete_report_existence() {
    let (pool, _container) = setup_test_db().await;
    let repo = AccountRepository::new(pool);

    let mut account = Account::new("xhs", "a");
    assert!(!repo.update_account(&account).await.unwrap());

    repo.create_account(&account).await.unwrap();
    account.record_request(Utc::now());
    account.record_success(Utc::now());
    assert!(repo.update_account(&account).await.unwrap());

    let stored = repo.get_account(account.id).await.unwrap().unwrap();
    assert_eq!(stored.request_count, 1);
    assert_eq!(stored.success_count, 1);

    assert!(repo.delete_account(account.id).await.unwrap());
    assert!(!repo.delete_account(account.id).await.unwrap());
}

#[tokio::test]
async fn rotator_persists_state_changes() {
    let (pool, _container) = setup_test_db().await;
    let repo = AccountRepository::new(pool);
    let rotator = AccountRotator::new(repo.clone(), RotationConfig::default());

    let first = rotator.add_account(NewAccount::new("xhs", "a")).await.unwrap();
    rotator.add_account(NewAccount::new("xhs", "b")).await.unwrap();

    rotator.record_error(first.id, FailureKind::Banned).await;

    let stored = repo.get_account(first.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Banned);
    assert_eq!(stored.error_count, 1);

    // A fresh rotator sees the persisted ban and skips the account.
    let reloaded = AccountRotator::new(repo, RotationConfig::default());
    assert_eq!(reloaded.load("xhs").await.unwrap(), 2);
    let picked = reloaded.get_account("xhs").await.unwrap();
    assert_ne!(picked.id, first.id);
}
