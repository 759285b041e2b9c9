//! In-process implementation of the account and checkpoint stores for tests.
//!
//! Behaves like the PostgreSQL repositories: the ledger is a set keyed by
//! `(checkpoint_id, item_id, item_type)`, deleting a checkpoint removes its
//! ledger rows first, and at most one Running/Paused checkpoint exists per
//! key. Checkpoint lookups yield to the scheduler first, the way a network
//! round trip would.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::account::{Account, AccountStatus};
use crate::checkpoint::{Checkpoint, CheckpointFilter, CheckpointKey, ItemType, ProcessedItem};
use crate::error::AppError;
use crate::traits::{AccountStore, PrimaryStore};

#[derive(Debug, Default)]
struct MemoryInner {
    accounts: Vec<Account>,
    checkpoints: HashMap<Uuid, Checkpoint>,
    ledger: HashSet<ProcessedItem>,
}

/// Thread-safe in-memory store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
    unreachable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`AppError::Unreachable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn lock_inner(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned memory store mutex");
            poisoned.into_inner()
        })
    }

    fn guard(&self) -> Result<MutexGuard<'_, MemoryInner>, AppError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AppError::Unreachable("memory store offline".into()));
        }
        Ok(self.lock_inner())
    }
}

impl AccountStore for MemoryStore {
    async fn create_account(&self, account: &Account) -> Result<(), AppError> {
        let mut inner = self.guard()?;
        if inner.accounts.iter().any(|a| a.id == account.id) {
            return Err(AppError::DatabaseError(format!(
                "account {} already exists",
                account.id
            )));
        }
        inner.accounts.push(account.clone());
        Ok(())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        Ok(self.guard()?.accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn list_accounts(
        &self,
        platform: Option<&str>,
        status: Option<AccountStatus>,
    ) -> Result<Vec<Account>, AppError> {
        let inner = self.guard()?;
        Ok(inner
            .accounts
            .iter()
            .filter(|a| platform.is_none_or(|p| a.platform == p))
            .filter(|a| status.is_none_or(|s| a.status == s))
            .cloned()
            .collect())
    }

    async fn update_account(&self, account: &Account) -> Result<bool, AppError> {
        let mut inner = self.guard()?;
        match inner.accounts.iter_mut().find(|a| a.id == account.id) {
            Some(slot) => {
                *slot = account.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_account(&self, id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.guard()?;
        let before = inner.accounts.len();
        inner.accounts.retain(|a| a.id != id);
        Ok(inner.accounts.len() != before)
    }
}

impl PrimaryStore for MemoryStore {
    async fn upsert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), AppError> {
        self.guard()?
            .checkpoints
            .insert(checkpoint.task_id, checkpoint.clone());
        Ok(())
    }

    async fn get_checkpoint(&self, task_id: Uuid) -> Result<Option<Checkpoint>, AppError> {
        tokio::task::yield_now().await;
        Ok(self.guard()?.checkpoints.get(&task_id).cloned())
    }

    async fn insert_if_absent(&self, checkpoint: &Checkpoint) -> Result<Checkpoint, AppError> {
        tokio::task::yield_now().await;
        let mut inner = self.guard()?;
        let key = checkpoint.key();
        if let Some(existing) = inner
            .checkpoints
            .values()
            .find(|cp| cp.status.is_resumable() && key.matches(cp))
        {
            return Ok(existing.clone());
        }
        inner
            .checkpoints
            .insert(checkpoint.task_id, checkpoint.clone());
        Ok(checkpoint.clone())
    }

    async fn find_matching(&self, key: &CheckpointKey) -> Result<Option<Checkpoint>, AppError> {
        tokio::task::yield_now().await;
        let inner = self.guard()?;
        Ok(inner
            .checkpoints
            .values()
            .filter(|cp| cp.status.is_resumable() && key.matches(cp))
            .max_by_key(|cp| cp.updated_at)
            .cloned())
    }

    async fn list_checkpoints(&self, filter: &CheckpointFilter) -> Result<Vec<Checkpoint>, AppError> {
        let inner = self.guard()?;
        let mut checkpoints: Vec<Checkpoint> = inner
            .checkpoints
            .values()
            .filter(|cp| filter.platform.as_ref().is_none_or(|p| &cp.platform == p))
            .filter(|cp| filter.status.is_none_or(|s| cp.status == s))
            .cloned()
            .collect();
        checkpoints.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if let Some(limit) = filter.limit {
            checkpoints.truncate(limit);
        }
        Ok(checkpoints)
    }

    async fn delete_checkpoint(&self, task_id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.guard()?;
        inner.ledger.retain(|row| row.checkpoint_id != task_id);
        Ok(inner.checkpoints.remove(&task_id).is_some())
    }

    async fn checkpoints_updated_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let inner = self.guard()?;
        Ok(inner
            .checkpoints
            .values()
            .filter(|cp| cp.updated_at < cutoff)
            .map(|cp| cp.task_id)
            .collect())
    }

    async fn is_processed(
        &self,
        checkpoint_id: Uuid,
        item_id: &str,
        item_type: ItemType,
    ) -> Result<bool, AppError> {
        let row = ProcessedItem {
            checkpoint_id,
            item_id: item_id.to_string(),
            item_type,
        };
        Ok(self.guard()?.ledger.contains(&row))
    }

    async fn add_processed(
        &self,
        checkpoint_id: Uuid,
        item_id: &str,
        item_type: ItemType,
    ) -> Result<bool, AppError> {
        let row = ProcessedItem {
            checkpoint_id,
            item_id: item_id.to_string(),
            item_type,
        };
        Ok(self.guard()?.ledger.insert(row))
    }

    async fn ledger_count(&self, checkpoint_id: Uuid) -> Result<u64, AppError> {
        let inner = self.guard()?;
        Ok(inner
            .ledger
            .iter()
            .filter(|row| row.checkpoint_id == checkpoint_id)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CrawlMode;

    #[tokio::test]
    async fn ledger_insert_is_idempotent() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();

        assert!(store.add_processed(id, "n1", ItemType::Note).await.unwrap());
        assert!(!store.add_processed(id, "n1", ItemType::Note).await.unwrap());
        // Same id, different type is a different row.
        assert!(store.add_processed(id, "n1", ItemType::Comment).await.unwrap());
        assert_eq!(store.ledger_count(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_checkpoint_drops_ledger_rows() {
        let store = MemoryStore::new();
        let cp = Checkpoint::new(&CheckpointKey::new("xhs", CrawlMode::Search).with_scope("a"));
        store.upsert_checkpoint(&cp).await.unwrap();
        store.add_processed(cp.task_id, "n1", ItemType::Note).await.unwrap();

        assert!(store.delete_checkpoint(cp.task_id).await.unwrap());
        assert_eq!(store.ledger_count(cp.task_id).await.unwrap(), 0);
        assert!(!store.delete_checkpoint(cp.task_id).await.unwrap());
    }

    #[tokio::test]
    async fn find_matching_skips_terminal_checkpoints() {
        let store = MemoryStore::new();
        let key = CheckpointKey::new("xhs", CrawlMode::Search).with_scope("a,b");

        let mut done = Checkpoint::new(&key);
        done.complete().unwrap();
        store.upsert_checkpoint(&done).await.unwrap();
        assert!(store.find_matching(&key).await.unwrap().is_none());

        let running = Checkpoint::new(&key);
        store.upsert_checkpoint(&running).await.unwrap();
        let found = store.find_matching(&key).await.unwrap().unwrap();
        assert_eq!(found.task_id, running.task_id);
    }

    #[tokio::test]
    async fn insert_if_absent_keeps_the_resumable_checkpoint() {
        let store = MemoryStore::new();
        let key = CheckpointKey::new("xhs", CrawlMode::Feed);

        let first = Checkpoint::new(&key);
        let stored = store.insert_if_absent(&first).await.unwrap();
        assert_eq!(stored.task_id, first.task_id);

        let second = Checkpoint::new(&key);
        let stored = store.insert_if_absent(&second).await.unwrap();
        assert_eq!(stored.task_id, first.task_id);
        assert!(store.get_checkpoint(second.task_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreachable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unreachable(true);
        let err = store.get_checkpoint(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::Unreachable(_)));
        store.set_unreachable(false);
        assert!(store.get_checkpoint(Uuid::new_v4()).await.unwrap().is_none());
    }
}
