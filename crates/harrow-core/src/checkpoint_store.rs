//! Two-tier checkpoint persistence.
//!
//! The [`PrimaryStore`] is authoritative and owns the dedup ledger. The
//! [`SnapshotStore`] is a best-effort local copy that lets a task resume when
//! the primary is unreachable at startup. Save goes primary first, then
//! snapshot; a snapshot failure is logged and never surfaced.
//!
//! Creation is serialised in-process and made atomic in the primary through
//! [`PrimaryStore::insert_if_absent`], so one key never has two resumable
//! checkpoints.
//!
//! Positive ledger hits are memoised in a moka cache. A row once written is
//! never un-written for the life of its checkpoint, so a cached `true` can
//! only go stale through `delete`, which invalidates it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use moka::future::Cache;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::checkpoint::{Checkpoint, CheckpointFilter, CheckpointKey, ItemType, timestamp};
use crate::error::AppError;
use crate::traits::{PrimaryStore, SnapshotStore};

type LedgerKey = (Uuid, String, ItemType);

const LEDGER_CACHE_CAPACITY: u64 = 100_000;
const LEDGER_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Facade over the primary store, the snapshot store, and the ledger cache.
#[derive(Clone)]
pub struct CheckpointStore<P, N> {
    primary: P,
    snapshots: N,
    ledger_cache: Cache<LedgerKey, ()>,
    create_lock: Arc<Mutex<()>>,
}

impl<P: PrimaryStore, N: SnapshotStore> CheckpointStore<P, N> {
    pub fn new(primary: P, snapshots: N) -> Self {
        let ledger_cache = Cache::builder()
            .max_capacity(LEDGER_CACHE_CAPACITY)
            .time_to_live(LEDGER_CACHE_TTL)
            .support_invalidation_closures()
            .build();
        Self {
            primary,
            snapshots,
            ledger_cache,
            create_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn snapshots(&self) -> &N {
        &self.snapshots
    }

    /// Persists the checkpoint to both tiers.
    ///
    /// Touches `updated_at`. Returns the primary's error, if any, after the
    /// snapshot write has still been attempted.
    pub async fn save(&self, checkpoint: &mut Checkpoint) -> Result<(), AppError> {
        checkpoint.updated_at = timestamp();

        let primary = self.primary.upsert_checkpoint(checkpoint).await;
        if let Err(e) = &primary {
            warn!(task_id = %checkpoint.task_id, error = %e, "Primary checkpoint save failed");
        }

        if let Err(e) = self.snapshots.save_snapshot(checkpoint).await {
            warn!(task_id = %checkpoint.task_id, error = %e, "Checkpoint snapshot save failed");
        }

        debug!(
            task_id = %checkpoint.task_id,
            status = %checkpoint.status,
            keyword_index = checkpoint.current_keyword_index,
            page = checkpoint.current_page,
            "Checkpoint saved"
        );
        primary
    }

    /// Reads from the primary, falling back to the snapshot when the primary
    /// has no record or cannot be reached.
    pub async fn load(&self, task_id: Uuid) -> Result<Option<Checkpoint>, AppError> {
        match self.primary.get_checkpoint(task_id).await {
            Ok(Some(checkpoint)) => return Ok(Some(checkpoint)),
            Ok(None) => {}
            Err(e) => warn!(%task_id, error = %e, "Primary unavailable, trying snapshot"),
        }
        self.snapshots.load_snapshot(task_id).await
    }

    /// Most recently updated resumable checkpoint for `key`.
    ///
    /// Consults the primary first. When the primary fails or has no match,
    /// the snapshots are scanned. If the primary is reachable, a snapshot is
    /// only revived when the primary has no record of its task at all, and it
    /// is then written back.
    pub async fn find_matching_checkpoint(
        &self,
        key: &CheckpointKey,
    ) -> Result<Option<Checkpoint>, AppError> {
        let primary_reachable = match self.primary.find_matching(key).await {
            Ok(Some(checkpoint)) => return Ok(Some(checkpoint)),
            Ok(None) => true,
            Err(e) => {
                warn!(platform = %key.platform, mode = %key.mode, error = %e,
                    "Primary unavailable, scanning snapshots");
                false
            }
        };

        let mut candidates = match self.snapshots.list_snapshots().await {
            Ok(snapshots) => snapshots
                .into_iter()
                .filter(|cp| cp.status.is_resumable() && key.matches(cp))
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!(error = %e, "Snapshot scan failed");
                Vec::new()
            }
        };
        candidates.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        for checkpoint in candidates {
            if !primary_reachable {
                info!(task_id = %checkpoint.task_id, "Recovered checkpoint from snapshot");
                return Ok(Some(checkpoint));
            }
            match self.primary.get_checkpoint(checkpoint.task_id).await {
                Ok(Some(current)) => {
                    debug!(
                        task_id = %checkpoint.task_id,
                        status = %current.status,
                        "Ignoring stale snapshot"
                    );
                }
                Ok(None) => {
                    info!(task_id = %checkpoint.task_id, "Recovered checkpoint from snapshot");
                    if let Err(e) = self.primary.upsert_checkpoint(&checkpoint).await {
                        warn!(task_id = %checkpoint.task_id, error = %e, "Failed to restore snapshot to primary");
                    }
                    return Ok(Some(checkpoint));
                }
                Err(e) => {
                    warn!(task_id = %checkpoint.task_id, error = %e, "Primary lookup failed, using snapshot");
                    return Ok(Some(checkpoint));
                }
            }
        }
        Ok(None)
    }

    /// Resumes the matching checkpoint or creates a fresh Running one.
    ///
    /// Concurrent callers for the same key receive the same checkpoint.
    pub async fn get_or_create(&self, key: &CheckpointKey) -> Result<Checkpoint, AppError> {
        let _guard = self.create_lock.lock().await;

        if let Some(checkpoint) = self.find_matching_checkpoint(key).await? {
            info!(
                task_id = %checkpoint.task_id,
                status = %checkpoint.status,
                notes_fetched = checkpoint.notes_fetched,
                "Resuming checkpoint"
            );
            return Ok(checkpoint);
        }

        let fresh = Checkpoint::new(key);
        let checkpoint = match self.primary.insert_if_absent(&fresh).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(task_id = %fresh.task_id, error = %e, "Primary checkpoint save failed");
                if let Err(e) = self.snapshots.save_snapshot(&fresh).await {
                    warn!(task_id = %fresh.task_id, error = %e, "Checkpoint snapshot save failed");
                }
                return Err(e);
            }
        };

        if checkpoint.task_id == fresh.task_id {
            info!(task_id = %checkpoint.task_id, platform = %key.platform, mode = %key.mode, "Created checkpoint");
        } else {
            info!(task_id = %checkpoint.task_id, "Resuming checkpoint created concurrently");
        }
        if let Err(e) = self.snapshots.save_snapshot(&checkpoint).await {
            warn!(task_id = %checkpoint.task_id, error = %e, "Checkpoint snapshot save failed");
        }
        Ok(checkpoint)
    }

    /// Ledger membership. Primary errors propagate.
    pub async fn is_note_processed(
        &self,
        checkpoint_id: Uuid,
        item_id: &str,
        item_type: ItemType,
    ) -> Result<bool, AppError> {
        let key = (checkpoint_id, item_id.to_string(), item_type);
        if self.ledger_cache.get(&key).await.is_some() {
            return Ok(true);
        }
        let processed = self
            .primary
            .is_processed(checkpoint_id, item_id, item_type)
            .await?;
        if processed {
            self.ledger_cache.insert(key, ()).await;
        }
        Ok(processed)
    }

    /// Records an item in the ledger and bumps the matching counter.
    ///
    /// Returns true if the row is new; counters only move in that case.
    pub async fn add_processed_note(
        &self,
        checkpoint: &mut Checkpoint,
        item_id: &str,
        item_type: ItemType,
    ) -> Result<bool, AppError> {
        let inserted = self
            .primary
            .add_processed(checkpoint.task_id, item_id, item_type)
            .await?;
        if inserted {
            match item_type {
                ItemType::Note => checkpoint.notes_fetched += 1,
                ItemType::Comment => checkpoint.comments_fetched += 1,
            }
        }
        self.ledger_cache
            .insert((checkpoint.task_id, item_id.to_string(), item_type), ())
            .await;
        Ok(inserted)
    }

    pub async fn ledger_count(&self, checkpoint_id: Uuid) -> Result<u64, AppError> {
        self.primary.ledger_count(checkpoint_id).await
    }

    pub async fn pause(&self, task_id: Uuid) -> Result<Checkpoint, AppError> {
        self.transition(task_id, Checkpoint::pause).await
    }

    pub async fn resume(&self, task_id: Uuid) -> Result<Checkpoint, AppError> {
        self.transition(task_id, Checkpoint::resume).await
    }

    pub async fn mark_completed(&self, checkpoint: &mut Checkpoint) -> Result<(), AppError> {
        checkpoint.complete()?;
        info!(
            task_id = %checkpoint.task_id,
            notes_fetched = checkpoint.notes_fetched,
            comments_fetched = checkpoint.comments_fetched,
            "Checkpoint completed"
        );
        self.save(checkpoint).await
    }

    pub async fn mark_failed(
        &self,
        checkpoint: &mut Checkpoint,
        message: impl Into<String>,
    ) -> Result<(), AppError> {
        let message = message.into();
        checkpoint.fail(message.clone())?;
        warn!(task_id = %checkpoint.task_id, error = %message, "Checkpoint failed");
        self.save(checkpoint).await
    }

    pub async fn list(&self, filter: &CheckpointFilter) -> Result<Vec<Checkpoint>, AppError> {
        self.primary.list_checkpoints(filter).await
    }

    pub async fn get(&self, task_id: Uuid) -> Result<Option<Checkpoint>, AppError> {
        self.load(task_id).await
    }

    /// Removes the checkpoint, its ledger rows, and its snapshot.
    pub async fn delete(&self, task_id: Uuid) -> Result<bool, AppError> {
        let deleted = self.primary.delete_checkpoint(task_id).await?;
        let snapshot_deleted = match self.snapshots.delete_snapshot(task_id).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(%task_id, error = %e, "Failed to delete snapshot");
                false
            }
        };
        if let Err(e) = self
            .ledger_cache
            .invalidate_entries_if(move |key, _| key.0 == task_id)
        {
            warn!(%task_id, error = %e, "Failed to invalidate ledger cache");
        }
        Ok(deleted || snapshot_deleted)
    }

    /// Deletes every checkpoint not updated in the last `days` days.
    ///
    /// Covers primary records and snapshot-only leftovers. Returns the number
    /// of distinct checkpoints removed.
    pub async fn cleanup_older_than(&self, days: u32) -> Result<u64, AppError> {
        let cutoff = Utc::now() - TimeDelta::days(i64::from(days));

        let mut ids: HashSet<Uuid> = self
            .primary
            .checkpoints_updated_before(cutoff)
            .await?
            .into_iter()
            .collect();
        match self.snapshots.list_snapshots().await {
            Ok(snapshots) => ids.extend(
                snapshots
                    .into_iter()
                    .filter(|cp| cp.updated_at < cutoff)
                    .map(|cp| cp.task_id),
            ),
            Err(e) => warn!(error = %e, "Snapshot scan failed during cleanup"),
        }

        let mut removed = 0;
        for task_id in ids {
            if self.delete(task_id).await? {
                removed += 1;
            }
        }
        info!(days, removed, "Cleaned up old checkpoints");
        Ok(removed)
    }

    async fn transition(
        &self,
        task_id: Uuid,
        apply: fn(&mut Checkpoint) -> Result<(), AppError>,
    ) -> Result<Checkpoint, AppError> {
        let mut checkpoint = self
            .load(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("checkpoint {task_id}")))?;
        apply(&mut checkpoint)?;
        self.save(&mut checkpoint).await?;
        info!(%task_id, status = %checkpoint.status, "Checkpoint status changed");
        Ok(checkpoint)
    }
}
