//! Local JSON snapshots of checkpoints.
//!
//! One file per task at `{dir}/{task_id}.json`. Writes go through a temp file
//! in the same directory followed by a rename, so a crash mid-write leaves the
//! previous snapshot intact.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::checkpoint::Checkpoint;
use crate::error::AppError;
use crate::traits::SnapshotStore;

/// Filesystem-backed [`SnapshotStore`].
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: Arc<PathBuf>,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Arc::new(dir.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, task_id: Uuid) -> PathBuf {
        self.dir.join(format!("{task_id}.json"))
    }
}

fn io_err(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::SnapshotError(format!("{context}: {e}"))
}

fn write_atomic(dir: &Path, path: &Path, json: &[u8]) -> Result<(), AppError> {
    std::fs::create_dir_all(dir).map_err(|e| io_err("Failed to create snapshot dir", e))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| io_err("Failed to create temp file", e))?;
    temp_file
        .write_all(json)
        .map_err(|e| io_err("Failed to write temp file", e))?;
    temp_file
        .flush()
        .map_err(|e| io_err("Failed to flush temp file", e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| io_err("Failed to sync temp file", e))?;
    temp_file
        .persist(path)
        .map_err(|e| io_err("Failed to persist snapshot", e))?;
    Ok(())
}

fn read_snapshot(path: &Path) -> Result<Option<Checkpoint>, AppError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err("Failed to read snapshot", e)),
    };
    let checkpoint = serde_json::from_slice(&bytes)
        .map_err(|e| io_err(&format!("Corrupt snapshot {}", path.display()), e))?;
    Ok(Some(checkpoint))
}

fn list_dir(dir: &Path) -> Result<Vec<Checkpoint>, AppError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err("Failed to list snapshots", e)),
    };

    let mut checkpoints = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        match read_snapshot(&path) {
            Ok(Some(checkpoint)) => checkpoints.push(checkpoint),
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot"),
        }
    }
    Ok(checkpoints)
}

async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::SnapshotError(format!("Snapshot task failed: {e}")))?
}

impl SnapshotStore for FileSnapshotStore {
    async fn save_snapshot(&self, checkpoint: &Checkpoint) -> Result<(), AppError> {
        let json = serde_json::to_vec_pretty(checkpoint)?;
        let dir = self.dir.to_path_buf();
        let path = self.path_for(checkpoint.task_id);
        debug!(task_id = %checkpoint.task_id, path = %path.display(), "Saving checkpoint snapshot");
        blocking(move || write_atomic(&dir, &path, &json)).await
    }

    async fn load_snapshot(&self, task_id: Uuid) -> Result<Option<Checkpoint>, AppError> {
        let path = self.path_for(task_id);
        blocking(move || read_snapshot(&path)).await
    }

    async fn delete_snapshot(&self, task_id: Uuid) -> Result<bool, AppError> {
        let path = self.path_for(task_id);
        blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err("Failed to delete snapshot", e)),
        })
        .await
    }

    async fn list_snapshots(&self) -> Result<Vec<Checkpoint>, AppError> {
        let dir = self.dir.to_path_buf();
        blocking(move || list_dir(&dir)).await
    }
}
