use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AppError;

/// Metadata key holding the search continuation id of the current keyword.
pub const META_SEARCH_CURSOR: &str = "search_cursor";
/// Metadata key holding `{item_id: cursor}` for partially drained comment streams.
pub const META_COMMENT_CURSORS: &str = "comment_cursors";
/// Metadata key holding the ids whose comments have been fully drained.
pub const META_COMMENTS_DONE: &str = "comments_done";

/// Current time at the microsecond precision PostgreSQL keeps, so a
/// checkpoint read back from either tier compares equal.
pub fn timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Status of a crawl checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Running => "running",
            CheckpointStatus::Paused => "paused",
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckpointStatus::Completed | CheckpointStatus::Failed)
    }

    /// Running or Paused: a checkpoint a restarted process may pick up.
    pub fn is_resumable(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(CheckpointStatus::Running),
            "paused" => Ok(CheckpointStatus::Paused),
            "completed" => Ok(CheckpointStatus::Completed),
            "failed" => Ok(CheckpointStatus::Failed),
            _ => Err(format!("Unknown checkpoint status: {}", s)),
        }
    }
}

/// How a crawl task derives its unit-of-work list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    Search,
    Detail,
    Creator,
    Feed,
}

impl CrawlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlMode::Search => "search",
            CrawlMode::Detail => "detail",
            CrawlMode::Creator => "creator",
            CrawlMode::Feed => "feed",
        }
    }
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CrawlMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "search" => Ok(CrawlMode::Search),
            "detail" => Ok(CrawlMode::Detail),
            "creator" => Ok(CrawlMode::Creator),
            "feed" => Ok(CrawlMode::Feed),
            _ => Err(format!("Unknown crawl mode: {}", s)),
        }
    }
}

/// Kind of entry in the deduplication ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    /// Top-level content item.
    Note,
    /// Comment or reply under a content item.
    Comment,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Note => "note",
            ItemType::Comment => "comment",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "note" => Ok(ItemType::Note),
            "comment" => Ok(ItemType::Comment),
            _ => Err(format!("Unknown item type: {}", s)),
        }
    }
}

/// The fields a restarted process uses to find its checkpoint again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    pub platform: String,
    pub mode: CrawlMode,
    /// Keyword list, id list, or creator list the task was started with.
    pub scope_key: Option<String>,
    pub project: Option<String>,
}

impl CheckpointKey {
    pub fn new(platform: impl Into<String>, mode: CrawlMode) -> Self {
        Self {
            platform: platform.into(),
            mode,
            scope_key: None,
            project: None,
        }
    }

    pub fn with_scope(mut self, scope_key: impl Into<String>) -> Self {
        self.scope_key = Some(scope_key.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Exact match on every key field, regardless of status.
    pub fn matches(&self, checkpoint: &Checkpoint) -> bool {
        checkpoint.platform == self.platform
            && checkpoint.mode == self.mode
            && checkpoint.scope_key == self.scope_key
            && checkpoint.project == self.project
    }
}

/// Filter for operator listings.
#[derive(Debug, Clone, Default)]
pub struct CheckpointFilter {
    pub platform: Option<String>,
    pub status: Option<CheckpointStatus>,
    pub limit: Option<usize>,
}

/// Forward-only progress update applied after each page.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub keyword_index: Option<usize>,
    pub page: Option<u32>,
    pub id_index: Option<usize>,
    /// `Some(None)` clears the cursor.
    pub cursor: Option<Option<String>>,
}

/// One resumable crawl task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: Uuid,
    pub platform: String,
    pub mode: CrawlMode,
    pub scope_key: Option<String>,
    pub project: Option<String>,
    pub current_keyword_index: usize,
    pub current_page: u32,
    pub cursor: Option<String>,
    pub current_id_index: usize,
    pub notes_fetched: u64,
    pub comments_fetched: u64,
    pub error_count: u64,
    pub status: CheckpointStatus,
    pub error_message: Option<String>,
    /// Mode-specific sub-state (continuation ids, comment cursors, ...).
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(key: &CheckpointKey) -> Self {
        let now = timestamp();
        Self {
            task_id: Uuid::new_v4(),
            platform: key.platform.clone(),
            mode: key.mode,
            scope_key: key.scope_key.clone(),
            project: key.project.clone(),
            current_keyword_index: 0,
            current_page: 1,
            cursor: None,
            current_id_index: 0,
            notes_fetched: 0,
            comments_fetched: 0,
            error_count: 0,
            status: CheckpointStatus::Running,
            error_message: None,
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn key(&self) -> CheckpointKey {
        CheckpointKey {
            platform: self.platform.clone(),
            mode: self.mode,
            scope_key: self.scope_key.clone(),
            project: self.project.clone(),
        }
    }

    /// Applies a progress update, refusing to move markers backwards.
    ///
    /// `(keyword_index, page)` is ordered lexicographically: moving to the
    /// next keyword may reset the page to 1.
    pub fn update_progress(&mut self, update: ProgressUpdate) -> Result<(), AppError> {
        if self.status != CheckpointStatus::Running {
            return Err(AppError::InvalidTransition(format!(
                "cannot update progress of {} checkpoint {}",
                self.status, self.task_id
            )));
        }

        let keyword_index = update.keyword_index.unwrap_or(self.current_keyword_index);
        let page = update.page.unwrap_or(self.current_page);
        if (keyword_index, page) < (self.current_keyword_index, self.current_page) {
            return Err(AppError::InvalidTransition(format!(
                "progress regression: ({}, {}) -> ({keyword_index}, {page})",
                self.current_keyword_index, self.current_page
            )));
        }

        let id_index = update.id_index.unwrap_or(self.current_id_index);
        if id_index < self.current_id_index {
            return Err(AppError::InvalidTransition(format!(
                "id index regression: {} -> {id_index}",
                self.current_id_index
            )));
        }

        self.current_keyword_index = keyword_index;
        self.current_page = page;
        self.current_id_index = id_index;
        if let Some(cursor) = update.cursor {
            self.cursor = cursor;
        }
        self.updated_at = timestamp();
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), AppError> {
        self.transition(CheckpointStatus::Running, CheckpointStatus::Paused)
    }

    pub fn resume(&mut self) -> Result<(), AppError> {
        self.transition(CheckpointStatus::Paused, CheckpointStatus::Running)
    }

    pub fn complete(&mut self) -> Result<(), AppError> {
        self.ensure_not_terminal()?;
        let now = timestamp();
        self.status = CheckpointStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), AppError> {
        self.ensure_not_terminal()?;
        let now = timestamp();
        self.status = CheckpointStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    fn transition(
        &mut self,
        from: CheckpointStatus,
        to: CheckpointStatus,
    ) -> Result<(), AppError> {
        if self.status != from {
            return Err(AppError::InvalidTransition(format!(
                "checkpoint {} is {}, expected {from}",
                self.task_id, self.status
            )));
        }
        self.status = to;
        self.updated_at = timestamp();
        Ok(())
    }

    fn ensure_not_terminal(&self) -> Result<(), AppError> {
        if self.status.is_terminal() {
            return Err(AppError::InvalidTransition(format!(
                "checkpoint {} is already {}",
                self.task_id, self.status
            )));
        }
        Ok(())
    }

    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    // -- metadata sub-state --

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn remove_meta(&mut self, key: &str) -> Option<Value> {
        self.metadata.remove(key)
    }

    pub fn comment_cursor(&self, item_id: &str) -> Option<&str> {
        self.metadata
            .get(META_COMMENT_CURSORS)
            .and_then(|cursors| cursors.get(item_id))
            .and_then(Value::as_str)
    }

    pub fn set_comment_cursor(&mut self, item_id: &str, cursor: Option<&str>) {
        let cursors = self
            .metadata
            .entry(META_COMMENT_CURSORS)
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = cursors {
            match cursor {
                Some(cursor) => {
                    map.insert(item_id.to_string(), Value::String(cursor.to_string()));
                }
                None => {
                    map.remove(item_id);
                }
            }
        }
    }

    pub fn comments_done(&self, item_id: &str) -> bool {
        self.metadata
            .get(META_COMMENTS_DONE)
            .and_then(Value::as_array)
            .is_some_and(|done| done.iter().any(|v| v.as_str() == Some(item_id)))
    }

    /// Marks an item's comment stream as drained and drops its cursor.
    pub fn finish_comments(&mut self, item_id: &str) {
        self.set_comment_cursor(item_id, None);
        if self.comments_done(item_id) {
            return;
        }
        let done = self
            .metadata
            .entry(META_COMMENTS_DONE)
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = done {
            list.push(Value::String(item_id.to_string()));
        }
    }
}

/// One deduplication ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessedItem {
    pub checkpoint_id: Uuid,
    pub item_id: String,
    pub item_type: ItemType,
}
