use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::account::{Account, AccountStatus};
use crate::checkpoint::{Checkpoint, CheckpointFilter, CheckpointKey, ItemType};
use crate::error::AppError;
use crate::models::{Comment, CommentPage, ContentItem, ListingPage};
use crate::request::{ApiRequest, ApiResponse, HttpMethod, SignedRequest};

/// Produces platform-specific request signatures.
///
/// A signing failure is a retryable transport failure, never a ban signal.
pub trait Signer: Send + Sync + Clone {
    fn sign(
        &self,
        uri: &str,
        params: &[(String, String)],
        method: HttpMethod,
        cookies: &str,
    ) -> impl Future<Output = Result<SignedRequest, AppError>> + Send;
}

/// Executes a prepared request.
///
/// Implementations return [`AppError::Unreachable`] when the host cannot be
/// reached at all, and a response (of any status) otherwise.
pub trait Transport: Send + Sync + Clone {
    fn execute(
        &self,
        request: &ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, AppError>> + Send;
}

/// Anything that can run an [`ApiRequest`] to completion, retries included.
pub trait RequestExecutor: Send + Sync {
    fn execute(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, AppError>> + Send;
}

/// Builds platform requests and decodes platform responses.
///
/// Pure: no I/O happens here, the pipeline routes every request through a
/// [`RequestExecutor`].
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> &str;

    fn search_request(
        &self,
        keyword: &str,
        page: u32,
        cursor: Option<&str>,
    ) -> Result<ApiRequest, AppError>;

    fn creator_request(&self, creator_id: &str, cursor: Option<&str>)
    -> Result<ApiRequest, AppError>;

    fn feed_request(&self, cursor: Option<&str>) -> Result<ApiRequest, AppError>;

    fn detail_request(&self, item_id: &str) -> Result<ApiRequest, AppError>;

    fn comments_request(&self, item_id: &str, cursor: Option<&str>)
    -> Result<ApiRequest, AppError>;

    fn parse_listing(&self, response: &ApiResponse) -> Result<ListingPage, AppError>;

    fn parse_item(&self, item_id: &str, response: &ApiResponse) -> Result<ContentItem, AppError>;

    fn parse_comments(
        &self,
        item_id: &str,
        response: &ApiResponse,
    ) -> Result<CommentPage, AppError>;
}

/// Persists fetched content.
pub trait ItemSink: Send + Sync + Clone {
    fn save_item(&self, item: &ContentItem) -> impl Future<Output = Result<(), AppError>> + Send;

    fn save_comments(
        &self,
        comments: &[Comment],
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A no-op ItemSink for use when persistence is not needed.
#[derive(Debug, Clone)]
pub struct NullSink;

impl ItemSink for NullSink {
    async fn save_item(&self, _item: &ContentItem) -> Result<(), AppError> {
        Ok(())
    }

    async fn save_comments(&self, _comments: &[Comment]) -> Result<(), AppError> {
        Ok(())
    }
}

/// CRUD over accounts.
pub trait AccountStore: Send + Sync + Clone {
    fn create_account(
        &self,
        account: &Account,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn get_account(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Account>, AppError>> + Send;

    fn list_accounts(
        &self,
        platform: Option<&str>,
        status: Option<AccountStatus>,
    ) -> impl Future<Output = Result<Vec<Account>, AppError>> + Send;

    /// Returns false if the account does not exist.
    fn update_account(
        &self,
        account: &Account,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Returns false if the account does not exist.
    fn delete_account(&self, id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Authoritative, transactional checkpoint store. Owns the dedup ledger.
pub trait PrimaryStore: Send + Sync + Clone {
    /// Insert or replace the checkpoint keyed by `task_id`.
    fn upsert_checkpoint(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn get_checkpoint(
        &self,
        task_id: Uuid,
    ) -> impl Future<Output = Result<Option<Checkpoint>, AppError>> + Send;

    /// Inserts `checkpoint` unless a Running/Paused checkpoint with the same
    /// key already exists, in which case the existing one is returned. Atomic
    /// with respect to other writers.
    fn insert_if_absent(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl Future<Output = Result<Checkpoint, AppError>> + Send;

    /// Most recently updated Running/Paused checkpoint matching `key` exactly.
    fn find_matching(
        &self,
        key: &CheckpointKey,
    ) -> impl Future<Output = Result<Option<Checkpoint>, AppError>> + Send;

    fn list_checkpoints(
        &self,
        filter: &CheckpointFilter,
    ) -> impl Future<Output = Result<Vec<Checkpoint>, AppError>> + Send;

    /// Deletes ledger rows first, then the checkpoint. Returns false if absent.
    fn delete_checkpoint(
        &self,
        task_id: Uuid,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Ids of checkpoints whose `updated_at` is strictly before `cutoff`.
    fn checkpoints_updated_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Uuid>, AppError>> + Send;

    fn is_processed(
        &self,
        checkpoint_id: Uuid,
        item_id: &str,
        item_type: ItemType,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Returns true if a new ledger row was inserted.
    fn add_processed(
        &self,
        checkpoint_id: Uuid,
        item_id: &str,
        item_type: ItemType,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn ledger_count(
        &self,
        checkpoint_id: Uuid,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Best-effort local copy of checkpoints.
pub trait SnapshotStore: Send + Sync + Clone {
    fn save_snapshot(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn load_snapshot(
        &self,
        task_id: Uuid,
    ) -> impl Future<Output = Result<Option<Checkpoint>, AppError>> + Send;

    fn delete_snapshot(&self, task_id: Uuid)
    -> impl Future<Output = Result<bool, AppError>> + Send;

    fn list_snapshots(&self) -> impl Future<Output = Result<Vec<Checkpoint>, AppError>> + Send;
}
