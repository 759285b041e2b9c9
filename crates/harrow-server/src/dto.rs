use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use harrow_core::account::{Account, AccountUpdate, NewAccount};
use harrow_core::checkpoint::Checkpoint;
use harrow_core::rotator::AccountStats;

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CheckpointResponse {
    pub task_id: Uuid,
    pub platform: String,
    pub crawl_mode: String,
    pub scope_key: Option<String>,
    pub project: Option<String>,
    pub current_keyword_index: usize,
    pub current_page: u32,
    pub cursor: Option<String>,
    pub current_id_index: usize,
    pub notes_fetched: u64,
    pub comments_fetched: u64,
    pub error_count: u64,
    pub status: String,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Ledger size; only filled in on single-checkpoint reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_items: Option<u64>,
}

impl From<Checkpoint> for CheckpointResponse {
    fn from(cp: Checkpoint) -> Self {
        Self {
            task_id: cp.task_id,
            platform: cp.platform,
            crawl_mode: cp.mode.as_str().to_string(),
            scope_key: cp.scope_key,
            project: cp.project,
            current_keyword_index: cp.current_keyword_index,
            current_page: cp.current_page,
            cursor: cp.cursor,
            current_id_index: cp.current_id_index,
            notes_fetched: cp.notes_fetched,
            comments_fetched: cp.comments_fetched,
            error_count: cp.error_count,
            status: cp.status.as_str().to_string(),
            error_message: cp.error_message,
            metadata: serde_json::Value::Object(cp.metadata),
            created_at: cp.created_at,
            updated_at: cp.updated_at,
            completed_at: cp.completed_at,
            processed_items: None,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListCheckpointsQuery {
    pub platform: Option<String>,
    /// running, paused, completed or failed
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CheckpointListResponse {
    pub checkpoints: Vec<CheckpointResponse>,
    pub total: usize,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct CleanupQuery {
    /// Remove checkpoints not updated for this many days (default: 7)
    pub days: Option<u32>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CleanupResponse {
    pub days: u32,
    pub removed: u64,
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// An account as shown to operators. The credential is never echoed back.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AccountResponse {
    pub id: Uuid,
    pub platform: String,
    pub status: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub cooling_until: Option<DateTime<Utc>>,
    pub banned_until: Option<DateTime<Utc>>,
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub notes: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            platform: account.platform,
            status: account.status.as_str().to_string(),
            last_used_at: account.last_used_at,
            cooling_until: account.cooling_until,
            banned_until: account.banned_until,
            request_count: account.request_count,
            success_count: account.success_count,
            error_count: account.error_count,
            notes: account.notes,
            metadata: account.metadata,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListAccountsQuery {
    pub platform: Option<String>,
    /// active, cooling, banned, disabled or expired
    pub status: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AccountStatsResponse {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
}

impl From<AccountStats> for AccountStatsResponse {
    fn from(stats: AccountStats) -> Self {
        Self {
            total: stats.total,
            by_status: stats
                .by_status
                .into_iter()
                .map(|(status, count)| (status.as_str().to_string(), count))
                .collect(),
            requests: stats.requests,
            successes: stats.successes,
            errors: stats.errors,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AccountListResponse {
    pub accounts: Vec<AccountResponse>,
    pub total: usize,
    /// Per-platform statistics, present when filtering by platform.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<AccountStatsResponse>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateAccountRequest {
    pub platform: String,
    /// Cookie string forwarded to the signer
    pub credential: String,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl From<CreateAccountRequest> for NewAccount {
    fn from(body: CreateAccountRequest) -> Self {
        let mut request = NewAccount::new(body.platform, body.credential);
        request.notes = body.notes;
        request.metadata = body.metadata;
        request
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UpdateAccountRequest {
    pub credential: Option<String>,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl From<UpdateAccountRequest> for AccountUpdate {
    fn from(body: UpdateAccountRequest) -> Self {
        Self {
            credential: body.credential,
            notes: body.notes,
            metadata: body.metadata,
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
        }
    }
}
