use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use harrow_core::account::{Account, AccountStatus};
use harrow_core::checkpoint::{CheckpointFilter, CheckpointStatus};
use harrow_core::traits::AccountStore;

use crate::auth::require_api_key;
use crate::dto::{
    AccountListResponse, AccountResponse, AccountStatsResponse, CheckpointListResponse,
    CheckpointResponse, CleanupQuery, CleanupResponse, CreateAccountRequest, ErrorResponse,
    HealthResponse, ListAccountsQuery, ListCheckpointsQuery, UpdateAccountRequest,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;
const DEFAULT_CLEANUP_DAYS: u32 = 7;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/checkpoints", get(list_checkpoints))
        .route("/v1/checkpoints/cleanup", post(cleanup_checkpoints))
        .route(
            "/v1/checkpoints/{id}",
            get(get_checkpoint).delete(delete_checkpoint),
        )
        .route("/v1/checkpoints/{id}/pause", post(pause_checkpoint))
        .route("/v1/accounts", get(list_accounts).post(create_account))
        .route(
            "/v1/accounts/{id}",
            get(get_account).put(update_account).delete(delete_account),
        )
        .route("/v1/accounts/{id}/activate", post(activate_account))
        .route("/v1/accounts/{id}/disable", post(disable_account))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

fn not_found(what: &str, id: Uuid) -> Response {
    let body = ErrorResponse::new("not_found", format!("{what} not found: {id}"));
    (StatusCode::NOT_FOUND, axum::Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/checkpoints",
    params(ListCheckpointsQuery),
    responses(
        (status = 200, description = "List of checkpoints", body = CheckpointListResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "checkpoints"
)]
pub async fn list_checkpoints(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListCheckpointsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query
        .status
        .map(|s| s.parse::<CheckpointStatus>().map_err(ApiError::bad_request))
        .transpose()?;

    let filter = CheckpointFilter {
        platform: query.platform,
        status,
        limit: Some(query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT)),
    };
    let checkpoints = state.checkpoints.list(&filter).await?;
    let total = checkpoints.len();

    let response = CheckpointListResponse {
        checkpoints: checkpoints.into_iter().map(CheckpointResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response))
}

#[utoipa::path(
    get,
    path = "/v1/checkpoints/{id}",
    params(
        ("id" = Uuid, Path, description = "Checkpoint task ID")
    ),
    responses(
        (status = 200, description = "Checkpoint details", body = CheckpointResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "checkpoints"
)]
pub async fn get_checkpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let Some(checkpoint) = state.checkpoints.get(id).await? else {
        return Ok(not_found("Checkpoint", id));
    };

    let processed_items = state.checkpoints.ledger_count(id).await?;
    let mut response = CheckpointResponse::from(checkpoint);
    response.processed_items = Some(processed_items);

    Ok(axum::Json(response).into_response())
}

#[utoipa::path(
    delete,
    path = "/v1/checkpoints/{id}",
    params(
        ("id" = Uuid, Path, description = "Checkpoint task ID")
    ),
    responses(
        (status = 204, description = "Checkpoint and its processed-item ledger deleted"),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "checkpoints"
)]
pub async fn delete_checkpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    if state.checkpoints.delete(id).await? {
        tracing::info!(checkpoint_id = %id, "Checkpoint deleted");
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Ok(not_found("Checkpoint", id))
    }
}

#[utoipa::path(
    post,
    path = "/v1/checkpoints/{id}/pause",
    params(
        ("id" = Uuid, Path, description = "Checkpoint task ID")
    ),
    responses(
        (status = 200, description = "Checkpoint paused", body = CheckpointResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 409, description = "Checkpoint is not running", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "checkpoints"
)]
pub async fn pause_checkpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let checkpoint = state.checkpoints.pause(id).await?;
    tracing::info!(checkpoint_id = %id, "Checkpoint paused");
    Ok(axum::Json(CheckpointResponse::from(checkpoint)))
}

#[utoipa::path(
    post,
    path = "/v1/checkpoints/cleanup",
    params(CleanupQuery),
    responses(
        (status = 200, description = "Old checkpoints removed", body = CleanupResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "checkpoints"
)]
pub async fn cleanup_checkpoints(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CleanupQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let days = query.days.unwrap_or(DEFAULT_CLEANUP_DAYS);
    let removed = state.checkpoints.cleanup_older_than(days).await?;
    Ok(axum::Json(CleanupResponse { days, removed }))
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/accounts",
    params(ListAccountsQuery),
    responses(
        (status = 200, description = "List of accounts", body = AccountListResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "accounts"
)]
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListAccountsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query
        .status
        .map(|s| s.parse::<AccountStatus>().map_err(ApiError::bad_request))
        .transpose()?;

    let accounts = state
        .accounts
        .store()
        .list_accounts(query.platform.as_deref(), status)
        .await?;

    let stats = match query.platform.as_deref() {
        Some(platform) => {
            state.accounts.load(platform).await?;
            Some(AccountStatsResponse::from(
                state.accounts.stats(platform).await,
            ))
        }
        None => None,
    };

    let total = accounts.len();
    let response = AccountListResponse {
        accounts: accounts.into_iter().map(AccountResponse::from).collect(),
        total,
        stats,
    };

    Ok(axum::Json(response))
}

#[utoipa::path(
    post,
    path = "/v1/accounts",
    request_body = CreateAccountRequest,
    responses(
        (status = 201, description = "Account created", body = AccountResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "accounts"
)]
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<CreateAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.platform.trim().is_empty() {
        return Err(ApiError::bad_request("platform must not be empty"));
    }
    if body.credential.is_empty() {
        return Err(ApiError::bad_request("credential must not be empty"));
    }

    let account = state.accounts.add_account(body.into()).await?;
    tracing::info!(account_id = %account.id, platform = %account.platform, "Account created");

    Ok((StatusCode::CREATED, axum::Json(AccountResponse::from(account))))
}

#[utoipa::path(
    get,
    path = "/v1/accounts/{id}",
    params(
        ("id" = Uuid, Path, description = "Account ID")
    ),
    responses(
        (status = 200, description = "Account details", body = AccountResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "accounts"
)]
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    match state.accounts.store().get_account(id).await? {
        Some(account) => Ok(axum::Json(AccountResponse::from(account)).into_response()),
        None => Ok(not_found("Account", id)),
    }
}

#[utoipa::path(
    put,
    path = "/v1/accounts/{id}",
    params(
        ("id" = Uuid, Path, description = "Account ID")
    ),
    request_body = UpdateAccountRequest,
    responses(
        (status = 200, description = "Account updated", body = AccountResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "accounts"
)]
pub async fn update_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    axum::Json(body): axum::Json<UpdateAccountRequest>,
) -> Result<Response, ApiError> {
    account_result(id, state.accounts.update(id, body.into()).await?)
}

#[utoipa::path(
    delete,
    path = "/v1/accounts/{id}",
    params(
        ("id" = Uuid, Path, description = "Account ID")
    ),
    responses(
        (status = 204, description = "Account deleted"),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "accounts"
)]
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    if state.accounts.remove(id).await? {
        tracing::info!(account_id = %id, "Account deleted");
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Ok(not_found("Account", id))
    }
}

#[utoipa::path(
    post,
    path = "/v1/accounts/{id}/activate",
    params(
        ("id" = Uuid, Path, description = "Account ID")
    ),
    responses(
        (status = 200, description = "Account activated", body = AccountResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "accounts"
)]
pub async fn activate_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    account_result(id, state.accounts.activate(id).await?)
}

#[utoipa::path(
    post,
    path = "/v1/accounts/{id}/disable",
    params(
        ("id" = Uuid, Path, description = "Account ID")
    ),
    responses(
        (status = 200, description = "Account disabled", body = AccountResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "accounts"
)]
pub async fn disable_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    account_result(id, state.accounts.disable(id).await?)
}

fn account_result(id: Uuid, account: Option<Account>) -> Result<Response, ApiError> {
    match account {
        Some(account) => {
            tracing::info!(account_id = %id, status = %account.status.as_str(), "Account updated");
            Ok(axum::Json(AccountResponse::from(account)).into_response())
        }
        None => Ok(not_found("Account", id)),
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let healthy = state.db.health_check().await.is_ok();

    let (status, response) = if healthy {
        (
            StatusCode::OK,
            HealthResponse {
                status: "healthy",
                database: "ok",
            },
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            HealthResponse {
                status: "unhealthy",
                database: "error",
            },
        )
    };

    (status, axum::Json(response))
}
