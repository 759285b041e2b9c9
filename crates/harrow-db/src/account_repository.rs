use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use harrow_core::account::{Account, AccountStatus};
use harrow_core::error::AppError;
use harrow_core::traits::AccountStore;

use crate::database::db_error;

/// PostgreSQL-backed account store.
#[derive(Clone)]
pub struct AccountRepository {
    pool: Pool<Postgres>,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    platform: String,
    credential: String,
    status: String,
    last_used_at: Option<DateTime<Utc>>,
    cooling_until: Option<DateTime<Utc>>,
    banned_until: Option<DateTime<Utc>>,
    request_count: i64,
    success_count: i64,
    error_count: i64,
    notes: Option<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: row.id,
            platform: row.platform,
            credential: row.credential,
            // An unknown status never hands the account out.
            status: row.status.parse().unwrap_or(AccountStatus::Disabled),
            last_used_at: row.last_used_at,
            cooling_until: row.cooling_until,
            banned_until: row.banned_until,
            request_count: row.request_count.max(0) as u64,
            success_count: row.success_count.max(0) as u64,
            error_count: row.error_count.max(0) as u64,
            notes: row.notes,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl AccountStore for AccountRepository {
    async fn create_account(&self, account: &Account) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, platform, credential, status, last_used_at, cooling_until, banned_until,
                request_count, success_count, error_count, notes, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(account.id)
        .bind(&account.platform)
        .bind(&account.credential)
        .bind(account.status.as_str())
        .bind(account.last_used_at)
        .bind(account.cooling_until)
        .bind(account.banned_until)
        .bind(account.request_count as i64)
        .bind(account.success_count as i64)
        .bind(account.error_count as i64)
        .bind(&account.notes)
        .bind(&account.metadata)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        let row = sqlx::query_as::<_, AccountRow>(r#"SELECT * FROM accounts WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    async fn list_accounts(
        &self,
        platform: Option<&str>,
        status: Option<AccountStatus>,
    ) -> Result<Vec<Account>, AppError> {
        let rows = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT * FROM accounts
            WHERE ($1::varchar IS NULL OR platform = $1)
              AND ($2::varchar IS NULL OR status = $2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(platform)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_account(&self, account: &Account) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET credential = $2, status = $3, last_used_at = $4, cooling_until = $5,
                banned_until = $6, request_count = $7, success_count = $8, error_count = $9,
                notes = $10, metadata = $11, updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(&account.credential)
        .bind(account.status.as_str())
        .bind(account.last_used_at)
        .bind(account.cooling_until)
        .bind(account.banned_until)
        .bind(account.request_count as i64)
        .bind(account.success_count as i64)
        .bind(account.error_count as i64)
        .bind(&account.notes)
        .bind(&account.metadata)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_account(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(r#"DELETE FROM accounts WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }
}
