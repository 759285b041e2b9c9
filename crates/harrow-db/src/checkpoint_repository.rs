use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use harrow_core::checkpoint::{
    Checkpoint, CheckpointFilter, CheckpointKey, CheckpointStatus, CrawlMode, ItemType,
};
use harrow_core::error::AppError;
use harrow_core::traits::PrimaryStore;

use crate::database::db_error;

const INSERT_ATTEMPTS: usize = 3;

/// PostgreSQL-backed checkpoint store, including the processed-item ledger.
#[derive(Clone)]
pub struct CheckpointRepository {
    pool: Pool<Postgres>,
}

impl CheckpointRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    task_id: Uuid,
    platform: String,
    crawl_mode: String,
    scope_key: Option<String>,
    project: Option<String>,
    current_keyword_index: i32,
    current_page: i32,
    cursor: Option<String>,
    current_id_index: i32,
    notes_fetched: i64,
    comments_fetched: i64,
    error_count: i64,
    status: String,
    error_message: Option<String>,
    metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = AppError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        let mode: CrawlMode = row.crawl_mode.parse().map_err(AppError::DatabaseError)?;
        let status: CheckpointStatus = row.status.parse().map_err(AppError::DatabaseError)?;
        let metadata = match row.metadata {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Ok(Checkpoint {
            task_id: row.task_id,
            platform: row.platform,
            mode,
            scope_key: row.scope_key,
            project: row.project,
            current_keyword_index: row.current_keyword_index.max(0) as usize,
            current_page: row.current_page.max(0) as u32,
            cursor: row.cursor,
            current_id_index: row.current_id_index.max(0) as usize,
            notes_fetched: row.notes_fetched.max(0) as u64,
            comments_fetched: row.comments_fetched.max(0) as u64,
            error_count: row.error_count.max(0) as u64,
            status,
            error_message: row.error_message,
            metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

fn into_checkpoints(rows: Vec<CheckpointRow>) -> Result<Vec<Checkpoint>, AppError> {
    rows.into_iter().map(Checkpoint::try_from).collect()
}

impl PrimaryStore for CheckpointRepository {
    async fn upsert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (
                task_id, platform, crawl_mode, scope_key, project,
                current_keyword_index, current_page, cursor, current_id_index,
                notes_fetched, comments_fetched, error_count,
                status, error_message, metadata, created_at, updated_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (task_id) DO UPDATE SET
                current_keyword_index = EXCLUDED.current_keyword_index,
                current_page = EXCLUDED.current_page,
                cursor = EXCLUDED.cursor,
                current_id_index = EXCLUDED.current_id_index,
                notes_fetched = EXCLUDED.notes_fetched,
                comments_fetched = EXCLUDED.comments_fetched,
                error_count = EXCLUDED.error_count,
                status = EXCLUDED.status,
                error_message = EXCLUDED.error_message,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(checkpoint.task_id)
        .bind(&checkpoint.platform)
        .bind(checkpoint.mode.as_str())
        .bind(&checkpoint.scope_key)
        .bind(&checkpoint.project)
        .bind(checkpoint.current_keyword_index as i32)
        .bind(checkpoint.current_page as i32)
        .bind(&checkpoint.cursor)
        .bind(checkpoint.current_id_index as i32)
        .bind(checkpoint.notes_fetched as i64)
        .bind(checkpoint.comments_fetched as i64)
        .bind(checkpoint.error_count as i64)
        .bind(checkpoint.status.as_str())
        .bind(&checkpoint.error_message)
        .bind(Value::Object(checkpoint.metadata.clone()))
        .bind(checkpoint.created_at)
        .bind(checkpoint.updated_at)
        .bind(checkpoint.completed_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn get_checkpoint(&self, task_id: Uuid) -> Result<Option<Checkpoint>, AppError> {
        let row =
            sqlx::query_as::<_, CheckpointRow>(r#"SELECT * FROM checkpoints WHERE task_id = $1"#)
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

        row.map(Checkpoint::try_from).transpose()
    }

    async fn insert_if_absent(&self, checkpoint: &Checkpoint) -> Result<Checkpoint, AppError> {
        let key = checkpoint.key();
        // A conflicting row can turn terminal between the insert and the
        // re-select; retry in that case.
        for _ in 0..INSERT_ATTEMPTS {
            let result = sqlx::query(
                r#"
                INSERT INTO checkpoints (
                    task_id, platform, crawl_mode, scope_key, project,
                    current_keyword_index, current_page, cursor, current_id_index,
                    notes_fetched, comments_fetched, error_count,
                    status, error_message, metadata, created_at, updated_at, completed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(checkpoint.task_id)
            .bind(&checkpoint.platform)
            .bind(checkpoint.mode.as_str())
            .bind(&checkpoint.scope_key)
            .bind(&checkpoint.project)
            .bind(checkpoint.current_keyword_index as i32)
            .bind(checkpoint.current_page as i32)
            .bind(&checkpoint.cursor)
            .bind(checkpoint.current_id_index as i32)
            .bind(checkpoint.notes_fetched as i64)
            .bind(checkpoint.comments_fetched as i64)
            .bind(checkpoint.error_count as i64)
            .bind(checkpoint.status.as_str())
            .bind(&checkpoint.error_message)
            .bind(Value::Object(checkpoint.metadata.clone()))
            .bind(checkpoint.created_at)
            .bind(checkpoint.updated_at)
            .bind(checkpoint.completed_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            if result.rows_affected() > 0 {
                return Ok(checkpoint.clone());
            }
            if let Some(existing) = self.find_matching(&key).await? {
                return Ok(existing);
            }
        }

        Err(AppError::DatabaseError(format!(
            "checkpoint {} kept conflicting on insert",
            checkpoint.task_id
        )))
    }

    async fn find_matching(&self, key: &CheckpointKey) -> Result<Option<Checkpoint>, AppError> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            r#"
            SELECT * FROM checkpoints
            WHERE platform = $1
              AND crawl_mode = $2
              AND scope_key IS NOT DISTINCT FROM $3
              AND project IS NOT DISTINCT FROM $4
              AND status IN ('running', 'paused')
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(&key.platform)
        .bind(key.mode.as_str())
        .bind(&key.scope_key)
        .bind(&key.project)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(Checkpoint::try_from).transpose()
    }

    async fn list_checkpoints(&self, filter: &CheckpointFilter) -> Result<Vec<Checkpoint>, AppError> {
        let rows = sqlx::query_as::<_, CheckpointRow>(
            r#"
            SELECT * FROM checkpoints
            WHERE ($1::varchar IS NULL OR platform = $1)
              AND ($2::varchar IS NULL OR status = $2)
            ORDER BY updated_at DESC
            LIMIT $3
            "#,
        )
        .bind(&filter.platform)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        into_checkpoints(rows)
    }

    async fn delete_checkpoint(&self, task_id: Uuid) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(r#"DELETE FROM processed_items WHERE checkpoint_id = $1"#)
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let result = sqlx::query(r#"DELETE FROM checkpoints WHERE task_id = $1"#)
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn checkpoints_updated_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let ids: Vec<(Uuid,)> =
            sqlx::query_as(r#"SELECT task_id FROM checkpoints WHERE updated_at < $1"#)
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn is_processed(
        &self,
        checkpoint_id: Uuid,
        item_id: &str,
        item_type: ItemType,
    ) -> Result<bool, AppError> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM processed_items
                WHERE checkpoint_id = $1 AND item_id = $2 AND item_type = $3
            )
            "#,
        )
        .bind(checkpoint_id)
        .bind(item_id)
        .bind(item_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(exists.0)
    }

    async fn add_processed(
        &self,
        checkpoint_id: Uuid,
        item_id: &str,
        item_type: ItemType,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_items (checkpoint_id, item_id, item_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (checkpoint_id, item_id, item_type) DO NOTHING
            "#,
        )
        .bind(checkpoint_id)
        .bind(item_id)
        .bind(item_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn ledger_count(&self, checkpoint_id: Uuid) -> Result<u64, AppError> {
        let count: (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM processed_items WHERE checkpoint_id = $1"#)
                .bind(checkpoint_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;

        Ok(count.0.max(0) as u64)
    }
}
