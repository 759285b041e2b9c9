use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use harrow_core::error::AppError;
use harrow_core::models::{Comment, ContentItem};
use harrow_core::traits::ItemSink;

use crate::database::db_error;

/// PostgreSQL sink for fetched items and comments.
///
/// Items are keyed by `(platform, item_id)` and comments by
/// `(platform, comment_id)`; re-fetching overwrites the payload. An item's
/// `updated_at` only moves when its content hash changes.
#[derive(Clone)]
pub struct ContentRepository {
    pool: Pool<Postgres>,
}

/// A stored content item with its bookkeeping timestamps.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredItem {
    pub platform: String,
    pub item_id: String,
    pub payload: serde_json::Value,
    pub content_hash: String,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_item(
        &self,
        platform: &str,
        item_id: &str,
    ) -> Result<Option<StoredItem>, AppError> {
        sqlx::query_as::<_, StoredItem>(
            r#"
            SELECT platform, item_id, payload, content_hash, first_seen_at, updated_at
            FROM content_items
            WHERE platform = $1 AND item_id = $2
            "#,
        )
        .bind(platform)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    pub async fn comment_count(&self, platform: &str, item_id: &str) -> Result<u64, AppError> {
        let count: (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM content_comments WHERE platform = $1 AND item_id = $2"#,
        )
        .bind(platform)
        .bind(item_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(count.0.max(0) as u64)
    }
}

impl ItemSink for ContentRepository {
    async fn save_item(&self, item: &ContentItem) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO content_items (platform, item_id, payload, content_hash)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (platform, item_id) DO UPDATE SET
                payload = EXCLUDED.payload,
                content_hash = EXCLUDED.content_hash,
                updated_at = CASE
                    WHEN content_items.content_hash = EXCLUDED.content_hash
                    THEN content_items.updated_at
                    ELSE NOW()
                END
            "#,
        )
        .bind(&item.platform)
        .bind(&item.item_id)
        .bind(&item.payload)
        .bind(&item.content_hash)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn save_comments(&self, comments: &[Comment]) -> Result<(), AppError> {
        if comments.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        for comment in comments {
            sqlx::query(
                r#"
                INSERT INTO content_comments (platform, comment_id, item_id, payload)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (platform, comment_id) DO UPDATE SET
                    payload = EXCLUDED.payload,
                    updated_at = NOW()
                "#,
            )
            .bind(&comment.platform)
            .bind(&comment.comment_id)
            .bind(&comment.item_id)
            .bind(&comment.payload)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)?;

        Ok(())
    }
}
