use harrow_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::account_repository::AccountRepository;
use crate::checkpoint_repository::CheckpointRepository;
use crate::config::DatabaseConfig;
use crate::content_repository::ContentRepository;

/// Database facade: owns the connection pool, runs migrations,
/// and vends repository instances.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    pub fn account_repo(&self) -> AccountRepository {
        AccountRepository::new(self.pool.clone())
    }

    pub fn checkpoint_repo(&self) -> CheckpointRepository {
        CheckpointRepository::new(self.pool.clone())
    }

    pub fn content_repo(&self) -> ContentRepository {
        ContentRepository::new(self.pool.clone())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Maps a sqlx error onto the application taxonomy.
///
/// Failures to reach the server at all become [`AppError::Unreachable`] so
/// callers can fall back to local snapshots; everything else is a
/// [`AppError::DatabaseError`].
pub(crate) fn db_error(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => AppError::Unreachable(format!("database: {e}")),
        other => AppError::DatabaseError(other.to_string()),
    }
}
