use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tempfile::TempDir;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

use harrow_core::CrawlerConfig;
use harrow_db::Database;
use harrow_server::routes;
use harrow_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    _snapshots: TempDir,
    _container: ContainerAsync<GenericImage>,
}

/// Spin up a PostgreSQL container and return the test app.
///
/// The container and snapshot directory live as long as the returned value.
pub async fn setup_test_app() -> TestApp {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "harrow_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/harrow_test");
    let pool = retry_connect(&url).await;

    let db = Database::from_pool(pool);
    db.migrate().await.expect("Failed to run migrations");

    let snapshots = TempDir::new().expect("Failed to create snapshot dir");
    let config = CrawlerConfig::default().with_snapshot_dir(snapshots.path());
    let state = Arc::new(AppState::new(db.clone(), TEST_API_KEY, config));

    TestApp {
        router: routes::router(state),
        db,
        _snapshots: snapshots,
        _container: container,
    }
}

async fn retry_connect(url: &str) -> PgPool {
    for _ in 0..30 {
        if let Ok(pool) = PgPoolOptions::new().max_connections(5).connect(url).await {
            return pool;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to test database");
}
