use harrow_core::{AccountRotator, CheckpointStore, CrawlerConfig, FileSnapshotStore};
use harrow_db::{AccountRepository, CheckpointRepository, Database};

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub db: Database,
    /// Bearer token required on every `/v1` route.
    pub api_key: String,
    pub checkpoints: CheckpointStore<CheckpointRepository, FileSnapshotStore>,
    pub accounts: AccountRotator<AccountRepository>,
}

impl AppState {
    pub fn new(db: Database, api_key: impl Into<String>, config: CrawlerConfig) -> Self {
        let checkpoints = CheckpointStore::new(
            db.checkpoint_repo(),
            FileSnapshotStore::new(config.snapshot_dir),
        );
        let accounts = AccountRotator::new(db.account_repo(), config.rotation);
        Self {
            db,
            api_key: api_key.into(),
            checkpoints,
            accounts,
        }
    }
}
