pub mod account_repository;
pub mod checkpoint_repository;
pub mod config;
pub mod content_repository;
pub mod database;

pub use account_repository::AccountRepository;
pub use checkpoint_repository::CheckpointRepository;
pub use config::DatabaseConfig;
pub use content_repository::{ContentRepository, StoredItem};
pub use database::Database;
