pub mod account;
pub mod checkpoint;
pub mod checkpoint_store;
pub mod config;
pub mod error;
pub mod executor;
pub mod models;
pub mod pipeline;
pub mod rate_limit;
pub mod request;
pub mod rotator;
pub mod snapshot;
pub mod traits;

#[cfg(test)]
pub(crate) mod memory;

pub use account::{Account, AccountStatus, AccountUpdate, FailureKind, NewAccount};
pub use checkpoint::{
    Checkpoint, CheckpointFilter, CheckpointKey, CheckpointStatus, CrawlMode, ItemType,
    ProcessedItem,
};
pub use checkpoint_store::CheckpointStore;
pub use config::CrawlerConfig;
pub use error::AppError;
pub use executor::{BlockDetection, ExecutorConfig, ResilientExecutor};
pub use models::{Comment, CommentPage, ContentItem, ListingPage, compute_hash};
pub use pipeline::{
    CrawlReport, CrawlRequest, CrawlTarget, FetchPipeline, PipelineConfig, PipelineEvent,
    PipelineReporter, TracingPipelineReporter,
};
pub use rate_limit::{RateLimitConfig, TokenBucket};
pub use request::{ApiRequest, ApiResponse, HttpMethod, SignedRequest};
pub use rotator::{AccountRotator, AccountStats, RotationConfig, SelectionStrategy};
pub use snapshot::FileSnapshotStore;
pub use traits::{
    AccountStore, ItemSink, NullSink, PlatformAdapter, PrimaryStore, RequestExecutor, Signer,
    SnapshotStore, Transport,
};
