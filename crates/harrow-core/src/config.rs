use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;

use crate::error::AppError;
use crate::executor::ExecutorConfig;
use crate::pipeline::PipelineConfig;
use crate::rate_limit::RateLimitConfig;
use crate::rotator::{RotationConfig, SelectionStrategy};

const DEFAULT_SNAPSHOT_DIR: &str = "data/checkpoints";

/// Every knob of a crawler, grouped.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub rate_limit: RateLimitConfig,
    pub rotation: RotationConfig,
    pub executor: ExecutorConfig,
    pub pipeline: PipelineConfig,
    pub snapshot_dir: PathBuf,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            rotation: RotationConfig::default(),
            executor: ExecutorConfig::default(),
            pipeline: PipelineConfig::default(),
            snapshot_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
        }
    }
}

impl CrawlerConfig {
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_rotation(mut self, rotation: RotationConfig) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }

    /// Read configuration from environment variables.
    ///
    /// Every variable is optional and falls back to the default:
    ///
    /// - `HARROW_RATE_CAPACITY`, `HARROW_RATE_PER_SEC`
    /// - `HARROW_ROTATION_STRATEGY` (`round_robin`, `least_used`, `random`)
    /// - `HARROW_RATE_LIMIT_COOLDOWN_SECS`, `HARROW_BAN_HOURS`, `HARROW_ERROR_COOLDOWN_SECS`
    /// - `HARROW_MAX_ATTEMPTS`, `HARROW_BASE_BACKOFF_MS`, `HARROW_MAX_BACKOFF_SECS`,
    ///   `HARROW_REQUEST_TIMEOUT_SECS`
    /// - `HARROW_ITEM_CONCURRENCY`, `HARROW_COMMENT_CONCURRENCY`,
    ///   `HARROW_MAX_ITEMS_PER_SCOPE`, `HARROW_MAX_COMMENTS_PER_ITEM`,
    ///   `HARROW_MAX_FEED_PAGES`, `HARROW_MAX_PAGES_PER_SCOPE`, `HARROW_FETCH_COMMENTS`
    /// - `HARROW_SNAPSHOT_DIR` (defaults to `data/checkpoints`)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let defaults = Self::default();

        let rate_limit = RateLimitConfig::new(
            env.parse("HARROW_RATE_CAPACITY", defaults.rate_limit.capacity)?,
            env.parse("HARROW_RATE_PER_SEC", defaults.rate_limit.refill_per_sec)?,
        );
        rate_limit.validate()?;

        let rotation = RotationConfig {
            strategy: env.parse::<SelectionStrategy>(
                "HARROW_ROTATION_STRATEGY",
                defaults.rotation.strategy,
            )?,
            rate_limit_cooldown: TimeDelta::seconds(env.parse(
                "HARROW_RATE_LIMIT_COOLDOWN_SECS",
                defaults.rotation.rate_limit_cooldown.num_seconds(),
            )?),
            ban_duration: TimeDelta::hours(
                env.parse("HARROW_BAN_HOURS", defaults.rotation.ban_duration.num_hours())?,
            ),
            error_cooldown: TimeDelta::seconds(env.parse(
                "HARROW_ERROR_COOLDOWN_SECS",
                defaults.rotation.error_cooldown.num_seconds(),
            )?),
        };

        let executor = ExecutorConfig {
            max_attempts: env.positive("HARROW_MAX_ATTEMPTS", defaults.executor.max_attempts)?,
            base_backoff: Duration::from_millis(env.parse(
                "HARROW_BASE_BACKOFF_MS",
                defaults.executor.base_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_secs(env.parse(
                "HARROW_MAX_BACKOFF_SECS",
                defaults.executor.max_backoff.as_secs(),
            )?),
            request_timeout: Duration::from_secs(env.positive(
                "HARROW_REQUEST_TIMEOUT_SECS",
                defaults.executor.request_timeout.as_secs(),
            )?),
            detection: defaults.executor.detection,
        };

        let pipeline = PipelineConfig {
            max_item_concurrency: env.positive(
                "HARROW_ITEM_CONCURRENCY",
                defaults.pipeline.max_item_concurrency,
            )?,
            max_comment_concurrency: env.positive(
                "HARROW_COMMENT_CONCURRENCY",
                defaults.pipeline.max_comment_concurrency,
            )?,
            max_items_per_scope: env.parse(
                "HARROW_MAX_ITEMS_PER_SCOPE",
                defaults.pipeline.max_items_per_scope,
            )?,
            max_comments_per_item: env.parse(
                "HARROW_MAX_COMMENTS_PER_ITEM",
                defaults.pipeline.max_comments_per_item,
            )?,
            max_feed_pages: env.parse("HARROW_MAX_FEED_PAGES", defaults.pipeline.max_feed_pages)?,
            max_pages_per_scope: env.parse(
                "HARROW_MAX_PAGES_PER_SCOPE",
                defaults.pipeline.max_pages_per_scope,
            )?,
            fetch_comments: env.parse("HARROW_FETCH_COMMENTS", defaults.pipeline.fetch_comments)?,
        };

        let snapshot_dir = env
            .get("HARROW_SNAPSHOT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.snapshot_dir);

        Ok(Self {
            rate_limit,
            rotation,
            executor,
            pipeline,
            snapshot_dir,
        })
    }
}

struct Lookup<F>(F);

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, name: &str, default: T) -> Result<T, AppError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name} '{raw}': {e}"))),
        }
    }

    fn positive<T>(&self, name: &str, default: T) -> Result<T, AppError>
    where
        T: FromStr + PartialOrd + Default,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(name, default)?;
        if value <= T::default() {
            return Err(AppError::ConfigError(format!("{name} must be at least 1")));
        }
        Ok(value)
    }
}
