//! Continuous-refill token bucket shared by every outbound call of a client.
//!
//! The bucket holds at most `capacity` tokens and accrues `refill_per_sec`
//! tokens per second of elapsed time. [`TokenBucket::consume`] recomputes the
//! balance, and when it is short, sleeps for exactly the time needed to accrue
//! the shortfall before checking again. The whole recompute → wait → debit
//! sequence runs under one async mutex, so concurrent consumers are served
//! one at a time and refill is never credited twice.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::AppError;

/// Tolerance for floating-point drift after sleeping for an exact shortfall.
const EPSILON: f64 = 1e-9;

/// Lower bound on a single wait so rounding can never spin the loop.
const MIN_WAIT: Duration = Duration::from_micros(100);

/// Configuration for the token bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum burst size.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl RateLimitConfig {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.capacity.is_finite() && self.capacity >= 1.0) {
            return Err(AppError::ConfigError(format!(
                "rate limit capacity must be >= 1, got {}",
                self.capacity
            )));
        }
        if !(self.refill_per_sec.is_finite() && self.refill_per_sec > 0.0) {
            return Err(AppError::ConfigError(format!(
                "rate limit refill rate must be > 0, got {}",
                self.refill_per_sec
            )));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    /// Burst of 5, one request every 500ms sustained.
    fn default() -> Self {
        Self {
            capacity: 5.0,
            refill_per_sec: 2.0,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_per_sec).min(config.capacity);
        self.last_refill = now;
    }
}

/// Thread-safe token bucket; clones share the same balance.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    config: RateLimitConfig,
    state: Arc<Mutex<BucketState>>,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(config: RateLimitConfig) -> Result<Self, AppError> {
        config.validate()?;
        let state = BucketState {
            tokens: config.capacity,
            last_refill: Instant::now(),
        };
        Ok(Self {
            config,
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Takes `n` tokens, suspending until enough have accrued.
    pub async fn consume(&self, n: f64) -> Result<(), AppError> {
        if !(n.is_finite() && n >= 0.0) {
            return Err(AppError::ConfigError(format!(
                "token count must be a finite non-negative number, got {n}"
            )));
        }
        if n > self.config.capacity {
            return Err(AppError::ConfigError(format!(
                "cannot consume {n} tokens from a bucket of capacity {}",
                self.config.capacity
            )));
        }

        let mut state = self.state.lock().await;
        loop {
            state.refill(&self.config, Instant::now());
            if state.tokens + EPSILON >= n {
                state.tokens = (state.tokens - n).max(0.0);
                return Ok(());
            }

            let shortfall = n - state.tokens;
            let wait = Duration::from_secs_f64(shortfall / self.config.refill_per_sec).max(MIN_WAIT);
            tracing::debug!(
                shortfall = %format!("{shortfall:.3}"),
                wait_ms = %wait.as_millis(),
                "Rate limiter waiting for tokens"
            );
            // The guard stays held: the next consumer must see this debit.
            tokio::time::sleep(wait).await;
        }
    }

    /// Takes `n` tokens only if they are available right now.
    pub async fn try_consume(&self, n: f64) -> bool {
        if !(n.is_finite() && n >= 0.0) {
            return false;
        }
        let mut state = self.state.lock().await;
        state.refill(&self.config, Instant::now());
        if state.tokens + EPSILON >= n {
            state.tokens = (state.tokens - n).max(0.0);
            true
        } else {
            false
        }
    }

    /// Current balance after refill.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        state.refill(&self.config, Instant::now());
        state.tokens
    }
}
