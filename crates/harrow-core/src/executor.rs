//! Retry/backoff wrapper around [`Signer`] + [`Transport`].
//!
//! Every attempt consumes one rate-limiter token, picks the current account,
//! signs, sends with a per-call timeout, and classifies the response. The
//! classification drives both the local retry decision and the account
//! state machine:
//!
//! | outcome            | account transition      | local action            |
//! |--------------------|-------------------------|-------------------------|
//! | success            | success counter         | return                  |
//! | transient failure  | error counter           | back off, retry         |
//! | rate limited       | cooling, rotate         | retry on next account   |
//! | credential expired | expired, rotate         | retry on next account   |
//! | block / empty body | banned, rotate          | return immediately      |
//! | unknown item       | none                    | return immediately      |

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::account::{Account, FailureKind};
use crate::error::AppError;
use crate::rate_limit::TokenBucket;
use crate::request::{ApiRequest, ApiResponse};
use crate::rotator::AccountRotator;
use crate::traits::{AccountStore, RequestExecutor, Signer, Transport};

/// Markers used to classify a response body.
#[derive(Debug, Clone)]
pub struct BlockDetection {
    /// Substrings that identify an anti-bot block page.
    pub block_markers: Vec<String>,
    /// Substrings that identify an explicit throttling response.
    pub rate_limit_markers: Vec<String>,
    /// Substrings that identify a rejected login/session.
    pub expired_markers: Vec<String>,
}

impl Default for BlockDetection {
    fn default() -> Self {
        Self {
            block_markers: vec![
                "captcha".into(),
                "verify your identity".into(),
                "access denied".into(),
                "security check".into(),
            ],
            rate_limit_markers: vec!["too many requests".into(), "rate limit".into()],
            expired_markers: vec!["login required".into(), "session expired".into()],
        }
    }
}

impl BlockDetection {
    /// Maps a raw response onto success or a classified error.
    pub fn classify(&self, response: &ApiResponse) -> Result<(), AppError> {
        let body = response.body.to_lowercase();
        let contains = |markers: &[String]| {
            markers
                .iter()
                .find(|m| body.contains(&m.to_lowercase()))
                .cloned()
        };

        if response.status == 429 || contains(&self.rate_limit_markers).is_some() {
            return Err(AppError::RateLimited);
        }
        if response.status == 401 || contains(&self.expired_markers).is_some() {
            return Err(AppError::CredentialExpired);
        }
        if response.status == 404 {
            return Err(AppError::UnknownItem(response.url.clone()));
        }
        if response.body.trim().is_empty() {
            return Err(AppError::AntiBotBlock {
                marker: "empty body".into(),
            });
        }
        if let Some(marker) = contains(&self.block_markers) {
            return Err(AppError::AntiBotBlock { marker });
        }
        if !response.is_success() {
            return Err(AppError::HttpError(format!(
                "{} returned status {}",
                response.url, response.status
            )));
        }
        Ok(())
    }
}

/// Configuration for the resilient executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Total attempts per call, the first one included.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Timeout applied to each individual network call.
    pub request_timeout: Duration,
    pub detection: BlockDetection,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            detection: BlockDetection::default(),
        }
    }
}

impl ExecutorConfig {
    /// Delay before retry number `attempt` (1-indexed): `base * 2^(attempt-1)`,
    /// capped at `max_backoff`, plus up to 10% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff);
        let jitter_ms = (delay.as_millis() as u64 / 10).max(1);
        delay + Duration::from_millis(rand::rng().random_range(0..jitter_ms))
    }
}

/// Executes platform requests with rate limiting, account rotation, and
/// bounded retries.
#[derive(Clone)]
pub struct ResilientExecutor<S, T, A> {
    platform: String,
    signer: S,
    transport: T,
    bucket: TokenBucket,
    rotator: AccountRotator<A>,
    config: ExecutorConfig,
    current: Arc<Mutex<Option<Account>>>,
    last_referer: Arc<Mutex<Option<String>>>,
}

impl<S, T, A> ResilientExecutor<S, T, A>
where
    S: Signer,
    T: Transport,
    A: AccountStore,
{
    pub fn new(
        platform: impl Into<String>,
        signer: S,
        transport: T,
        bucket: TokenBucket,
        rotator: AccountRotator<A>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            platform: platform.into(),
            signer,
            transport,
            bucket,
            rotator,
            config,
            current: Arc::new(Mutex::new(None)),
            last_referer: Arc::new(Mutex::new(None)),
        }
    }

    pub fn rotator(&self) -> &AccountRotator<A> {
        &self.rotator
    }

    /// URL that will be sent as Referer when the caller does not set one.
    pub async fn last_referer(&self) -> Option<String> {
        self.last_referer.lock().await.clone()
    }

    /// The account in use, keeping it while it stays available.
    async fn acquire_account(&self) -> Result<Account, AppError> {
        let mut current = self.current.lock().await;
        if let Some(account) = current.as_ref() {
            if self.rotator.is_available(account.id).await {
                return Ok(account.clone());
            }
        }
        match self.rotator.get_account(&self.platform).await {
            Some(account) => {
                debug!(account_id = %account.id, platform = %self.platform, "Using account");
                *current = Some(account.clone());
                Ok(account)
            }
            None => {
                *current = None;
                Err(AppError::NoAccountAvailable(self.platform.clone()))
            }
        }
    }

    /// Reports the failure to the rotator and swaps the current account.
    async fn escalate(&self, account: &Account, kind: FailureKind) {
        self.rotator.record_error(account.id, kind).await;
        let next = self.rotator.rotate_on_error(&self.platform, account.id).await;
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|a| a.id == account.id) {
            *current = next;
        }
    }

    async fn attempt(&self, account: &Account, request: &ApiRequest) -> Result<ApiResponse, AppError> {
        self.bucket.consume(1.0).await?;
        self.rotator.record_request(account.id).await;

        let mut prepared = request.clone();
        let referer = match &request.referer {
            Some(referer) => Some(referer.clone()),
            None => self.last_referer.lock().await.clone(),
        };
        if let Some(referer) = referer {
            if prepared.header("Referer").is_none() {
                prepared.headers.push(("Referer".to_string(), referer));
            }
        }

        let signed = self
            .signer
            .sign(&request.url, &request.params, request.method, &account.credential)
            .await
            .map_err(|e| match e {
                AppError::Signing(_) => e,
                other => AppError::Signing(other.to_string()),
            })?;
        prepared.params = signed.params;
        prepared.headers.extend(signed.headers);

        let response = tokio::time::timeout(self.config.request_timeout, self.transport.execute(&prepared))
            .await
            .map_err(|_| AppError::Timeout(self.config.request_timeout.as_secs()))??;

        self.config.detection.classify(&response)?;
        Ok(response)
    }
}

impl<S, T, A> RequestExecutor for ResilientExecutor<S, T, A>
where
    S: Signer,
    T: Transport,
    A: AccountStore,
{
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, AppError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let account = self.acquire_account().await?;

            let error = match self.attempt(&account, &request).await {
                Ok(response) => {
                    self.rotator.record_success(account.id).await;
                    if request.navigation {
                        *self.last_referer.lock().await = Some(request.url.clone());
                    }
                    return Ok(response);
                }
                Err(e) => e,
            };

            if error.is_retryable() {
                self.rotator
                    .record_error(account.id, FailureKind::Transient)
                    .await;
                if attempt < max_attempts {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        url = %request.url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(error);
                continue;
            }

            match error.failure_kind() {
                Some(FailureKind::Banned) => {
                    warn!(
                        account_id = %account.id,
                        url = %request.url,
                        error = %error,
                        "Block detected, not retrying"
                    );
                    self.escalate(&account, FailureKind::Banned).await;
                    return Err(error);
                }
                Some(kind @ (FailureKind::RateLimited | FailureKind::CredentialExpired)) => {
                    info!(
                        account_id = %account.id,
                        url = %request.url,
                        attempt,
                        error = %error,
                        "Account-level failure, rotating"
                    );
                    self.escalate(&account, kind).await;
                }
                Some(FailureKind::Transient) | None => return Err(error),
            }
            last_error = Some(error);
        }

        let error = last_error
            .unwrap_or_else(|| AppError::Generic(format!("no attempt made for {}", request.url)));
        warn!(url = %request.url, attempts = max_attempts, error = %error, "Giving up");
        Err(error)
    }
}
