//! Account selection and the cooldown/ban state machine.
//!
//! # Account states
//!
//! ```text
//! ACTIVE --[rate limit]--> COOLING(now+Δ) --[Δ elapsed, checked lazily]--> ACTIVE
//! ACTIVE --[block/ban]---> BANNED(now+H)  --[H elapsed, checked lazily]--> ACTIVE
//! ACTIVE --[auth error]--> EXPIRED  (operator re-authenticates)
//! any    --[operator]----> DISABLED | ACTIVE
//! ```
//!
//! All reads and writes of the account list and the round-robin cursors go
//! through one async mutex; lazy reactivation happens under that lock via
//! [`Account::reactivate_if_expired`] before any availability predicate is
//! evaluated. Mutated accounts are written back to the [`AccountStore`] after
//! the lock is released.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::account::{Account, AccountStatus, AccountUpdate, FailureKind, NewAccount};
use crate::error::AppError;
use crate::traits::AccountStore;

/// How [`AccountRotator::get_account`] picks among available accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
    #[default]
    RoundRobin,
    LeastUsed,
    Random,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::RoundRobin => "round_robin",
            SelectionStrategy::LeastUsed => "least_used",
            SelectionStrategy::Random => "random",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(SelectionStrategy::RoundRobin),
            "least_used" => Ok(SelectionStrategy::LeastUsed),
            "random" => Ok(SelectionStrategy::Random),
            _ => Err(format!("Unknown selection strategy: {}", s)),
        }
    }
}

/// Configuration for account rotation.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub strategy: SelectionStrategy,
    /// Cooldown applied on an explicit rate-limit signal.
    pub rate_limit_cooldown: TimeDelta,
    /// Ban window applied on a block signal.
    pub ban_duration: TimeDelta,
    /// Short cooldown applied by `rotate_on_error` to the failing account.
    pub error_cooldown: TimeDelta,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::RoundRobin,
            rate_limit_cooldown: TimeDelta::seconds(300),
            ban_duration: TimeDelta::hours(24),
            error_cooldown: TimeDelta::seconds(60),
        }
    }
}

impl RotationConfig {
    pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Per-platform account counts for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountStats {
    pub total: usize,
    pub by_status: HashMap<AccountStatus, usize>,
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
}

impl AccountStats {
    pub fn count(&self, status: AccountStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct RotatorState {
    accounts: Vec<Account>,
    cursors: HashMap<String, usize>,
}

impl RotatorState {
    fn find_mut(&mut self, id: Uuid) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.id == id)
    }

    /// Lazily reactivates the platform's accounts and returns the indices of
    /// the available ones, in stable list order, plus any that changed.
    fn available(&mut self, platform: &str) -> (Vec<usize>, Vec<Account>) {
        let now = Utc::now();
        let mut available = Vec::new();
        let mut changed = Vec::new();
        for (idx, account) in self.accounts.iter_mut().enumerate() {
            if account.platform != platform {
                continue;
            }
            if account.reactivate_if_expired(now) {
                tracing::info!(account_id = %account.id, %platform, "Account reactivated");
                changed.push(account.clone());
            }
            if account.status == AccountStatus::Active {
                available.push(idx);
            }
        }
        (available, changed)
    }
}

/// Selects accounts per platform and applies failure-driven transitions.
#[derive(Clone)]
pub struct AccountRotator<S> {
    store: S,
    config: RotationConfig,
    state: Arc<Mutex<RotatorState>>,
}

impl<S: AccountStore> AccountRotator<S> {
    pub fn new(store: S, config: RotationConfig) -> Self {
        Self {
            store,
            config,
            state: Arc::new(Mutex::new(RotatorState::default())),
        }
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replaces the cached accounts of `platform` with the store's current view.
    pub async fn load(&self, platform: &str) -> Result<usize, AppError> {
        let accounts = self.store.list_accounts(Some(platform), None).await?;
        let count = accounts.len();
        let mut state = self.state.lock().await;
        state.accounts.retain(|a| a.platform != platform);
        state.accounts.extend(accounts);
        state.cursors.remove(platform);
        tracing::info!(%platform, count, "Loaded accounts");
        Ok(count)
    }

    /// Registers a new account in the store and in rotation.
    pub async fn add_account(&self, request: NewAccount) -> Result<Account, AppError> {
        let account = request.into_account();
        self.store.create_account(&account).await?;
        self.state.lock().await.accounts.push(account.clone());
        Ok(account)
    }

    /// Picks an account with the configured strategy.
    pub async fn get_account(&self, platform: &str) -> Option<Account> {
        self.get_account_with(platform, self.config.strategy).await
    }

    pub async fn get_account_with(
        &self,
        platform: &str,
        strategy: SelectionStrategy,
    ) -> Option<Account> {
        let (selected, changed) = {
            let mut state = self.state.lock().await;
            let (available, changed) = state.available(platform);

            let selected = if available.is_empty() {
                None
            } else {
                let pick = match strategy {
                    SelectionStrategy::RoundRobin => {
                        let cursor = state.cursors.entry(platform.to_string()).or_insert(0);
                        // The set can shrink or grow between calls: wrap every time.
                        let pos = *cursor % available.len();
                        *cursor = (pos + 1) % available.len();
                        available[pos]
                    }
                    SelectionStrategy::LeastUsed => available
                        .iter()
                        .copied()
                        .min_by_key(|&idx| state.accounts[idx].request_count)
                        .unwrap_or(available[0]),
                    SelectionStrategy::Random => {
                        available[rand::rng().random_range(0..available.len())]
                    }
                };
                Some(state.accounts[pick].clone())
            };
            (selected, changed)
        };

        self.persist(changed).await;
        if selected.is_none() {
            tracing::warn!(%platform, "No available account");
        }
        selected
    }

    /// Cools the failing account down and returns the healthiest alternative.
    ///
    /// Accounts already moved to Cooling/Banned/Expired keep their state;
    /// only an Active account is put into the short error cooldown.
    pub async fn rotate_on_error(&self, platform: &str, failed_id: Uuid) -> Option<Account> {
        let now = Utc::now();
        let (selected, mut changed) = {
            let mut state = self.state.lock().await;
            let mut changed = Vec::new();
            if let Some(failed) = state.find_mut(failed_id) {
                if failed.status == AccountStatus::Active {
                    failed.cool_down(self.config.error_cooldown, now);
                    changed.push(failed.clone());
                }
            }

            let (available, reactivated) = state.available(platform);
            changed.extend(reactivated);
            let selected = available
                .into_iter()
                .filter(|&idx| state.accounts[idx].id != failed_id)
                .min_by(|&a, &b| {
                    state.accounts[a]
                        .error_rate()
                        .total_cmp(&state.accounts[b].error_rate())
                })
                .map(|idx| state.accounts[idx].clone());
            (selected, changed)
        };

        match &selected {
            Some(next) => tracing::info!(
                %platform,
                from = %failed_id,
                to = %next.id,
                "Rotated account after error"
            ),
            None => tracing::warn!(%platform, from = %failed_id, "No alternative account to rotate to"),
        }
        changed.dedup_by_key(|a| a.id);
        self.persist(changed).await;
        selected
    }

    /// True if the account is (after lazy reactivation) Active.
    pub async fn is_available(&self, id: Uuid) -> bool {
        let (available, changed) = {
            let mut state = self.state.lock().await;
            match state.find_mut(id) {
                Some(account) => {
                    let reactivated = account.reactivate_if_expired(Utc::now());
                    let changed = reactivated.then(|| account.clone());
                    (account.status == AccountStatus::Active, changed)
                }
                None => (false, None),
            }
        };
        self.persist(changed.into_iter().collect()).await;
        available
    }

    /// Counts a dispatched request before its outcome is known.
    pub async fn record_request(&self, id: Uuid) {
        self.mutate(id, |account| account.record_request(Utc::now()))
            .await;
    }

    pub async fn record_success(&self, id: Uuid) {
        self.mutate(id, |account| account.record_success(Utc::now()))
            .await;
    }

    /// Counts the error and applies the state transition for `kind`.
    ///
    /// Only an Active account changes state. A late signal from a request
    /// still in flight never shortens a ban or revives an Expired account.
    pub async fn record_error(&self, id: Uuid, kind: FailureKind) {
        let config = self.config.clone();
        self.mutate(id, move |account| {
            let now = Utc::now();
            account.error_count += 1;
            account.updated_at = now;
            account.reactivate_if_expired(now);
            if account.status != AccountStatus::Active {
                tracing::debug!(
                    account_id = %account.id,
                    status = %account.status,
                    ?kind,
                    "Account already out of rotation, keeping state"
                );
                return;
            }
            match kind {
                FailureKind::RateLimited => {
                    tracing::warn!(account_id = %account.id, "Account rate limited, cooling down");
                    account.cool_down(config.rate_limit_cooldown, now);
                }
                FailureKind::Banned => {
                    tracing::warn!(account_id = %account.id, "Account blocked, banning");
                    account.ban(config.ban_duration, now);
                }
                FailureKind::CredentialExpired => {
                    tracing::warn!(account_id = %account.id, "Account credential expired");
                    account.expire(now);
                }
                FailureKind::Transient => {}
            }
        })
        .await;
    }

    /// Operator action: force Active.
    pub async fn activate(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        self.operator_update(id, |account| account.activate(Utc::now()))
            .await
    }

    /// Operator action: take out of rotation.
    pub async fn disable(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        self.operator_update(id, |account| account.disable(Utc::now()))
            .await
    }

    /// Operator action: change credential/notes/metadata.
    pub async fn update(&self, id: Uuid, update: AccountUpdate) -> Result<Option<Account>, AppError> {
        self.operator_update(id, move |account| update.apply(account, Utc::now()))
            .await
    }

    /// Operator action: remove from store and rotation.
    pub async fn remove(&self, id: Uuid) -> Result<bool, AppError> {
        let deleted = self.store.delete_account(id).await?;
        self.state.lock().await.accounts.retain(|a| a.id != id);
        Ok(deleted)
    }

    /// Snapshot of the cached accounts of a platform.
    pub async fn accounts(&self, platform: &str) -> Vec<Account> {
        let state = self.state.lock().await;
        state
            .accounts
            .iter()
            .filter(|a| a.platform == platform)
            .cloned()
            .collect()
    }

    pub async fn stats(&self, platform: &str) -> AccountStats {
        let (stats, changed) = {
            let mut state = self.state.lock().await;
            let (_, changed) = state.available(platform);
            let mut stats = AccountStats::default();
            for account in state.accounts.iter().filter(|a| a.platform == platform) {
                stats.total += 1;
                *stats.by_status.entry(account.status).or_insert(0) += 1;
                stats.requests += account.request_count;
                stats.successes += account.success_count;
                stats.errors += account.error_count;
            }
            (stats, changed)
        };
        self.persist(changed).await;
        stats
    }

    /// Applies `f` to the account (loading it from the store if it is not
    /// cached yet), persists it, and refreshes the cached copy.
    async fn operator_update<F>(&self, id: Uuid, f: F) -> Result<Option<Account>, AppError>
    where
        F: FnOnce(&mut Account),
    {
        let cached = {
            let state = self.state.lock().await;
            state.accounts.iter().find(|a| a.id == id).cloned()
        };
        let mut account = match cached {
            Some(account) => account,
            None => match self.store.get_account(id).await? {
                Some(account) => account,
                None => return Ok(None),
            },
        };

        f(&mut account);
        if !self.store.update_account(&account).await? {
            return Ok(None);
        }

        let mut state = self.state.lock().await;
        if let Some(slot) = state.find_mut(id) {
            *slot = account.clone();
        }
        Ok(Some(account))
    }

    async fn mutate<F>(&self, id: Uuid, f: F)
    where
        F: FnOnce(&mut Account),
    {
        let updated = {
            let mut state = self.state.lock().await;
            state.find_mut(id).map(|account| {
                f(account);
                account.clone()
            })
        };
        match updated {
            Some(account) => self.persist(vec![account]).await,
            None => tracing::debug!(account_id = %id, "Ignoring update for unknown account"),
        }
    }

    async fn persist(&self, accounts: Vec<Account>) {
        for account in accounts {
            if let Err(e) = self.store.update_account(&account).await {
                tracing::warn!(account_id = %account.id, error = %e, "Failed to persist account state");
            }
        }
    }
}
