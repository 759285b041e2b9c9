use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a platform account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Cooling,
    Banned,
    Disabled,
    Expired,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Cooling => "cooling",
            AccountStatus::Banned => "banned",
            AccountStatus::Disabled => "disabled",
            AccountStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(AccountStatus::Active),
            "cooling" => Ok(AccountStatus::Cooling),
            "banned" => Ok(AccountStatus::Banned),
            "disabled" => Ok(AccountStatus::Disabled),
            "expired" => Ok(AccountStatus::Expired),
            _ => Err(format!("Unknown account status: {}", s)),
        }
    }
}

/// Account-level failure signal reported by the executor.
///
/// Closed set: the rotator matches on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Explicit throttling; short cooldown.
    RateLimited,
    /// Block marker or empty body; long ban.
    Banned,
    /// Auth rejected; terminal until an operator re-authenticates.
    CredentialExpired,
    /// Network or signing trouble; counted, no state change.
    Transient,
}

/// One platform credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub platform: String,
    /// Opaque credential (cookie string, token bundle) supplied by a login flow.
    pub credential: String,
    pub status: AccountStatus,
    pub last_used_at: Option<DateTime<Utc>>,
    pub cooling_until: Option<DateTime<Utc>>,
    pub banned_until: Option<DateTime<Utc>>,
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub notes: Option<String>,
    /// Browser-derived tokens and other collaborator values, forwarded as-is.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(platform: impl Into<String>, credential: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            platform: platform.into(),
            credential: credential.into(),
            status: AccountStatus::Active,
            last_used_at: None,
            cooling_until: None,
            banned_until: None,
            request_count: 0,
            success_count: 0,
            error_count: 0,
            notes: None,
            metadata: serde_json::Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Pure predicate: the account is in a time-bounded state whose window
    /// has already elapsed at `now`.
    pub fn is_expired_cooldown(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            AccountStatus::Cooling => self.cooling_until.is_none_or(|until| now >= until),
            AccountStatus::Banned => self.banned_until.is_none_or(|until| now >= until),
            _ => false,
        }
    }

    /// Explicit transition: Cooling/Banned → Active once the window is over.
    ///
    /// Returns true if the status changed.
    pub fn reactivate_if_expired(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_expired_cooldown(now) {
            return false;
        }
        self.status = AccountStatus::Active;
        self.cooling_until = None;
        self.banned_until = None;
        self.updated_at = now;
        true
    }

    /// Lazily reactivates, then reports whether the account may be selected.
    pub fn is_available(&mut self, now: DateTime<Utc>) -> bool {
        self.reactivate_if_expired(now);
        self.status == AccountStatus::Active
    }

    /// Puts the account into Cooling for `duration`.
    pub fn cool_down(&mut self, duration: TimeDelta, now: DateTime<Utc>) {
        self.status = AccountStatus::Cooling;
        self.cooling_until = Some(now + duration);
        self.updated_at = now;
    }

    pub fn ban(&mut self, duration: TimeDelta, now: DateTime<Utc>) {
        self.status = AccountStatus::Banned;
        self.banned_until = Some(now + duration);
        self.updated_at = now;
    }

    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.status = AccountStatus::Expired;
        self.updated_at = now;
    }

    /// Operator action: force the account back to Active.
    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.status = AccountStatus::Active;
        self.cooling_until = None;
        self.banned_until = None;
        self.updated_at = now;
    }

    /// Operator action: take the account out of rotation.
    pub fn disable(&mut self, now: DateTime<Utc>) {
        self.status = AccountStatus::Disabled;
        self.updated_at = now;
    }

    pub fn record_request(&mut self, now: DateTime<Utc>) {
        self.request_count += 1;
        self.last_used_at = Some(now);
        self.updated_at = now;
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.success_count += 1;
        self.updated_at = now;
    }

    /// Ratio used by rotate-on-error to prefer the healthiest alternative.
    pub fn error_rate(&self) -> f64 {
        self.error_count as f64 / self.request_count.max(1) as f64
    }
}

/// Request to register a new account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub platform: String,
    pub credential: String,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewAccount {
    pub fn new(platform: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            credential: credential.into(),
            notes: None,
            metadata: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn into_account(self) -> Account {
        let mut account = Account::new(self.platform, self.credential);
        account.notes = self.notes;
        if let Some(metadata) = self.metadata {
            account.metadata = metadata;
        }
        account
    }
}

/// Partial update applied by operators.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub credential: Option<String>,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl AccountUpdate {
    pub fn apply(self, account: &mut Account, now: DateTime<Utc>) {
        if let Some(credential) = self.credential {
            account.credential = credential;
            // A fresh credential is the re-authentication that lifts Expired.
            if account.status == AccountStatus::Expired {
                account.status = AccountStatus::Active;
            }
        }
        if let Some(notes) = self.notes {
            account.notes = Some(notes);
        }
        if let Some(metadata) = self.metadata {
            account.metadata = metadata;
        }
        account.updated_at = now;
    }
}
