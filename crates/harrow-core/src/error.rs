use thiserror::Error;

use crate::account::FailureKind;

/// Application-wide error types for harrow.
#[derive(Error, Debug)]
pub enum AppError {
    /// Connection reset, refused, or any other transient transport failure.
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// A single network call exceeded its timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The remote host (or the primary store) could not be reached at all.
    #[error("Unreachable: {0}")]
    Unreachable(String),

    /// The signer collaborator failed to produce a signature.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// The response was empty or carried a known block marker.
    #[error("Anti-bot block detected ({marker})")]
    AntiBotBlock { marker: String },

    /// The platform explicitly throttled the account.
    #[error("Rate limited by platform")]
    RateLimited,

    /// The platform rejected the account's credentials.
    #[error("Credential expired")]
    CredentialExpired,

    /// The item was deleted or never existed upstream.
    #[error("Unknown item: {0}")]
    UnknownItem(String),

    /// Every account for the platform is cooling, banned, disabled or expired.
    #[error("No account available for platform '{0}'")]
    NoAccountAvailable(String),

    /// Unexpected HTTP status that is neither a block nor a throttle signal.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// A response body could not be decoded by the platform adapter.
    #[error("Decode error: {0}")]
    Decode(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Local snapshot read/write failed.
    #[error("Snapshot error: {0}")]
    SnapshotError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A record with the given id does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A status transition that the state machine does not allow.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying locally.
    /// The executor backs off and retries exactly these.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::TransientNetwork(_)
                | AppError::Timeout(_)
                | AppError::Unreachable(_)
                | AppError::Signing(_)
                | AppError::HttpError(_)
        )
    }

    /// Maps the error onto the account-level failure signal, if any.
    ///
    /// `None` means the failure says nothing about the account (decode errors,
    /// missing items, storage problems).
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            AppError::AntiBotBlock { .. } => Some(FailureKind::Banned),
            AppError::RateLimited => Some(FailureKind::RateLimited),
            AppError::CredentialExpired => Some(FailureKind::CredentialExpired),
            AppError::TransientNetwork(_)
            | AppError::Timeout(_)
            | AppError::Unreachable(_)
            | AppError::Signing(_)
            | AppError::HttpError(_) => Some(FailureKind::Transient),
            _ => None,
        }
    }

    /// Returns true if an item-level failure should abort the whole
    /// keyword/creator scope rather than just skipping the item.
    pub fn aborts_scope(&self) -> bool {
        matches!(
            self,
            AppError::AntiBotBlock { .. }
                | AppError::NoAccountAvailable(_)
                | AppError::DatabaseError(_)
        )
    }
}
