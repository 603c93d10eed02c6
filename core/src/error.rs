use crate::types::{Amount, ParseAmountError, UserId, WithdrawalId};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    // ── Validation ─────────────────────────────────
    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("Withdrawal fee {fee} leaves nothing to send from {amount}")]
    FeeExceedsAmount { amount: Amount, fee: Amount },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ── State ──────────────────────────────────────
    #[error("User '{user_id}' not found")]
    UserNotFound { user_id: UserId },

    #[error("User '{user_id}' is suspended")]
    UserSuspended { user_id: UserId },

    #[error("User '{user_id}' is deleted")]
    UserDeleted { user_id: UserId },

    #[error("Account for user '{user_id}' already exists")]
    AccountExists { user_id: UserId },

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Amount, available: Amount },

    #[error("Insufficient central reserve: requested {requested}, available {available}")]
    InsufficientReserve { requested: Amount, available: Amount },

    #[error("{what} would exceed the largest storable amount")]
    AmountOverflow { what: &'static str },

    #[error("Withdrawal '{id}' not found")]
    NotFound { id: WithdrawalId },

    #[error("Withdrawal '{id}' is already {status}")]
    AlreadyResolved { id: WithdrawalId, status: String },

    // ── Configuration ──────────────────────────────
    #[error("Policy setting '{setting}' is not configured")]
    ConfigMissing { setting: &'static str },

    // ── Transient ──────────────────────────────────
    #[error("Store contention: gave up after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error("Timed out waiting for a store connection")]
    PoolTimeout,

    // ── Internal ───────────────────────────────────
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification used by callers to map errors onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    State,
    Configuration,
    Transient,
    Internal,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount { .. }
            | LedgerError::FeeExceedsAmount { .. }
            | LedgerError::InvalidInput(_) => ErrorKind::Validation,

            LedgerError::UserNotFound { .. }
            | LedgerError::UserSuspended { .. }
            | LedgerError::UserDeleted { .. }
            | LedgerError::AccountExists { .. }
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::InsufficientReserve { .. }
            | LedgerError::AmountOverflow { .. }
            | LedgerError::NotFound { .. }
            | LedgerError::AlreadyResolved { .. } => ErrorKind::State,

            LedgerError::ConfigMissing { .. } => ErrorKind::Configuration,

            LedgerError::Conflict { .. } | LedgerError::PoolTimeout => ErrorKind::Transient,

            LedgerError::Database(_) | LedgerError::Serialization(_) | LedgerError::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// True for SQLite lock contention that is worth retrying.
    pub(crate) fn is_busy(&self) -> bool {
        match self {
            LedgerError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<ParseAmountError> for LedgerError {
    fn from(e: ParseAmountError) -> Self {
        LedgerError::InvalidInput(e.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
