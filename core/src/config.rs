//! Ledger configuration.
//!
//! Two kinds of settings live here:
//!   - `LedgerConfig`: operator settings read once at startup from a JSON file
//!     (database location, pool sizing, retry budget, grant window).
//!   - `PolicySnapshot`: admin-controlled economic policy. It is persisted in
//!     the store and read fresh inside every operation's transaction.

use crate::types::Amount;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Default lifetime of a grant: 24 hours.
pub const DEFAULT_GRANT_WINDOW_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database path, or ":memory:".
    pub database_path: String,
    /// Connections held by the store. In-memory databases always use one.
    pub pool_size: usize,
    /// SQLite busy handler timeout per statement.
    pub busy_timeout_ms: u64,
    /// How long an operation waits for a free pooled connection.
    pub checkout_timeout_ms: u64,
    /// Attempts for a transaction that keeps hitting lock contention.
    pub max_retries: u32,
    /// Base backoff between attempts; multiplied by the attempt number.
    pub retry_backoff_ms: u64,
    /// Lifetime of every newly issued grant.
    pub grant_window_secs: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: "ledger.db".into(),
            pool_size: 4,
            busy_timeout_ms: 2_000,
            checkout_timeout_ms: 5_000,
            max_retries: 5,
            retry_backoff_ms: 10,
            grant_window_secs: DEFAULT_GRANT_WINDOW_SECS,
        }
    }
}

impl LedgerConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: LedgerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pool_size == 0 {
            anyhow::bail!("pool_size must be at least 1");
        }
        if self.grant_window_secs <= 0 {
            anyhow::bail!("grant_window_secs must be positive, got {}", self.grant_window_secs);
        }
        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be at least 1");
        }
        Ok(())
    }

    /// In-memory configuration for unit and integration tests.
    pub fn default_test() -> Self {
        Self {
            database_path: ":memory:".into(),
            pool_size: 1,
            busy_timeout_ms: 500,
            checkout_timeout_ms: 1_000,
            max_retries: 3,
            retry_backoff_ms: 1,
            grant_window_secs: DEFAULT_GRANT_WINDOW_SECS,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path == ":memory:"
    }
}

// ── Admin policy ───────────────────────────────────────────────────

/// Read-only view of the admin policy row, fetched per operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicySnapshot {
    /// Rate given to each new grant, in units earned per 24h.
    pub reward_rate_per_grant: Option<Amount>,
    /// Flat fee deducted from every withdrawal.
    pub withdraw_fee: Amount,
    /// Day (in the user's local time) on which withdrawals auto-approve.
    pub auto_approve_date: Option<NaiveDate>,
    /// Funds available for approved payouts. Unset means no auto-approval.
    pub central_reserve: Option<Amount>,
}

impl PolicySnapshot {
    /// True when the reserve covers `amount`.
    pub fn reserve_covers(&self, amount: Amount) -> bool {
        self.central_reserve.is_some_and(|r| r >= amount)
    }
}

/// Partial policy update. `None` leaves a field untouched; the inner
/// `Option` of the nullable fields distinguishes "set" from "clear".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyUpdate {
    pub reward_rate_per_grant: Option<Amount>,
    pub withdraw_fee: Option<Amount>,
    pub auto_approve_date: Option<Option<NaiveDate>>,
    pub central_reserve: Option<Option<Amount>>,
}

impl PolicyUpdate {
    pub fn apply(&self, policy: &mut PolicySnapshot) {
        if let Some(rate) = self.reward_rate_per_grant {
            policy.reward_rate_per_grant = Some(rate);
        }
        if let Some(fee) = self.withdraw_fee {
            policy.withdraw_fee = fee;
        }
        if let Some(date) = self.auto_approve_date {
            policy.auto_approve_date = date;
        }
        if let Some(reserve) = self.central_reserve {
            policy.central_reserve = reserve;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
