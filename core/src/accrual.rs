//! Accrual engine: turns elapsed time under active grants into balance.
//!
//! RULE: This module is pure. It never touches the store or the clock;
//! Ledger::settle feeds it a snapshot and applies the result transactionally.
//!
//! Each grant contributes only over its own window clipped to the
//! settlement interval:
//!
//!   overlap = [max(issued_at, last_settled_at), min(expires_at, now)]
//!
//! Rates are units per 24h. Sub-raw-unit remainders are carried on the
//! account in unit-seconds, so settling an interval in one call or in
//! several always yields the same balance.

use crate::{
    account::Account,
    types::{Amount, GrantId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seconds in the period a grant's `rate` is expressed over.
pub const RATE_PERIOD_SECS: u64 = 24 * 60 * 60;

/// A time-boxed right to accrue value at a fixed rate. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Grant {
    pub grant_id:   GrantId,
    pub user_id:    UserId,
    /// Units earned per 24h while the grant is active.
    pub rate:       Amount,
    pub source:     String,
    pub issued_at:  DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Grant {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.issued_at <= now && now < self.expires_at
    }

    /// Whole seconds until expiry; zero once expired.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at.timestamp() - now.timestamp()).max(0)
    }

    /// Seconds of this grant's window that fall inside `[from, to]`.
    pub fn overlap_secs(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
        let start = self.issued_at.timestamp().max(from.timestamp());
        let end = self.expires_at.timestamp().min(to.timestamp());
        end.saturating_sub(start).max(0) as u64
    }
}

/// A grant as reported to the user: the grant plus time left.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrantStatus {
    #[serde(flatten)]
    pub grant:          Grant,
    pub remaining_secs: i64,
}

/// Result of accruing one account up to `settled_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accrual {
    pub earned:     Amount,
    pub carry:      u64,
    pub settled_at: DateTime<Utc>,
}

pub struct AccrualEngine;

impl AccrualEngine {
    /// Value earned by `account` between its last settlement and `now`.
    ///
    /// Grants that expired before the last settlement, or that belong to
    /// another user, contribute nothing. A clock that reads earlier than
    /// the last settlement yields zero and leaves the settlement point alone.
    pub fn accrue(account: &Account, grants: &[Grant], now: DateTime<Utc>) -> Accrual {
        let from = account.last_settled_at;
        if now <= from {
            return Accrual { earned: Amount::ZERO, carry: account.accrual_carry, settled_at: from };
        }

        let unit_secs: u128 = grants
            .iter()
            .filter(|g| g.user_id == account.user_id)
            .map(|g| g.rate.raw() as u128 * g.overlap_secs(from, now) as u128)
            .sum();

        let total = unit_secs + account.accrual_carry as u128;
        let period = RATE_PERIOD_SECS as u128;
        let earned = u64::try_from(total / period).unwrap_or(u64::MAX);

        Accrual {
            earned:     Amount::from_raw(earned),
            carry:      (total % period) as u64,
            settled_at: now,
        }
    }

    /// Sum of rates of the grants active at `now`.
    pub fn active_rate(grants: &[Grant], now: DateTime<Utc>) -> Amount {
        grants
            .iter()
            .filter(|g| g.is_active_at(now))
            .fold(Amount::ZERO, |acc, g| acc.saturating_add(g.rate))
    }
}
