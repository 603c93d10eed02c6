//! Account records. Accounts are created by the signup collaborator through
//! `Ledger::open_account` and afterwards mutated only by the ledger.

use crate::{
    error::{LedgerError, LedgerResult},
    types::{Amount, UserId},
};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub user_id:            UserId,
    pub balance:            Amount,
    pub total_earned:       Amount,
    pub total_withdrawn:    Amount,
    /// Unit-seconds of accrual not yet large enough to become a raw unit.
    pub accrual_carry:      u64,
    pub last_settled_at:    DateTime<Utc>,
    pub utc_offset_minutes: i32,
    pub suspended:          bool,
    pub deleted:            bool,
    pub created_at:         DateTime<Utc>,
}

impl Account {
    pub fn new(user_id: UserId, utc_offset_minutes: i32, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: Amount::ZERO,
            total_earned: Amount::ZERO,
            total_withdrawn: Amount::ZERO,
            accrual_carry: 0,
            last_settled_at: now,
            utc_offset_minutes,
            suspended: false,
            deleted: false,
            created_at: now,
        }
    }

    /// Calendar date at `now` in the user's own timezone.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        match FixedOffset::east_opt(self.utc_offset_minutes * 60) {
            Some(offset) => now.with_timezone(&offset).date_naive(),
            None => now.date_naive(),
        }
    }

    /// Deleted takes precedence over suspended.
    pub fn ensure_active(&self) -> LedgerResult<()> {
        if self.deleted {
            return Err(LedgerError::UserDeleted { user_id: self.user_id.clone() });
        }
        if self.suspended {
            return Err(LedgerError::UserSuspended { user_id: self.user_id.clone() });
        }
        Ok(())
    }
}

/// Row of the admin account listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountSummary {
    pub user_id:         UserId,
    pub balance:         Amount,
    pub total_earned:    Amount,
    pub total_withdrawn: Amount,
    /// Sum of the rates of grants active at listing time.
    pub active_rate:     Amount,
    pub suspended:       bool,
}

/// Admin flag changes on an account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountFlag {
    Suspended,
    Restored,
    Deleted,
}
