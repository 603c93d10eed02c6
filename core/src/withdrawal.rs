//! Withdrawal processor: validates a request against a settled account
//! and the current policy, and decides its status.
//!
//! RULE: Decisions here are pure. The ledger runs them inside the same
//! transaction that writes the outcome, so nothing decided here can go stale.
//!
//! Lifecycle: Pending → Approved | Rejected, each transition exactly once.
//! The balance is debited when the request is created; a rejection refunds it.

use crate::{
    account::Account,
    config::PolicySnapshot,
    error::{LedgerError, LedgerResult},
    types::{Amount, UserId, WithdrawalId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Requested amount: an exact value or the whole settled balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalAmount {
    Exact(Amount),
    All,
}

impl FromStr for WithdrawalAmount {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("max") {
            return Ok(WithdrawalAmount::All);
        }
        Ok(WithdrawalAmount::Exact(s.parse()?))
    }
}

impl fmt::Display for WithdrawalAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WithdrawalAmount::Exact(a) => write!(f, "{a}"),
            WithdrawalAmount::All => write!(f, "MAX"),
        }
    }
}

impl Serialize for WithdrawalAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WithdrawalAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending  => "pending",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending"  => Some(WithdrawalStatus::Pending),
            "approved" => Some(WithdrawalStatus::Approved),
            "rejected" => Some(WithdrawalStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WithdrawalStatus::Pending)
    }
}

/// Admin decision on a pending request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WithdrawalRequest {
    pub withdrawal_id: WithdrawalId,
    pub user_id:       UserId,
    pub amount:        Amount,
    pub fee:           Amount,
    pub net_amount:    Amount,
    pub wallet:        String,
    pub status:        WithdrawalStatus,
    pub created_at:    DateTime<Utc>,
    pub resolved_at:   Option<DateTime<Utc>>,
}

/// Everything decided about a new request before it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalPlan {
    pub amount:        Amount,
    pub fee:           Amount,
    pub net_amount:    Amount,
    pub status:        WithdrawalStatus,
    /// Debit against the central reserve, present only when auto-approved.
    pub reserve_debit: Option<Amount>,
}

/// Effect of resolving a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionEffect {
    pub status:        WithdrawalStatus,
    /// Amount returned to the account balance.
    pub refund:        Amount,
    pub reserve_debit: Option<Amount>,
}

pub struct WithdrawalProcessor;

impl WithdrawalProcessor {
    /// Trimmed wallet identifier; empty is invalid.
    pub fn validate_wallet(wallet: &str) -> LedgerResult<String> {
        let wallet = wallet.trim();
        if wallet.is_empty() {
            return Err(LedgerError::InvalidAmount { reason: "wallet is empty".into() });
        }
        Ok(wallet.to_string())
    }

    /// Decide a new request against an already-settled account.
    pub fn plan(
        account: &Account,
        requested: WithdrawalAmount,
        policy: &PolicySnapshot,
        now: DateTime<Utc>,
    ) -> LedgerResult<WithdrawalPlan> {
        let amount = match requested {
            WithdrawalAmount::Exact(a) => a,
            WithdrawalAmount::All => account.balance,
        };
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount { reason: "amount must be positive".into() });
        }

        let fee = policy.withdraw_fee;
        let net_amount = match amount.checked_sub(fee) {
            Some(net) if !net.is_zero() => net,
            _ => return Err(LedgerError::FeeExceedsAmount { amount, fee }),
        };

        if amount > account.balance {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available: account.balance,
            });
        }

        let auto_approve = policy.auto_approve_date == Some(account.local_date(now))
            && policy.reserve_covers(amount);
        let (status, reserve_debit) = if auto_approve {
            (WithdrawalStatus::Approved, Some(amount))
        } else {
            (WithdrawalStatus::Pending, None)
        };

        Ok(WithdrawalPlan { amount, fee, net_amount, status, reserve_debit })
    }

    /// Decide the effect of an admin resolution.
    ///
    /// Approval debits the reserve when one is configured and refuses to
    /// overdraw it. With no reserve configured, payouts are tracked outside
    /// the ledger and approval only flips the status.
    pub fn resolve(
        request: &WithdrawalRequest,
        decision: Resolution,
        policy: &PolicySnapshot,
    ) -> LedgerResult<ResolutionEffect> {
        if request.status.is_terminal() {
            return Err(LedgerError::AlreadyResolved {
                id: request.withdrawal_id.clone(),
                status: request.status.as_str().to_string(),
            });
        }

        match decision {
            Resolution::Reject => Ok(ResolutionEffect {
                status: WithdrawalStatus::Rejected,
                refund: request.amount,
                reserve_debit: None,
            }),
            Resolution::Approve => {
                let reserve_debit = match policy.central_reserve {
                    Some(reserve) if reserve < request.amount => {
                        return Err(LedgerError::InsufficientReserve {
                            requested: request.amount,
                            available: reserve,
                        });
                    }
                    Some(_) => Some(request.amount),
                    None => None,
                };
                Ok(ResolutionEffect {
                    status: WithdrawalStatus::Approved,
                    refund: Amount::ZERO,
                    reserve_debit,
                })
            }
        }
    }
}
