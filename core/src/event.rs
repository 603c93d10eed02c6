//! Audit events: one per state change, written in the same transaction.
//!
//! RULE: Variants are added over time, never removed or reordered.
//! The event log is append-only; nothing reads it to make decisions.

use crate::{
    account::AccountFlag,
    config::PolicySnapshot,
    types::{Amount, GrantId, UserId, WithdrawalId},
    withdrawal::WithdrawalStatus,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    // ── Accounts ───────────────────────────────────
    AccountOpened {
        user_id: UserId,
        utc_offset_minutes: i32,
    },
    AccountFlagged {
        user_id: UserId,
        flag: AccountFlag,
    },

    // ── Accrual ────────────────────────────────────
    GrantIssued {
        user_id: UserId,
        grant_id: GrantId,
        rate: Amount,
        source: String,
        expires_at: i64,
    },
    Settled {
        user_id: UserId,
        earned: Amount,
        balance: Amount,
        settled_at: i64,
    },
    GrantsPurged {
        count: usize,
    },

    // ── Withdrawals ────────────────────────────────
    WithdrawalRequested {
        user_id: UserId,
        withdrawal_id: WithdrawalId,
        amount: Amount,
        fee: Amount,
        status: WithdrawalStatus,
    },
    WithdrawalResolved {
        user_id: UserId,
        withdrawal_id: WithdrawalId,
        status: WithdrawalStatus,
        refunded: Amount,
    },

    // ── Policy ─────────────────────────────────────
    PolicyUpdated {
        policy: PolicySnapshot,
    },
}

impl LedgerEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            LedgerEvent::AccountOpened { .. }       => "account_opened",
            LedgerEvent::AccountFlagged { .. }      => "account_flagged",
            LedgerEvent::GrantIssued { .. }         => "grant_issued",
            LedgerEvent::Settled { .. }             => "settled",
            LedgerEvent::GrantsPurged { .. }        => "grants_purged",
            LedgerEvent::WithdrawalRequested { .. } => "withdrawal_requested",
            LedgerEvent::WithdrawalResolved { .. }  => "withdrawal_resolved",
            LedgerEvent::PolicyUpdated { .. }       => "policy_updated",
        }
    }

    /// The account this event concerns, if any.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            LedgerEvent::AccountOpened { user_id, .. }
            | LedgerEvent::AccountFlagged { user_id, .. }
            | LedgerEvent::GrantIssued { user_id, .. }
            | LedgerEvent::Settled { user_id, .. }
            | LedgerEvent::WithdrawalRequested { user_id, .. }
            | LedgerEvent::WithdrawalResolved { user_id, .. } => Some(user_id),
            LedgerEvent::GrantsPurged { .. } | LedgerEvent::PolicyUpdated { .. } => None,
        }
    }
}

/// A persisted event log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub user_id:    Option<UserId>,
    pub event_type: String,
    pub payload:    String,
    pub created_at: i64,
}
