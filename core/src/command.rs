//! Line-oriented request surface.
//!
//! The API layer (out of scope here) authenticates a caller and hands the
//! ledger one `LedgerCommand`. `respond` turns the outcome into a JSON
//! envelope: `{"ok": true, "result": ...}` or
//! `{"ok": false, "kind": "...", "error": "..."}`.

use crate::{
    config::PolicyUpdate,
    error::{LedgerError, LedgerResult},
    ledger::Ledger,
    types::{Amount, UserId, WithdrawalId},
    withdrawal::{Resolution, WithdrawalAmount},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

fn default_source() -> String {
    "ad_view".to_string()
}

/// Every request the ledger accepts.
/// Variants are added over time, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum LedgerCommand {
    // ── Accounts ──────────────────────────────────
    OpenAccount {
        user_id: UserId,
        #[serde(default)]
        utc_offset_minutes: i32,
    },
    Account { user_id: UserId },
    ListAccounts,
    Suspend { user_id: UserId },
    Restore { user_id: UserId },
    SoftDelete { user_id: UserId },

    // ── Accrual ───────────────────────────────────
    Settle { user_id: UserId },
    GrantReward {
        user_id: UserId,
        #[serde(default = "default_source")]
        source: String,
    },
    ActiveGrants { user_id: UserId },
    PurgeExpiredGrants,

    // ── Withdrawals ───────────────────────────────
    RequestWithdrawal {
        user_id: UserId,
        amount:  WithdrawalAmount,
        wallet:  String,
    },
    AdminResolve {
        withdrawal_id: WithdrawalId,
        decision:      Resolution,
    },
    ApproveAllPending,
    ListPending,
    Withdrawal { withdrawal_id: WithdrawalId },
    WithdrawalHistory { user_id: UserId },

    // ── Policy ────────────────────────────────────
    Policy,
    UpdatePolicy {
        #[serde(default)]
        reward_rate_per_grant: Option<Amount>,
        #[serde(default)]
        withdraw_fee: Option<Amount>,
        #[serde(default)]
        auto_approve_date: Option<NaiveDate>,
        #[serde(default)]
        clear_auto_approve_date: bool,
        #[serde(default)]
        central_reserve: Option<Amount>,
        #[serde(default)]
        clear_central_reserve: bool,
    },

    // ── Audit ─────────────────────────────────────
    Events {
        #[serde(default)]
        user_id: Option<UserId>,
    },
}

impl LedgerCommand {
    /// Parse one JSON request line.
    pub fn parse(line: &str) -> LedgerResult<Self> {
        serde_json::from_str(line).map_err(|e| LedgerError::InvalidInput(e.to_string()))
    }
}

impl Ledger {
    /// Execute one command and return its result as JSON.
    pub fn dispatch(&self, command: &LedgerCommand) -> LedgerResult<Value> {
        let value = match command {
            LedgerCommand::OpenAccount { user_id, utc_offset_minutes } => {
                serde_json::to_value(self.open_account(user_id, *utc_offset_minutes)?)?
            }
            LedgerCommand::Account { user_id } => serde_json::to_value(self.account(user_id)?)?,
            LedgerCommand::ListAccounts => serde_json::to_value(self.list_accounts()?)?,
            LedgerCommand::Suspend { user_id } => serde_json::to_value(self.suspend(user_id)?)?,
            LedgerCommand::Restore { user_id } => serde_json::to_value(self.restore(user_id)?)?,
            LedgerCommand::SoftDelete { user_id } => serde_json::to_value(self.soft_delete(user_id)?)?,

            LedgerCommand::Settle { user_id } => {
                let settlement = self.settle(user_id)?;
                json!({ "earned": settlement.earned, "account": settlement.account })
            }
            LedgerCommand::GrantReward { user_id, source } => {
                serde_json::to_value(self.grant_reward(user_id, source)?)?
            }
            LedgerCommand::ActiveGrants { user_id } => {
                let grants = self.active_grants(user_id)?;
                let rate = self.active_rate(user_id)?;
                json!({ "active_rate": rate, "grants": grants })
            }
            LedgerCommand::PurgeExpiredGrants => json!({ "purged": self.purge_expired_grants()? }),

            LedgerCommand::RequestWithdrawal { user_id, amount, wallet } => {
                serde_json::to_value(self.request_withdrawal(user_id, *amount, wallet)?)?
            }
            LedgerCommand::AdminResolve { withdrawal_id, decision } => {
                serde_json::to_value(self.admin_resolve(withdrawal_id, *decision)?)?
            }
            LedgerCommand::ApproveAllPending => serde_json::to_value(self.approve_all_pending()?)?,
            LedgerCommand::ListPending => serde_json::to_value(self.list_pending()?)?,
            LedgerCommand::Withdrawal { withdrawal_id } => {
                serde_json::to_value(self.withdrawal(withdrawal_id)?)?
            }
            LedgerCommand::WithdrawalHistory { user_id } => {
                serde_json::to_value(self.withdrawal_history(user_id)?)?
            }

            LedgerCommand::Policy => serde_json::to_value(self.policy()?)?,
            LedgerCommand::UpdatePolicy {
                reward_rate_per_grant,
                withdraw_fee,
                auto_approve_date,
                clear_auto_approve_date,
                central_reserve,
                clear_central_reserve,
            } => {
                let update = PolicyUpdate {
                    reward_rate_per_grant: *reward_rate_per_grant,
                    withdraw_fee: *withdraw_fee,
                    auto_approve_date: nullable_update(*auto_approve_date, *clear_auto_approve_date)?,
                    central_reserve: nullable_update(*central_reserve, *clear_central_reserve)?,
                };
                serde_json::to_value(self.update_policy(&update)?)?
            }

            LedgerCommand::Events { user_id } => {
                serde_json::to_value(self.events(user_id.as_deref())?)?
            }
        };
        Ok(value)
    }

    /// Execute one command and wrap the outcome in a response envelope.
    /// Never fails: errors become `ok: false` responses.
    pub fn respond(&self, command: &LedgerCommand) -> Value {
        match self.dispatch(command) {
            Ok(result) => json!({ "ok": true, "result": result }),
            Err(e) => error_response(&e),
        }
    }
}

pub fn error_response(e: &LedgerError) -> Value {
    json!({ "ok": false, "kind": e.kind(), "error": e.to_string() })
}

/// Set, clear, or leave alone a nullable policy field.
fn nullable_update<T>(value: Option<T>, clear: bool) -> LedgerResult<Option<Option<T>>> {
    match (value, clear) {
        (Some(_), true) => Err(LedgerError::InvalidInput(
            "cannot both set and clear the same policy field".into(),
        )),
        (Some(v), false) => Ok(Some(Some(v))),
        (None, true) => Ok(Some(None)),
        (None, false) => Ok(None),
    }
}
