//! The ledger: the only entry point for reading or changing balances.
//!
//! OPERATIONS (each one transaction, all-or-nothing):
//!   - open_account / suspend / restore / soft_delete   account lifecycle
//!   - grant_reward                                     issue a 24h grant
//!   - settle                                           realise accrued value
//!   - request_withdrawal                               debit + decide status
//!   - admin_resolve / approve_all_pending              terminal transitions
//!   - update_policy                                    admin policy row
//!
//! RULES:
//!   - Balance-reading operations settle first, so reads reflect elapsed time.
//!   - Policy is read inside the transaction that acts on it, never cached.
//!   - Every state change appends an audit event in the same transaction.

use crate::{
    account::{Account, AccountFlag, AccountSummary},
    accrual::{AccrualEngine, Grant, GrantStatus},
    clock::{from_unix, Clock, ManualClock},
    config::{LedgerConfig, PolicySnapshot, PolicyUpdate},
    error::{LedgerError, LedgerResult},
    event::{EventLogEntry, LedgerEvent},
    store::{LedgerStore, LedgerTx},
    types::Amount,
    withdrawal::{
        Resolution, ResolutionEffect, WithdrawalAmount, WithdrawalProcessor, WithdrawalRequest,
        WithdrawalStatus,
    },
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Largest accepted timezone offset, in minutes (UTC+14 / UTC-14).
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

pub struct Ledger {
    store:        LedgerStore,
    clock:        Arc<dyn Clock>,
    grant_window: Duration,
}

/// Outcome of a settlement: the updated account and what was credited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub account: Account,
    pub earned:  Amount,
}

impl Ledger {
    pub fn new(store: LedgerStore, clock: Arc<dyn Clock>, config: &LedgerConfig) -> Self {
        Self {
            store,
            clock,
            grant_window: Duration::seconds(config.grant_window_secs),
        }
    }

    /// Open the configured store, migrate it and wire the ledger.
    pub fn open(config: &LedgerConfig, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        config.validate()?;
        let store = LedgerStore::open(config)?;
        store.migrate()?;
        Ok(Self::new(store, clock, config))
    }

    /// In-memory ledger driven by a manual clock.
    pub fn build_test(clock: Arc<ManualClock>) -> LedgerResult<Self> {
        Self::open(&LedgerConfig::default_test(), clock)
    }

    /// Clock time truncated to whole seconds, the store's resolution.
    pub fn now(&self) -> DateTime<Utc> {
        from_unix(self.clock.now().timestamp())
    }

    // ── Accounts ───────────────────────────────────────────────

    pub fn open_account(&self, user_id: &str, utc_offset_minutes: i32) -> LedgerResult<Account> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(LedgerError::InvalidInput("user id is empty".into()));
        }
        if utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(LedgerError::InvalidInput(format!(
                "utc offset {utc_offset_minutes} minutes is out of range"
            )));
        }

        let now = self.now();
        let account = Account::new(user_id.to_string(), utc_offset_minutes, now);
        self.store.write("open_account", |tx| {
            if !tx.insert_account(&account)? {
                return Err(LedgerError::AccountExists { user_id: account.user_id.clone() });
            }
            tx.append_event(
                &LedgerEvent::AccountOpened {
                    user_id: account.user_id.clone(),
                    utc_offset_minutes,
                },
                now,
            )
        })?;
        log::info!("Opened account {user_id} (utc offset {utc_offset_minutes}m)");
        Ok(account)
    }

    /// Settled view of one account.
    pub fn account(&self, user_id: &str) -> LedgerResult<Account> {
        Ok(self.settle(user_id)?.account)
    }

    /// Settled summaries of every non-deleted account, highest active rate first.
    pub fn list_accounts(&self) -> LedgerResult<Vec<AccountSummary>> {
        let now = self.now();
        let mut summaries = self.store.write("list_accounts", |tx| {
            let rates = tx.active_rates(now)?;
            tx.all_accounts(false)?
                .into_iter()
                .map(|a| {
                    let account = Self::settle_in(tx, &a.user_id, now)?.account;
                    Ok(AccountSummary {
                        active_rate: rates.get(&account.user_id).copied().unwrap_or(Amount::ZERO),
                        user_id: account.user_id,
                        balance: account.balance,
                        total_earned: account.total_earned,
                        total_withdrawn: account.total_withdrawn,
                        suspended: account.suspended,
                    })
                })
                .collect::<LedgerResult<Vec<_>>>()
        })?;
        summaries.sort_by(|a, b| b.active_rate.cmp(&a.active_rate).then_with(|| a.user_id.cmp(&b.user_id)));
        Ok(summaries)
    }

    pub fn suspend(&self, user_id: &str) -> LedgerResult<Account> {
        self.flag_account(user_id, AccountFlag::Suspended)
    }

    /// Clear both the suspended and deleted flags.
    pub fn restore(&self, user_id: &str) -> LedgerResult<Account> {
        self.flag_account(user_id, AccountFlag::Restored)
    }

    /// Soft delete. The row and its history are kept.
    pub fn soft_delete(&self, user_id: &str) -> LedgerResult<Account> {
        self.flag_account(user_id, AccountFlag::Deleted)
    }

    fn flag_account(&self, user_id: &str, flag: AccountFlag) -> LedgerResult<Account> {
        let now = self.now();
        let account = self.store.write("flag_account", |tx| {
            let mut account = tx.require_account(user_id)?;
            match flag {
                AccountFlag::Suspended => account.suspended = true,
                AccountFlag::Restored => {
                    account.suspended = false;
                    account.deleted = false;
                }
                AccountFlag::Deleted => account.deleted = true,
            }
            tx.set_account_flags(user_id, account.suspended, account.deleted)?;
            tx.append_event(&LedgerEvent::AccountFlagged { user_id: user_id.to_string(), flag }, now)?;
            Ok(account)
        })?;
        log::info!("Account {user_id} flagged {flag:?}");
        Ok(account)
    }

    // ── Accrual ────────────────────────────────────────────────

    /// Realise everything earned since the last settlement.
    pub fn settle(&self, user_id: &str) -> LedgerResult<Settlement> {
        let now = self.now();
        self.store.write("settle", |tx| Self::settle_in(tx, user_id, now))
    }

    /// Settlement inside an existing transaction. Writes nothing when
    /// there is nothing to move.
    fn settle_in(tx: &LedgerTx<'_>, user_id: &str, now: DateTime<Utc>) -> LedgerResult<Settlement> {
        let mut account = tx.require_account(user_id)?;
        let grants = tx.grants_for_settlement(user_id, account.last_settled_at, now)?;
        let accrual = AccrualEngine::accrue(&account, &grants, now);

        if accrual.settled_at == account.last_settled_at {
            return Ok(Settlement { account, earned: Amount::ZERO });
        }

        let balance = account
            .balance
            .checked_add(accrual.earned)
            .ok_or(LedgerError::AmountOverflow { what: "balance" })?;
        let total_earned = account
            .total_earned
            .checked_add(accrual.earned)
            .ok_or(LedgerError::AmountOverflow { what: "total earned" })?;

        tx.apply_settlement(user_id, accrual.earned, accrual.carry, accrual.settled_at)?;
        account.balance = balance;
        account.total_earned = total_earned;
        account.accrual_carry = accrual.carry;
        account.last_settled_at = accrual.settled_at;

        if !accrual.earned.is_zero() {
            tx.append_event(
                &LedgerEvent::Settled {
                    user_id: user_id.to_string(),
                    earned: accrual.earned,
                    balance: account.balance,
                    settled_at: accrual.settled_at.timestamp(),
                },
                now,
            )?;
            log::debug!("Settled {user_id}: +{} -> {}", accrual.earned, account.balance);
        }
        Ok(Settlement { account, earned: accrual.earned })
    }

    /// Issue a new earning grant at the policy's current rate.
    /// Grants stack; the balance is untouched until the next settlement.
    pub fn grant_reward(&self, user_id: &str, source: &str) -> LedgerResult<Grant> {
        let now = self.now();
        let grant = self.store.write("grant_reward", |tx| {
            let rate = tx
                .policy()?
                .reward_rate_per_grant
                .ok_or(LedgerError::ConfigMissing { setting: "reward_rate_per_grant" })?;
            tx.require_account(user_id)?.ensure_active()?;

            let grant = Grant {
                grant_id:   format!("grt-{}", Uuid::new_v4().simple()),
                user_id:    user_id.to_string(),
                rate,
                source:     source.to_string(),
                issued_at:  now,
                expires_at: now + self.grant_window,
            };
            tx.insert_grant(&grant)?;
            tx.append_event(
                &LedgerEvent::GrantIssued {
                    user_id: grant.user_id.clone(),
                    grant_id: grant.grant_id.clone(),
                    rate,
                    source: grant.source.clone(),
                    expires_at: grant.expires_at.timestamp(),
                },
                now,
            )?;
            Ok(grant)
        })?;
        log::info!("Grant {} issued to {user_id} at {}/day", grant.grant_id, grant.rate);
        Ok(grant)
    }

    /// Grants active now, with time remaining.
    pub fn active_grants(&self, user_id: &str) -> LedgerResult<Vec<GrantStatus>> {
        let now = self.now();
        let grants = self.store.read("active_grants", |tx| {
            tx.require_account(user_id)?;
            tx.active_grants(user_id, now)
        })?;
        Ok(grants
            .into_iter()
            .map(|grant| GrantStatus { remaining_secs: grant.remaining_secs(now), grant })
            .collect())
    }

    /// Current earning rate: the sum of active grant rates.
    pub fn active_rate(&self, user_id: &str) -> LedgerResult<Amount> {
        let now = self.now();
        let grants = self.store.read("active_rate", |tx| {
            tx.require_account(user_id)?;
            tx.active_grants(user_id, now)
        })?;
        Ok(AccrualEngine::active_rate(&grants, now))
    }

    /// Drop grants that expired before their account's last settlement.
    pub fn purge_expired_grants(&self) -> LedgerResult<usize> {
        let now = self.now();
        let removed = self.store.write("purge_expired_grants", |tx| {
            let removed = tx.purge_settled_grants()?;
            if removed > 0 {
                tx.append_event(&LedgerEvent::GrantsPurged { count: removed }, now)?;
            }
            Ok(removed)
        })?;
        log::debug!("Purged {removed} settled grant(s)");
        Ok(removed)
    }

    // ── Withdrawals ────────────────────────────────────────────

    /// Settle, validate and record a withdrawal. The balance is debited now;
    /// the request is auto-approved if today's policy allows it.
    pub fn request_withdrawal(
        &self,
        user_id: &str,
        amount: WithdrawalAmount,
        wallet: &str,
    ) -> LedgerResult<WithdrawalRequest> {
        let wallet = WithdrawalProcessor::validate_wallet(wallet)?;
        let now = self.now();

        let request = self.store.write("request_withdrawal", |tx| {
            let account = Self::settle_in(tx, user_id, now)?.account;
            account.ensure_active()?;

            let policy = tx.policy()?;
            let plan = WithdrawalProcessor::plan(&account, amount, &policy, now)?;

            tx.debit_balance(user_id, plan.amount)?;
            if let Some(debit) = plan.reserve_debit {
                tx.debit_reserve(debit)?;
            }

            let request = WithdrawalRequest {
                withdrawal_id: format!("wdr-{}", Uuid::new_v4().simple()),
                user_id:       user_id.to_string(),
                amount:        plan.amount,
                fee:           plan.fee,
                net_amount:    plan.net_amount,
                wallet:        wallet.clone(),
                status:        plan.status,
                created_at:    now,
                resolved_at:   plan.status.is_terminal().then_some(now),
            };
            tx.insert_withdrawal(&request)?;
            tx.append_event(
                &LedgerEvent::WithdrawalRequested {
                    user_id: request.user_id.clone(),
                    withdrawal_id: request.withdrawal_id.clone(),
                    amount: request.amount,
                    fee: request.fee,
                    status: request.status,
                },
                now,
            )?;
            Ok(request)
        })?;

        log::info!(
            "Withdrawal {} for {user_id}: {} (fee {}) -> {}",
            request.withdrawal_id,
            request.amount,
            request.fee,
            request.status.as_str()
        );
        Ok(request)
    }

    /// Approve or reject a pending request. Rejection refunds the debit.
    pub fn admin_resolve(&self, withdrawal_id: &str, decision: Resolution) -> LedgerResult<WithdrawalRequest> {
        let now = self.now();
        let result = self.store.write("admin_resolve", |tx| {
            let request = tx.require_withdrawal(withdrawal_id)?;
            let policy = tx.policy()?;
            let effect = WithdrawalProcessor::resolve(&request, decision, &policy)?;
            Self::apply_resolution(tx, request, effect, now)
        });

        match &result {
            Ok(r) => log::info!("Withdrawal {withdrawal_id} {}", r.status.as_str()),
            Err(e @ LedgerError::AlreadyResolved { .. }) | Err(e @ LedgerError::InsufficientReserve { .. }) => {
                log::warn!("Cannot {decision:?} withdrawal {withdrawal_id}: {e}");
            }
            Err(_) => {}
        }
        result
    }

    /// Approve pending requests oldest first while the reserve covers them.
    /// Requests the reserve cannot cover stay pending.
    pub fn approve_all_pending(&self) -> LedgerResult<Vec<WithdrawalRequest>> {
        let now = self.now();
        let approved = self.store.write("approve_all_pending", |tx| {
            let mut policy = tx.policy()?;
            let mut approved = Vec::new();
            for request in tx.withdrawals_with_status(WithdrawalStatus::Pending)? {
                let effect = match WithdrawalProcessor::resolve(&request, Resolution::Approve, &policy) {
                    Ok(effect) => effect,
                    Err(LedgerError::InsufficientReserve { .. }) => {
                        log::debug!("Reserve cannot cover {}; leaving pending", request.withdrawal_id);
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if let (Some(reserve), Some(debit)) = (policy.central_reserve, effect.reserve_debit) {
                    policy.central_reserve = reserve.checked_sub(debit);
                }
                approved.push(Self::apply_resolution(tx, request, effect, now)?);
            }
            Ok(approved)
        })?;
        log::info!("Bulk approval: {} withdrawal(s) approved", approved.len());
        Ok(approved)
    }

    fn apply_resolution(
        tx: &LedgerTx<'_>,
        mut request: WithdrawalRequest,
        effect: ResolutionEffect,
        now: DateTime<Utc>,
    ) -> LedgerResult<WithdrawalRequest> {
        if !tx.resolve_withdrawal(&request.withdrawal_id, effect.status, now)? {
            return Err(LedgerError::AlreadyResolved {
                id: request.withdrawal_id.clone(),
                status: request.status.as_str().to_string(),
            });
        }
        if !effect.refund.is_zero() {
            tx.refund_balance(&request.user_id, effect.refund)?;
        }
        if let Some(debit) = effect.reserve_debit {
            tx.debit_reserve(debit)?;
        }
        request.status = effect.status;
        request.resolved_at = Some(now);

        tx.append_event(
            &LedgerEvent::WithdrawalResolved {
                user_id: request.user_id.clone(),
                withdrawal_id: request.withdrawal_id.clone(),
                status: request.status,
                refunded: effect.refund,
            },
            now,
        )?;
        Ok(request)
    }

    pub fn list_pending(&self) -> LedgerResult<Vec<WithdrawalRequest>> {
        self.store.read("list_pending", |tx| tx.withdrawals_with_status(WithdrawalStatus::Pending))
    }

    pub fn withdrawal(&self, withdrawal_id: &str) -> LedgerResult<WithdrawalRequest> {
        self.store.read("withdrawal", |tx| tx.require_withdrawal(withdrawal_id))
    }

    /// A user's withdrawals, newest first.
    pub fn withdrawal_history(&self, user_id: &str) -> LedgerResult<Vec<WithdrawalRequest>> {
        self.store.read("withdrawal_history", |tx| {
            tx.require_account(user_id)?;
            tx.withdrawals_for_user(user_id)
        })
    }

    // ── Policy ─────────────────────────────────────────────────

    pub fn policy(&self) -> LedgerResult<PolicySnapshot> {
        self.store.read("policy", |tx| tx.policy())
    }

    pub fn update_policy(&self, update: &PolicyUpdate) -> LedgerResult<PolicySnapshot> {
        let now = self.now();
        let policy = self.store.write("update_policy", |tx| {
            let mut policy = tx.policy()?;
            if update.is_empty() {
                return Ok(policy);
            }
            update.apply(&mut policy);
            tx.save_policy(&policy)?;
            tx.append_event(&LedgerEvent::PolicyUpdated { policy: policy.clone() }, now)?;
            Ok(policy)
        })?;
        log::info!("Policy updated: {policy:?}");
        Ok(policy)
    }

    // ── Audit ──────────────────────────────────────────────────

    /// Audit trail, optionally restricted to one user.
    pub fn events(&self, user_id: Option<&str>) -> LedgerResult<Vec<EventLogEntry>> {
        self.store.read("events", |tx| tx.events(user_id))
    }
}
