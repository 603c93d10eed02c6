//! Withdrawal requests: validation, debit, fees and auto-approval.

use chrono::{Duration, NaiveDate};
use hashledger_core::{
    Amount, Ledger, LedgerError, ManualClock, PolicyUpdate, Resolution, WithdrawalAmount,
    WithdrawalStatus,
};
use std::sync::Arc;

/// 2024-05-10 00:00:00 UTC.
const T0: i64 = 1_715_299_200;

/// The UTC date `funded()` leaves the clock on.
fn funded_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 11).unwrap()
}

/// Ledger with rate 100/day and fee 5; "u1" has settled one full grant
/// (100) and the clock sits at 2024-05-11 00:00 UTC.
fn funded() -> (Ledger, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_unix(T0));
    let ledger = Ledger::build_test(clock.clone()).unwrap();
    ledger
        .update_policy(&PolicyUpdate {
            reward_rate_per_grant: Some(Amount::units(100)),
            withdraw_fee: Some(Amount::units(5)),
            ..Default::default()
        })
        .unwrap();
    ledger.open_account("u1", 0).unwrap();
    ledger.grant_reward("u1", "ad_view").unwrap();
    clock.advance(Duration::hours(12));
    ledger.settle("u1").unwrap();
    // Later withdrawals should not pick up more accrual from this grant.
    clock.advance(Duration::hours(12));
    ledger.settle("u1").unwrap();
    (ledger, clock)
}

fn set_auto_approval(ledger: &Ledger, date: NaiveDate, reserve: Amount) {
    ledger
        .update_policy(&PolicyUpdate {
            auto_approve_date: Some(Some(date)),
            central_reserve: Some(Some(reserve)),
            ..Default::default()
        })
        .unwrap();
}

/// Settle 50, withdraw MAX with fee 5: amount 50, net 45, pending,
/// balance 0. Rejecting restores the 50.
#[test]
fn max_withdrawal_then_reject_restores_balance() {
    let clock = Arc::new(ManualClock::at_unix(T0));
    let ledger = Ledger::build_test(clock.clone()).unwrap();
    ledger
        .update_policy(&PolicyUpdate {
            reward_rate_per_grant: Some(Amount::units(100)),
            withdraw_fee: Some(Amount::units(5)),
            ..Default::default()
        })
        .unwrap();
    ledger.open_account("u1", 0).unwrap();
    ledger.grant_reward("u1", "ad_view").unwrap();
    clock.advance(Duration::hours(12));
    assert_eq!(ledger.settle("u1").unwrap().account.balance, Amount::units(50));

    let request = ledger.request_withdrawal("u1", WithdrawalAmount::All, "wallet-1").unwrap();
    assert_eq!(request.amount, Amount::units(50));
    assert_eq!(request.fee, Amount::units(5));
    assert_eq!(request.net_amount, Amount::units(45));
    assert_eq!(request.status, WithdrawalStatus::Pending);
    assert!(request.resolved_at.is_none());

    let rejected = ledger.admin_resolve(&request.withdrawal_id, Resolution::Reject).unwrap();
    assert_eq!(rejected.status, WithdrawalStatus::Rejected);
    // No time has passed since the withdrawal, so nothing else accrued.
    assert_eq!(ledger.account("u1").unwrap().balance, Amount::units(50));
}

/// A withdrawal settles first, so the full elapsed accrual is withdrawable.
#[test]
fn withdrawal_settles_before_checking_balance() {
    let clock = Arc::new(ManualClock::at_unix(T0));
    let ledger = Ledger::build_test(clock.clone()).unwrap();
    ledger
        .update_policy(&PolicyUpdate {
            reward_rate_per_grant: Some(Amount::units(100)),
            ..Default::default()
        })
        .unwrap();
    ledger.open_account("u1", 0).unwrap();
    ledger.grant_reward("u1", "ad_view").unwrap();
    clock.advance(Duration::hours(24));

    let request = ledger.request_withdrawal("u1", WithdrawalAmount::All, "w").unwrap();
    assert_eq!(request.amount, Amount::units(100));
    assert_eq!(request.net_amount, Amount::units(100));
}

#[test]
fn exact_withdrawal_debits_immediately() {
    let (ledger, _clock) = funded();
    let request = ledger
        .request_withdrawal("u1", WithdrawalAmount::Exact(Amount::units(20)), "w")
        .unwrap();
    assert_eq!(request.net_amount, Amount::units(15));

    let account = ledger.account("u1").unwrap();
    assert_eq!(account.balance, Amount::units(80));
    assert_eq!(account.total_withdrawn, Amount::units(20));
    assert_eq!(account.total_earned, Amount::units(100));
}

#[test]
fn overdraw_is_insufficient_balance() {
    let (ledger, _clock) = funded();
    let err = ledger
        .request_withdrawal("u1", WithdrawalAmount::Exact(Amount::units(101)), "w")
        .unwrap_err();
    match err {
        LedgerError::InsufficientBalance { requested, available } => {
            assert_eq!(requested, Amount::units(101));
            assert_eq!(available, Amount::units(100));
        }
        other => panic!("expected InsufficientBalance, got {other:?}"),
    }
    assert_eq!(ledger.account("u1").unwrap().balance, Amount::units(100));
}

/// An amount that does not exceed the fee sends nothing and is refused.
#[test]
fn fee_swallowing_amount_is_rejected() {
    let (ledger, _clock) = funded();
    let err = ledger
        .request_withdrawal("u1", WithdrawalAmount::Exact(Amount::units(5)), "w")
        .unwrap_err();
    assert!(matches!(err, LedgerError::FeeExceedsAmount { .. }));

    let err = ledger
        .request_withdrawal("u1", WithdrawalAmount::Exact(Amount::units(3)), "w")
        .unwrap_err();
    assert!(matches!(err, LedgerError::FeeExceedsAmount { .. }));
}

#[test]
fn zero_amount_and_empty_wallet_are_invalid() {
    let (ledger, _clock) = funded();
    let err = ledger.request_withdrawal("u1", WithdrawalAmount::Exact(Amount::ZERO), "w").unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount { .. }));

    let err = ledger
        .request_withdrawal("u1", WithdrawalAmount::Exact(Amount::units(10)), "   ")
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount { .. }));
}

/// MAX on an empty balance has nothing to withdraw.
#[test]
fn max_on_empty_balance_is_invalid() {
    let clock = Arc::new(ManualClock::at_unix(T0));
    let ledger = Ledger::build_test(clock).unwrap();
    ledger.open_account("u1", 0).unwrap();

    let err = ledger.request_withdrawal("u1", WithdrawalAmount::All, "w").unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount { .. }));
}

/// On the auto-approval day a reserve of exactly the amount approves the
/// request and is drained to zero.
#[test]
fn auto_approves_when_reserve_covers_exactly() {
    let (ledger, _clock) = funded();
    set_auto_approval(&ledger, funded_day(), Amount::units(40));

    let request = ledger
        .request_withdrawal("u1", WithdrawalAmount::Exact(Amount::units(40)), "w")
        .unwrap();
    assert_eq!(request.status, WithdrawalStatus::Approved);
    assert!(request.resolved_at.is_some());
    assert_eq!(ledger.policy().unwrap().central_reserve, Some(Amount::ZERO));
    assert!(ledger.list_pending().unwrap().is_empty());
}

/// One raw unit short of the amount leaves the request pending and the
/// reserve untouched.
#[test]
fn reserve_one_unit_short_stays_pending() {
    let (ledger, _clock) = funded();
    let short = Amount::from_raw(Amount::units(40).raw() - 1);
    set_auto_approval(&ledger, funded_day(), short);

    let request = ledger
        .request_withdrawal("u1", WithdrawalAmount::Exact(Amount::units(40)), "w")
        .unwrap();
    assert_eq!(request.status, WithdrawalStatus::Pending);
    assert_eq!(ledger.policy().unwrap().central_reserve, Some(short));
}

/// Auto-approval only happens on the configured date.
#[test]
fn other_days_stay_pending() {
    let (ledger, _clock) = funded();
    set_auto_approval(&ledger, NaiveDate::from_ymd_opt(2024, 5, 12).unwrap(), Amount::units(1_000));

    let request = ledger
        .request_withdrawal("u1", WithdrawalAmount::Exact(Amount::units(40)), "w")
        .unwrap();
    assert_eq!(request.status, WithdrawalStatus::Pending);
}

/// The auto-approval date is compared in the user's own timezone.
#[test]
fn auto_approval_date_uses_user_local_time() {
    let clock = Arc::new(ManualClock::at_unix(T0));
    let ledger = Ledger::build_test(clock.clone()).unwrap();
    ledger
        .update_policy(&PolicyUpdate {
            reward_rate_per_grant: Some(Amount::units(100)),
            ..Default::default()
        })
        .unwrap();
    ledger.open_account("utc", 0).unwrap();
    ledger.open_account("sydney", 10 * 60).unwrap();
    ledger.grant_reward("utc", "ad_view").unwrap();
    ledger.grant_reward("sydney", "ad_view").unwrap();

    // 2024-05-10 15:00 UTC is already 2024-05-11 01:00 at UTC+10.
    clock.advance(Duration::hours(15));
    set_auto_approval(&ledger, NaiveDate::from_ymd_opt(2024, 5, 11).unwrap(), Amount::units(1_000));

    let utc = ledger.request_withdrawal("utc", WithdrawalAmount::Exact(Amount::units(10)), "w").unwrap();
    let sydney = ledger
        .request_withdrawal("sydney", WithdrawalAmount::Exact(Amount::units(10)), "w")
        .unwrap();
    assert_eq!(utc.status, WithdrawalStatus::Pending);
    assert_eq!(sydney.status, WithdrawalStatus::Approved);
}

/// Suspended and deleted users cannot withdraw.
#[test]
fn inactive_users_cannot_withdraw() {
    let (ledger, _clock) = funded();
    ledger.suspend("u1").unwrap();
    let err = ledger.request_withdrawal("u1", WithdrawalAmount::All, "w").unwrap_err();
    assert!(matches!(err, LedgerError::UserSuspended { .. }));

    ledger.soft_delete("u1").unwrap();
    let err = ledger.request_withdrawal("u1", WithdrawalAmount::All, "w").unwrap_err();
    assert!(matches!(err, LedgerError::UserDeleted { .. }));

    ledger.restore("u1").unwrap();
    assert!(ledger.request_withdrawal("u1", WithdrawalAmount::All, "w").is_ok());
}

/// History is newest first and includes every status.
#[test]
fn history_lists_newest_first() {
    let (ledger, clock) = funded();
    let first = ledger
        .request_withdrawal("u1", WithdrawalAmount::Exact(Amount::units(10)), "w")
        .unwrap();
    clock.advance(Duration::minutes(1));
    let second = ledger
        .request_withdrawal("u1", WithdrawalAmount::Exact(Amount::units(20)), "w")
        .unwrap();
    ledger.admin_resolve(&first.withdrawal_id, Resolution::Reject).unwrap();

    let history = ledger.withdrawal_history("u1").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].withdrawal_id, second.withdrawal_id);
    assert_eq!(history[1].status, WithdrawalStatus::Rejected);
}

/// Earned value is always either in the balance or withdrawn.
#[test]
fn value_is_conserved() {
    let (ledger, clock) = funded();
    let a = ledger
        .request_withdrawal("u1", WithdrawalAmount::Exact(Amount::units(30)), "w")
        .unwrap();
    ledger
        .request_withdrawal("u1", WithdrawalAmount::Exact(Amount::units(25)), "w")
        .unwrap();
    ledger.admin_resolve(&a.withdrawal_id, Resolution::Reject).unwrap();
    ledger.grant_reward("u1", "ad_view").unwrap();
    clock.advance(Duration::hours(7));

    let account = ledger.account("u1").unwrap();
    assert_eq!(
        account.total_earned.raw(),
        account.balance.raw() + account.total_withdrawn.raw()
    );
    assert_eq!(account.total_withdrawn, Amount::units(25));
}
