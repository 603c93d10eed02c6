//! JSON command surface: parsing, dispatch and response envelopes.

use chrono::Duration;
use hashledger_core::{Ledger, LedgerCommand, ManualClock};
use serde_json::{json, Value};
use std::sync::Arc;

/// 2024-05-10 00:00:00 UTC.
const T0: i64 = 1_715_299_200;

fn run(ledger: &Ledger, line: Value) -> Value {
    let command = LedgerCommand::parse(&line.to_string()).unwrap();
    ledger.respond(&command)
}

/// The full earn-and-withdraw flow driven only through commands.
#[test]
fn earn_and_withdraw_over_commands() {
    let clock = Arc::new(ManualClock::at_unix(T0));
    let ledger = Ledger::build_test(clock.clone()).unwrap();

    let r = run(&ledger, json!({"cmd": "update_policy", "reward_rate_per_grant": "100", "withdraw_fee": "5"}));
    assert_eq!(r["ok"], true);
    assert_eq!(r["result"]["withdraw_fee"], "5.00000000");

    assert_eq!(run(&ledger, json!({"cmd": "open_account", "user_id": "u1"}))["ok"], true);
    let grant = run(&ledger, json!({"cmd": "grant_reward", "user_id": "u1"}));
    assert_eq!(grant["result"]["source"], "ad_view");
    assert_eq!(grant["result"]["rate"], "100.00000000");

    clock.advance(Duration::hours(12));
    let settled = run(&ledger, json!({"cmd": "settle", "user_id": "u1"}));
    assert_eq!(settled["result"]["earned"], "50.00000000");

    let request = run(
        &ledger,
        json!({"cmd": "request_withdrawal", "user_id": "u1", "amount": "MAX", "wallet": "w-1"}),
    );
    assert_eq!(request["ok"], true);
    assert_eq!(request["result"]["net_amount"], "45.00000000");
    assert_eq!(request["result"]["status"], "pending");

    let id = request["result"]["withdrawal_id"].as_str().unwrap().to_string();
    let resolved = run(&ledger, json!({"cmd": "admin_resolve", "withdrawal_id": id, "decision": "reject"}));
    assert_eq!(resolved["result"]["status"], "rejected");

    let account = run(&ledger, json!({"cmd": "account", "user_id": "u1"}));
    assert_eq!(account["result"]["balance"], "50.00000000");

    let lookup = run(&ledger, json!({"cmd": "withdrawal", "withdrawal_id": id}));
    assert_eq!(lookup["result"]["status"], "rejected");

    let events = run(&ledger, json!({"cmd": "events", "user_id": "u1"}));
    let types: Vec<_> = events["result"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_type"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        types,
        vec!["account_opened", "grant_issued", "settled", "withdrawal_requested", "withdrawal_resolved"]
    );
}

/// Failures come back as envelopes carrying the error kind.
#[test]
fn errors_are_classified() {
    let clock = Arc::new(ManualClock::at_unix(T0));
    let ledger = Ledger::build_test(clock).unwrap();
    run(&ledger, json!({"cmd": "open_account", "user_id": "u1"}));

    let missing = run(&ledger, json!({"cmd": "grant_reward", "user_id": "u1"}));
    assert_eq!(missing["ok"], false);
    assert_eq!(missing["kind"], "configuration");

    let unknown = run(&ledger, json!({"cmd": "settle", "user_id": "ghost"}));
    assert_eq!(unknown["kind"], "state");

    let zero = run(
        &ledger,
        json!({"cmd": "request_withdrawal", "user_id": "u1", "amount": "0", "wallet": "w"}),
    );
    assert_eq!(zero["kind"], "validation");
}

/// Setting and clearing the same nullable field in one update is refused.
#[test]
fn conflicting_policy_update_is_invalid() {
    let clock = Arc::new(ManualClock::at_unix(T0));
    let ledger = Ledger::build_test(clock).unwrap();

    let r = run(
        &ledger,
        json!({"cmd": "update_policy", "central_reserve": "10", "clear_central_reserve": true}),
    );
    assert_eq!(r["ok"], false);
    assert_eq!(r["kind"], "validation");

    let r = run(&ledger, json!({"cmd": "update_policy", "auto_approve_date": "2024-05-10"}));
    assert_eq!(r["result"]["auto_approve_date"], "2024-05-10");
    let r = run(&ledger, json!({"cmd": "update_policy", "clear_auto_approve_date": true}));
    assert_eq!(r["result"]["auto_approve_date"], Value::Null);
}

#[test]
fn malformed_lines_are_rejected() {
    assert!(LedgerCommand::parse("not json").is_err());
    assert!(LedgerCommand::parse(r#"{"cmd": "no_such_command"}"#).is_err());
    assert!(LedgerCommand::parse(r#"{"cmd": "request_withdrawal", "user_id": "u1", "amount": "-3", "wallet": "w"}"#).is_err());
    assert!(matches!(
        LedgerCommand::parse(r#"{"cmd": "list_pending"}"#),
        Ok(LedgerCommand::ListPending)
    ));
}
