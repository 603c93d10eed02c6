//! hashledger-core: the balance-accrual and withdrawal ledger.
//!
//! Users earn through time-boxed grants, settle accrued value into their
//! balance, and withdraw it subject to a fee and an admin auto-approval
//! policy. Authentication, signup and payout transfer live elsewhere and
//! talk to this crate through `Ledger` or `LedgerCommand`.

pub mod account;
pub mod accrual;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod ledger;
pub mod store;
pub mod types;
pub mod withdrawal;

pub use account::{Account, AccountSummary};
pub use accrual::{AccrualEngine, Grant, GrantStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::LedgerCommand;
pub use config::{LedgerConfig, PolicySnapshot, PolicyUpdate};
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use ledger::{Ledger, Settlement};
pub use types::Amount;
pub use withdrawal::{Resolution, WithdrawalAmount, WithdrawalRequest, WithdrawalStatus};
