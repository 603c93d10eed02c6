//! ledger-admin: operator CLI for the hashledger ledger.
//!
//! Usage:
//!   ledger-admin --db ledger.db init
//!   ledger-admin --db ledger.db grant alice
//!   ledger-admin --db ledger.db withdraw alice max --wallet 0xabc
//!   ledger-admin --config ledger.json serve < requests.jsonl

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use hashledger_core::{
    command::error_response, Amount, Ledger, LedgerCommand, LedgerConfig, Resolution, SystemClock,
    WithdrawalAmount,
};
use std::io::{self, BufRead, Write};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ledger-admin", about = "Balance accrual and withdrawal ledger admin tool")]
struct Cli {
    /// JSON configuration file. Missing fields take their defaults.
    #[arg(long, env = "LEDGER_CONFIG")]
    config: Option<String>,

    /// Database path; overrides the config file.
    #[arg(long, env = "LEDGER_DB")]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and apply migrations.
    Init,
    /// Open a ledger account for a user.
    OpenAccount {
        user_id: String,
        /// Fixed offset of the user's local time from UTC, in minutes.
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        utc_offset: i32,
    },
    /// Issue an earning grant at the current policy rate.
    Grant {
        user_id: String,
        #[arg(long, default_value = "ad_view")]
        source: String,
    },
    /// Settle accrued earnings into the balance.
    Settle { user_id: String },
    /// Request a withdrawal of an exact amount or "max".
    Withdraw {
        user_id: String,
        amount: WithdrawalAmount,
        #[arg(long)]
        wallet: String,
    },
    /// Approve or reject a pending withdrawal.
    Resolve {
        withdrawal_id: String,
        #[arg(value_enum)]
        decision: Decision,
    },
    /// Approve every pending withdrawal the reserve covers.
    ApproveAll,
    /// List pending withdrawals, oldest first.
    Pending,
    /// A user's withdrawal history, newest first.
    History { user_id: String },
    /// Settled summaries of all accounts.
    Accounts,
    /// Show the admin policy.
    Policy,
    /// Change admin policy fields. Unset flags leave a field unchanged.
    SetPolicy {
        #[arg(long)]
        reward_rate: Option<Amount>,
        #[arg(long)]
        withdraw_fee: Option<Amount>,
        /// Auto-approval day, YYYY-MM-DD.
        #[arg(long, conflicts_with = "clear_auto_approve_date")]
        auto_approve_date: Option<NaiveDate>,
        #[arg(long)]
        clear_auto_approve_date: bool,
        #[arg(long, conflicts_with = "clear_central_reserve")]
        central_reserve: Option<Amount>,
        #[arg(long)]
        clear_central_reserve: bool,
    },
    /// Suspend an account. It keeps settling but cannot earn or withdraw.
    Suspend { user_id: String },
    /// Clear the suspended and deleted flags.
    Restore { user_id: String },
    /// Soft delete an account.
    Delete { user_id: String },
    /// Remove grants that expired before their account's last settlement.
    PurgeGrants,
    /// Read one JSON command per line on stdin, answer one per line on stdout.
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum Decision {
    Approve,
    Reject,
}

impl From<Decision> for Resolution {
    fn from(d: Decision) -> Self {
        match d {
            Decision::Approve => Resolution::Approve,
            Decision::Reject => Resolution::Reject,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => LedgerConfig::load(path)?,
        None => LedgerConfig::default(),
    };
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    let ledger = Ledger::open(&config, Arc::new(SystemClock))?;

    if let Command::Serve = cli.command {
        return run_serve_loop(&ledger);
    }
    let Some(command) = to_ledger_command(cli.command) else {
        println!("Ledger ready at {}", config.database_path);
        return Ok(());
    };

    let result = ledger.dispatch(&command)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Map a one-shot subcommand onto the ledger's request type.
/// `init` and `serve` are not ledger requests and map to None.
fn to_ledger_command(command: Command) -> Option<LedgerCommand> {
    let command = match command {
        Command::OpenAccount { user_id, utc_offset } => {
            LedgerCommand::OpenAccount { user_id, utc_offset_minutes: utc_offset }
        }
        Command::Grant { user_id, source } => LedgerCommand::GrantReward { user_id, source },
        Command::Settle { user_id } => LedgerCommand::Settle { user_id },
        Command::Withdraw { user_id, amount, wallet } => {
            LedgerCommand::RequestWithdrawal { user_id, amount, wallet }
        }
        Command::Resolve { withdrawal_id, decision } => {
            LedgerCommand::AdminResolve { withdrawal_id, decision: decision.into() }
        }
        Command::ApproveAll => LedgerCommand::ApproveAllPending,
        Command::Pending => LedgerCommand::ListPending,
        Command::History { user_id } => LedgerCommand::WithdrawalHistory { user_id },
        Command::Accounts => LedgerCommand::ListAccounts,
        Command::Policy => LedgerCommand::Policy,
        Command::SetPolicy {
            reward_rate,
            withdraw_fee,
            auto_approve_date,
            clear_auto_approve_date,
            central_reserve,
            clear_central_reserve,
        } => LedgerCommand::UpdatePolicy {
            reward_rate_per_grant: reward_rate,
            withdraw_fee,
            auto_approve_date,
            clear_auto_approve_date,
            central_reserve,
            clear_central_reserve,
        },
        Command::Suspend { user_id } => LedgerCommand::Suspend { user_id },
        Command::Restore { user_id } => LedgerCommand::Restore { user_id },
        Command::Delete { user_id } => LedgerCommand::SoftDelete { user_id },
        Command::PurgeGrants => LedgerCommand::PurgeExpiredGrants,
        Command::Init | Command::Serve => return None,
    };
    Some(command)
}

fn run_serve_loop(ledger: &Ledger) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    log::info!("Serving ledger commands on stdin");

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        let line = buffer.trim();
        if line.is_empty() {
            continue;
        }

        let response = match LedgerCommand::parse(line) {
            Ok(command) => ledger.respond(&command),
            Err(e) => error_response(&e),
        };
        if let Some(false) = response.get("ok").and_then(|v| v.as_bool()) {
            log::debug!("Request failed: {response}");
        }
        writeln!(stdout, "{response}")?;
        stdout.flush()?;
    }
    Ok(())
}
