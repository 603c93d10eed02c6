use super::{ts, LedgerTx};
use crate::{
    account::Account,
    error::{LedgerError, LedgerResult},
    types::Amount,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const ACCOUNT_COLUMNS: &str = "user_id, balance, total_earned, total_withdrawn, accrual_carry,
     last_settled_at, utc_offset_minutes, suspended, deleted, created_at";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        user_id:            row.get(0)?,
        balance:            Amount::from_sql(row.get(1)?),
        total_earned:       Amount::from_sql(row.get(2)?),
        total_withdrawn:    Amount::from_sql(row.get(3)?),
        accrual_carry:      row.get::<_, i64>(4)?.max(0) as u64,
        last_settled_at:    ts(row.get(5)?),
        utc_offset_minutes: row.get(6)?,
        suspended:          row.get::<_, i32>(7)? != 0,
        deleted:            row.get::<_, i32>(8)? != 0,
        created_at:         ts(row.get(9)?),
    })
}

impl LedgerTx<'_> {
    // ── Account ───────────────────────────────────────────────────

    /// Insert a new account. Returns false if the user id is taken.
    pub fn insert_account(&self, a: &Account) -> LedgerResult<bool> {
        let inserted = self.conn().execute(
            "INSERT INTO account (
                user_id, balance, total_earned, total_withdrawn, accrual_carry,
                last_settled_at, utc_offset_minutes, suspended, deleted, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(user_id) DO NOTHING",
            params![
                &a.user_id,
                a.balance.to_sql()?,
                a.total_earned.to_sql()?,
                a.total_withdrawn.to_sql()?,
                a.accrual_carry as i64,
                a.last_settled_at.timestamp(),
                a.utc_offset_minutes,
                if a.suspended { 1 } else { 0 },
                if a.deleted { 1 } else { 0 },
                a.created_at.timestamp(),
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn account(&self, user_id: &str) -> LedgerResult<Option<Account>> {
        let account = self
            .conn()
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE user_id = ?1"),
                params![user_id],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    /// Like `account`, but a missing row is `UserNotFound`.
    pub fn require_account(&self, user_id: &str) -> LedgerResult<Account> {
        self.account(user_id)?
            .ok_or_else(|| LedgerError::UserNotFound { user_id: user_id.to_string() })
    }

    /// All accounts, optionally including soft-deleted ones.
    pub fn all_accounts(&self, include_deleted: bool) -> LedgerResult<Vec<Account>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account
             WHERE ?1 = 1 OR deleted = 0
             ORDER BY user_id ASC"
        ))?;
        let rows = stmt.query_map(params![if include_deleted { 1 } else { 0 }], account_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Apply a settlement: credit `earned`, store the carry, move the
    /// settlement point.
    pub fn apply_settlement(
        &self,
        user_id: &str,
        earned: Amount,
        carry: u64,
        settled_at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.conn().execute(
            "UPDATE account
             SET balance = balance + ?1,
                 total_earned = total_earned + ?1,
                 accrual_carry = ?2,
                 last_settled_at = ?3
             WHERE user_id = ?4",
            params![earned.to_sql()?, carry as i64, settled_at.timestamp(), user_id],
        )?;
        Ok(())
    }

    /// Debit a withdrawal. Refuses to take the balance below zero.
    pub fn debit_balance(&self, user_id: &str, amount: Amount) -> LedgerResult<()> {
        let updated = self.conn().execute(
            "UPDATE account
             SET balance = balance - ?1,
                 total_withdrawn = total_withdrawn + ?1
             WHERE user_id = ?2 AND balance >= ?1",
            params![amount.to_sql()?, user_id],
        )?;
        if updated != 1 {
            let available = self.require_account(user_id)?.balance;
            return Err(LedgerError::InsufficientBalance { requested: amount, available });
        }
        Ok(())
    }

    /// Return a rejected withdrawal's amount to the balance.
    pub fn refund_balance(&self, user_id: &str, amount: Amount) -> LedgerResult<()> {
        self.require_account(user_id)?
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow { what: "balance" })?;
        self.conn().execute(
            "UPDATE account
             SET balance = balance + ?1,
                 total_withdrawn = MAX(total_withdrawn - ?1, 0)
             WHERE user_id = ?2",
            params![amount.to_sql()?, user_id],
        )?;
        Ok(())
    }

    pub fn set_account_flags(&self, user_id: &str, suspended: bool, deleted: bool) -> LedgerResult<()> {
        self.conn().execute(
            "UPDATE account SET suspended = ?1, deleted = ?2 WHERE user_id = ?3",
            params![if suspended { 1 } else { 0 }, if deleted { 1 } else { 0 }, user_id],
        )?;
        Ok(())
    }
}
