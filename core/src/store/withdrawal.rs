use super::{ts, LedgerTx};
use crate::{
    error::{LedgerError, LedgerResult},
    types::Amount,
    withdrawal::{WithdrawalRequest, WithdrawalStatus},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const WITHDRAWAL_COLUMNS: &str = "withdrawal_id, user_id, amount, fee, net_amount, wallet,
     status, created_at, resolved_at";

fn withdrawal_from_row(row: &Row<'_>) -> rusqlite::Result<WithdrawalRequest> {
    let status: String = row.get(6)?;
    let status = WithdrawalStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown withdrawal status '{status}'").into(),
        )
    })?;
    Ok(WithdrawalRequest {
        withdrawal_id: row.get(0)?,
        user_id:       row.get(1)?,
        amount:        Amount::from_sql(row.get(2)?),
        fee:           Amount::from_sql(row.get(3)?),
        net_amount:    Amount::from_sql(row.get(4)?),
        wallet:        row.get(5)?,
        status,
        created_at:    ts(row.get(7)?),
        resolved_at:   row.get::<_, Option<i64>>(8)?.map(ts),
    })
}

impl LedgerTx<'_> {
    // ── Withdrawals ───────────────────────────────────────────────

    pub fn insert_withdrawal(&self, w: &WithdrawalRequest) -> LedgerResult<()> {
        self.conn().execute(
            "INSERT INTO withdrawal_request (
                withdrawal_id, user_id, amount, fee, net_amount, wallet,
                status, created_at, resolved_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &w.withdrawal_id,
                &w.user_id,
                w.amount.to_sql()?,
                w.fee.to_sql()?,
                w.net_amount.to_sql()?,
                &w.wallet,
                w.status.as_str(),
                w.created_at.timestamp(),
                w.resolved_at.map(|t| t.timestamp()),
            ],
        )?;
        Ok(())
    }

    pub fn withdrawal(&self, withdrawal_id: &str) -> LedgerResult<Option<WithdrawalRequest>> {
        let w = self
            .conn()
            .query_row(
                &format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawal_request WHERE withdrawal_id = ?1"),
                params![withdrawal_id],
                withdrawal_from_row,
            )
            .optional()?;
        Ok(w)
    }

    pub fn require_withdrawal(&self, withdrawal_id: &str) -> LedgerResult<WithdrawalRequest> {
        self.withdrawal(withdrawal_id)?
            .ok_or_else(|| LedgerError::NotFound { id: withdrawal_id.to_string() })
    }

    /// Requests in a given status, oldest first.
    pub fn withdrawals_with_status(&self, status: WithdrawalStatus) -> LedgerResult<Vec<WithdrawalRequest>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawal_request
             WHERE status = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![status.as_str()], withdrawal_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// A user's requests, newest first.
    pub fn withdrawals_for_user(&self, user_id: &str) -> LedgerResult<Vec<WithdrawalRequest>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawal_request
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![user_id], withdrawal_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Move a pending request to a terminal status. Returns false if the
    /// request was no longer pending, so each transition happens once.
    pub fn resolve_withdrawal(
        &self,
        withdrawal_id: &str,
        status: WithdrawalStatus,
        at: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let updated = self.conn().execute(
            "UPDATE withdrawal_request SET status = ?1, resolved_at = ?2
             WHERE withdrawal_id = ?3 AND status = 'pending'",
            params![status.as_str(), at.timestamp(), withdrawal_id],
        )?;
        Ok(updated == 1)
    }
}
