use super::LedgerTx;
use crate::{
    config::PolicySnapshot,
    error::{LedgerError, LedgerResult},
    types::Amount,
};
use chrono::NaiveDate;
use rusqlite::params;

const DATE_FORMAT: &str = "%Y-%m-%d";

impl LedgerTx<'_> {
    // ── Policy ────────────────────────────────────────────────────

    /// The single policy row. Migration seeds it, so it always exists.
    pub fn policy(&self) -> LedgerResult<PolicySnapshot> {
        let (rate, fee, date, reserve): (Option<i64>, i64, Option<String>, Option<i64>) =
            self.conn().query_row(
                "SELECT reward_rate_per_grant, withdraw_fee, auto_approve_date, central_reserve
                 FROM policy WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let auto_approve_date = date
            .map(|d| {
                NaiveDate::parse_from_str(&d, DATE_FORMAT)
                    .map_err(|e| anyhow::anyhow!("Bad auto_approve_date '{d}' in policy: {e}"))
            })
            .transpose()?;

        Ok(PolicySnapshot {
            reward_rate_per_grant: rate.map(Amount::from_sql),
            withdraw_fee: Amount::from_sql(fee),
            auto_approve_date,
            central_reserve: reserve.map(Amount::from_sql),
        })
    }

    pub fn save_policy(&self, p: &PolicySnapshot) -> LedgerResult<()> {
        self.conn().execute(
            "UPDATE policy
             SET reward_rate_per_grant = ?1, withdraw_fee = ?2,
                 auto_approve_date = ?3, central_reserve = ?4
             WHERE id = 1",
            params![
                p.reward_rate_per_grant.map(Amount::to_sql).transpose()?,
                p.withdraw_fee.to_sql()?,
                p.auto_approve_date.map(|d| d.format(DATE_FORMAT).to_string()),
                p.central_reserve.map(Amount::to_sql).transpose()?,
            ],
        )?;
        Ok(())
    }

    /// Take `amount` out of the central reserve. Never overdraws it.
    pub fn debit_reserve(&self, amount: Amount) -> LedgerResult<()> {
        let updated = self.conn().execute(
            "UPDATE policy SET central_reserve = central_reserve - ?1
             WHERE id = 1 AND central_reserve IS NOT NULL AND central_reserve >= ?1",
            params![amount.to_sql()?],
        )?;
        if updated != 1 {
            let available = self.policy()?.central_reserve.unwrap_or(Amount::ZERO);
            return Err(LedgerError::InsufficientReserve { requested: amount, available });
        }
        Ok(())
    }
}
