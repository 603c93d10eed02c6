use super::{ts, LedgerTx};
use crate::{
    accrual::Grant,
    error::LedgerResult,
    types::{Amount, UserId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use std::collections::HashMap;

fn grant_from_row(row: &Row<'_>) -> rusqlite::Result<Grant> {
    Ok(Grant {
        grant_id:   row.get(0)?,
        user_id:    row.get(1)?,
        rate:       Amount::from_sql(row.get(2)?),
        source:     row.get(3)?,
        issued_at:  ts(row.get(4)?),
        expires_at: ts(row.get(5)?),
    })
}

impl LedgerTx<'_> {
    // ── Grants ────────────────────────────────────────────────────

    pub fn insert_grant(&self, g: &Grant) -> LedgerResult<()> {
        self.conn().execute(
            "INSERT INTO earning_grant (grant_id, user_id, rate, source, issued_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &g.grant_id,
                &g.user_id,
                g.rate.to_sql()?,
                &g.source,
                g.issued_at.timestamp(),
                g.expires_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Grants that can still contribute to a settlement over
    /// `(since, until]`: issued by `until` and not expired by `since`.
    pub fn grants_for_settlement(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> LedgerResult<Vec<Grant>> {
        let mut stmt = self.conn().prepare(
            "SELECT grant_id, user_id, rate, source, issued_at, expires_at
             FROM earning_grant
             WHERE user_id = ?1 AND issued_at <= ?2 AND expires_at > ?3
             ORDER BY issued_at ASC",
        )?;
        let rows = stmt.query_map(
            params![user_id, until.timestamp(), since.timestamp()],
            grant_from_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Grants active at `now`, newest first.
    pub fn active_grants(&self, user_id: &str, now: DateTime<Utc>) -> LedgerResult<Vec<Grant>> {
        let mut stmt = self.conn().prepare(
            "SELECT grant_id, user_id, rate, source, issued_at, expires_at
             FROM earning_grant
             WHERE user_id = ?1 AND issued_at <= ?2 AND expires_at > ?2
             ORDER BY issued_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id, now.timestamp()], grant_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Sum of active grant rates per user at `now`. Summed here rather than
    /// in SQL, where SUM() errors on i64 overflow.
    pub fn active_rates(&self, now: DateTime<Utc>) -> LedgerResult<HashMap<UserId, Amount>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, rate
             FROM earning_grant
             WHERE issued_at <= ?1 AND expires_at > ?1",
        )?;
        let rows = stmt.query_map(params![now.timestamp()], |row| {
            Ok((row.get::<_, String>(0)?, Amount::from_sql(row.get(1)?)))
        })?;

        let mut rates: HashMap<UserId, Amount> = HashMap::new();
        for row in rows {
            let (user_id, rate) = row?;
            let total = rates.entry(user_id).or_insert(Amount::ZERO);
            *total = total.saturating_add(rate);
        }
        Ok(rates)
    }

    /// Delete grants that expired at or before their account's last
    /// settlement. They can never contribute again.
    pub fn purge_settled_grants(&self) -> LedgerResult<usize> {
        let removed = self.conn().execute(
            "DELETE FROM earning_grant
             WHERE expires_at <= (
                 SELECT a.last_settled_at FROM account a
                 WHERE a.user_id = earning_grant.user_id
             )",
            [],
        )?;
        Ok(removed)
    }
}
