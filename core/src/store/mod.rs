//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The ledger calls LedgerTx methods; it never executes SQL directly.
//!
//! Every operation runs inside one transaction on one pooled connection.
//! Writers use BEGIN IMMEDIATE, which takes SQLite's write lock before the
//! first read: the equivalent of SELECT ... FOR UPDATE on every row touched.
//! That makes all mutating operations linearizable, per user and for the
//! shared central reserve alike.

use crate::{
    clock::from_unix,
    config::LedgerConfig,
    error::{LedgerError, LedgerResult},
    event::{EventLogEntry, LedgerEvent},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, Transaction, TransactionBehavior};
use std::time::Duration;

mod account;
mod grant;
mod policy;
mod pool;
mod withdrawal;

use pool::ConnectionPool;

pub struct LedgerStore {
    pool:          ConnectionPool,
    max_retries:   u32,
    retry_backoff: Duration,
}

/// An open transaction. Dropping it without commit rolls back.
pub struct LedgerTx<'c> {
    tx: Transaction<'c>,
}

impl LedgerStore {
    /// Open the database named by `config`, creating it if needed.
    /// Call `migrate()` before first use.
    pub fn open(config: &LedgerConfig) -> LedgerResult<Self> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let connections = if config.is_in_memory() {
            // Each :memory: connection is a separate database; keep exactly one.
            let conn = Connection::open_in_memory()?;
            conn.execute_batch("PRAGMA foreign_keys=ON;")?;
            vec![conn]
        } else {
            (0..config.pool_size)
                .map(|_| Self::open_file(&config.database_path, busy_timeout))
                .collect::<LedgerResult<Vec<_>>>()?
        };
        log::debug!(
            "Opened ledger store at {} with {} connection(s)",
            config.database_path,
            connections.len()
        );
        Ok(Self {
            pool: ConnectionPool::new(connections, Duration::from_millis(config.checkout_timeout_ms)),
            max_retries: config.max_retries.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> LedgerResult<Self> {
        Self::open(&LedgerConfig::default_test())
    }

    fn open_file(path: &str, busy_timeout: Duration) -> LedgerResult<Connection> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode: readers never block the single writer.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(busy_timeout)?;
        Ok(conn)
    }

    /// Apply all schema migrations in order. Idempotent.
    pub fn migrate(&self) -> LedgerResult<()> {
        let conn = self.pool.checkout()?;
        conn.execute_batch(include_str!("../../../migrations/001_ledger.sql"))?;
        Ok(())
    }

    /// Run `f` in a write transaction, retrying on lock contention.
    ///
    /// `f` may run more than once; it must not have side effects outside
    /// the transaction.
    pub fn write<T, F>(&self, op: &str, mut f: F) -> LedgerResult<T>
    where
        F: FnMut(&LedgerTx<'_>) -> LedgerResult<T>,
    {
        self.with_retry(op, TransactionBehavior::Immediate, &mut f)
    }

    /// Run `f` in a read transaction for a consistent snapshot.
    pub fn read<T, F>(&self, op: &str, mut f: F) -> LedgerResult<T>
    where
        F: FnMut(&LedgerTx<'_>) -> LedgerResult<T>,
    {
        self.with_retry(op, TransactionBehavior::Deferred, &mut f)
    }

    fn with_retry<T, F>(&self, op: &str, behavior: TransactionBehavior, f: &mut F) -> LedgerResult<T>
    where
        F: FnMut(&LedgerTx<'_>) -> LedgerResult<T>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.run_once(behavior, f) {
                Err(e) if e.is_busy() && attempt < self.max_retries => {
                    log::debug!("{op}: store busy on attempt {attempt}, retrying");
                    std::thread::sleep(self.retry_backoff * attempt);
                }
                Err(e) if e.is_busy() => {
                    log::warn!("{op}: store still busy after {attempt} attempts: {e}");
                    return Err(LedgerError::Conflict { attempts: attempt });
                }
                other => return other,
            }
        }
    }

    fn run_once<T, F>(&self, behavior: TransactionBehavior, f: &mut F) -> LedgerResult<T>
    where
        F: FnMut(&LedgerTx<'_>) -> LedgerResult<T>,
    {
        let mut conn = self.pool.checkout()?;
        let tx = LedgerTx { tx: conn.transaction_with_behavior(behavior)? };
        let value = f(&tx)?;
        tx.tx.commit()?;
        Ok(value)
    }
}

impl LedgerTx<'_> {
    fn conn(&self) -> &Connection {
        &self.tx
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, event: &LedgerEvent, at: DateTime<Utc>) -> LedgerResult<()> {
        self.conn().execute(
            "INSERT INTO event_log (user_id, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.user_id(),
                event.type_name(),
                serde_json::to_string(event)?,
                at.timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Events in insertion order, optionally for one user.
    pub fn events(&self, user_id: Option<&str>) -> LedgerResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, user_id, event_type, payload, created_at
             FROM event_log
             WHERE ?1 IS NULL OR user_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![user_id], |row| {
                Ok(EventLogEntry {
                    id:         Some(row.get(0)?),
                    user_id:    row.get(1)?,
                    event_type: row.get(2)?,
                    payload:    row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

/// Stored unix seconds → timestamp, for row mappers.
pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
    from_unix(secs)
}
