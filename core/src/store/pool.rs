//! Bounded SQLite connection pool.
//!
//! Connections are checked out for exactly one operation and returned when
//! the guard drops, including on early return or panic unwind.
//!
//! Each connection lives in its own slot; the idle list holds slot indexes.
//! A checked-out slot is locked by its guard, so only one operation ever
//! touches a connection at a time.

use crate::error::{LedgerError, LedgerResult};
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

pub(crate) struct ConnectionPool {
    slots:            Vec<Mutex<Connection>>,
    idle:             Mutex<Vec<usize>>,
    returned:         Condvar,
    checkout_timeout: Duration,
}

impl ConnectionPool {
    pub(crate) fn new(connections: Vec<Connection>, checkout_timeout: Duration) -> Self {
        let idle = (0..connections.len()).collect();
        Self {
            slots: connections.into_iter().map(Mutex::new).collect(),
            idle: Mutex::new(idle),
            returned: Condvar::new(),
            checkout_timeout,
        }
    }

    /// Wait up to the checkout timeout for a free connection.
    pub(crate) fn checkout(&self) -> LedgerResult<PooledConnection<'_>> {
        let idle = self.lock_idle();
        let (mut idle, _) = self
            .returned
            .wait_timeout_while(idle, self.checkout_timeout, |idle| idle.is_empty())
            .unwrap_or_else(|p| p.into_inner());
        let slot = idle.pop().ok_or(LedgerError::PoolTimeout)?;
        drop(idle);

        let conn = self
            .slots
            .get(slot)
            .ok_or(LedgerError::PoolTimeout)?
            .lock()
            // A poisoned slot still holds a usable connection; any open
            // transaction was rolled back when it dropped.
            .unwrap_or_else(|p| p.into_inner());
        Ok(PooledConnection { pool: self, slot, conn })
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<usize>> {
        // The idle list stays consistent even if a holder panicked.
        self.idle.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn give_back(&self, slot: usize) {
        self.lock_idle().push(slot);
        self.returned.notify_one();
    }
}

pub(crate) struct PooledConnection<'p> {
    pool: &'p ConnectionPool,
    slot: usize,
    conn: MutexGuard<'p, Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        // The slot lock is released right after this, when `conn` drops;
        // a thread that grabs the slot first just waits on that lock.
        self.pool.give_back(self.slot);
    }
}
