pub mod migrations;
pub mod queries;

use anyhow::Context;
use rusqlite::Connection;
use tokio::sync::MutexGuard;

pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path).context("failed to open database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .context("failed to set database pragmas")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// A `BEGIN IMMEDIATE` transaction on the locked shared connection, for work
/// that has to await between statements. The write lock is taken before the
/// first read, so reads stay consistent with the writes that follow.
///
/// Dropping it without `commit` rolls back. That covers error returns as well
/// as a future abandoned mid-await by a caller timeout or task abort.
pub struct ImmediateTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    committed: bool,
}

impl<'a> ImmediateTransaction<'a> {
    pub fn begin(conn: MutexGuard<'a, Connection>) -> rusqlite::Result<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self {
            conn,
            committed: false,
        })
    }

    pub fn conn(&mut self) -> &mut Connection {
        &mut *self.conn
    }

    pub fn commit(mut self) -> rusqlite::Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for ImmediateTransaction<'_> {
    fn drop(&mut self) {
        // a failed COMMIT may already have ended the transaction
        if self.committed || self.conn.is_autocommit() {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            tracing::error!(error = %e, "failed to roll back transaction");
        } else {
            tracing::debug!("rolled back unfinished transaction");
        }
    }
}
