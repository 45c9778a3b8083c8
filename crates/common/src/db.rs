//! SQLite-backed application store
//!
//! Reference implementation of the storage capabilities: a run-scoped
//! savepoint for transactional runs and a table sweep for state resets.

use crate::store::{BulkCleanable, TransactionalStore};
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Tables that hold schema or bookkeeping state and survive a reset
pub const BOOKKEEPING_TABLES: &[&str] = &[
    "schema_migrations",
    "ar_internal_metadata",
    "_sqlx_migrations",
];

/// Savepoint name used for the run-scoped transaction
const RUN_SAVEPOINT: &str = "testbridge_run";

/// Database wrapper shared between the application and the bridge
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    run_transaction: Arc<AtomicBool>,
}

impl Database {
    /// Expose the underlying connection for application code and commands
    /// that need to issue their own statements.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(Self::from_connection(conn))
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            run_transaction: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run a batch of SQL statements
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Names of all user tables, sorted
    pub fn tables(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        list_tables(&conn)
    }

    /// Number of rows in `table`
    pub fn count_rows(&self, table: &str) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_table_name(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete every row of every non-bookkeeping table with referential
    /// integrity checks switched off for the duration.
    ///
    /// SQLite ignores `foreign_keys` inside a transaction, so there the checks
    /// are deferred to commit instead; by then no dangling rows remain.
    pub fn delete_all_rows(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let tables = list_tables(&conn)?;

        let in_transaction = !conn.is_autocommit();
        let (pragma, previous) = if in_transaction {
            ("defer_foreign_keys", pragma_flag(&conn, "defer_foreign_keys")?)
        } else {
            ("foreign_keys", pragma_flag(&conn, "foreign_keys")?)
        };
        let relaxed = if in_transaction { "ON" } else { "OFF" };
        conn.execute_batch(&format!("PRAGMA {}={};", pragma, relaxed))?;

        let result = (|| -> Result<usize> {
            let mut cleared = 0;
            for table in tables.iter().filter(|t| !is_bookkeeping(t)) {
                let rows = conn.execute(&format!("DELETE FROM {}", quote_table_name(table)), [])?;
                debug!("Cleared {} rows from {}", rows, table);
                cleared += 1;
            }
            Ok(cleared)
        })();

        conn.execute_batch(&format!(
            "PRAGMA {}={};",
            pragma,
            if previous { "ON" } else { "OFF" }
        ))?;

        result
    }
}

fn pragma_flag(conn: &Connection, pragma: &str) -> Result<bool> {
    let value: i64 = conn.query_row(&format!("PRAGMA {}", pragma), [], |row| row.get(0))?;
    Ok(value != 0)
}

impl TransactionalStore for Database {
    fn begin_isolated(&self) -> Result<()> {
        if self.run_transaction.load(Ordering::SeqCst) {
            return Err(Error::Internal("run transaction already open".to_string()));
        }
        let conn = self.conn.lock();
        conn.execute_batch(&format!("SAVEPOINT {}", RUN_SAVEPOINT))?;
        self.run_transaction.store(true, Ordering::SeqCst);
        debug!("Opened savepoint {}", RUN_SAVEPOINT);
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        if !self.run_transaction.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name};",
            name = RUN_SAVEPOINT
        ))?;
        debug!("Rolled back savepoint {}", RUN_SAVEPOINT);
        Ok(())
    }

    fn transaction_open(&self) -> bool {
        self.run_transaction.load(Ordering::SeqCst)
    }
}

impl BulkCleanable for Database {
    fn clear_all(&self) -> Result<()> {
        let cleared = self.delete_all_rows()?;
        info!("Cleared {} tables", cleared);
        Ok(())
    }
}

/// Quote an identifier for use in a statement
pub fn quote_table_name(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn is_bookkeeping(table: &str) -> bool {
    BOOKKEEPING_TABLES.contains(&table) || table.starts_with("sqlite_")
}

fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut tables = Vec::new();
    for row in rows {
        tables.push(row?);
    }
    Ok(tables)
}
