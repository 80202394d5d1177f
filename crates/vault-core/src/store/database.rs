//! SQLite connection management for the vault store.
//!
//! Every operation opens its own connection so that the caller never has to
//! manage connection lifetime. Mutations go through
//! [`Database::with_immediate_tx`], which serialises writers and makes each
//! request's changes visible atomically.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::config::VaultConfig;
use crate::errors::VaultResult;
use crate::store::schema;

/// Current UTC time as RFC 3339 with microseconds; sorts lexically.
pub(crate) fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed object store.
#[derive(Clone, Debug)]
pub struct Database {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl Database {
    /// Create a new `Database`.  The path is made absolute and parent
    /// directories are created if they do not already exist.
    pub fn new(config: &VaultConfig) -> VaultResult<Self> {
        let resolved = if config.db_path.is_absolute() {
            config.db_path.clone()
        } else {
            std::env::current_dir()?.join(&config.db_path)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            db_path: resolved,
            busy_timeout: config.busy_timeout(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open a new SQLite connection with foreign keys and a busy timeout.
    pub fn connect(&self) -> VaultResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Initialise the database schema: set WAL mode, create all tables and
    /// indexes, then check the version stamp.
    pub fn init_schema(&self) -> VaultResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::ensure_version(&conn)?;
        Ok(())
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction and commit on success.
    ///
    /// Any error rolls the whole transaction back when it is dropped.
    pub fn with_immediate_tx<T, F>(&self, f: F) -> VaultResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> VaultResult<T>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Run a read-only closure against a fresh connection.
    pub fn with_conn<T, F>(&self, f: F) -> VaultResult<T>
    where
        F: FnOnce(&Connection) -> VaultResult<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// A schema-initialised database in a temporary directory.
    pub(crate) fn temp_database() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let config = VaultConfig::with_db_path(dir.path().join("vault.db"));
        let db = Database::new(&config).unwrap();
        db.init_schema().unwrap();
        (dir, db)
    }
}
