//! SQLite-backed persistence for credentials and comparison history

/// Username to password-hash mapping.
pub mod credentials;
/// Append-only comparison history.
pub mod ledger;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::{AppError, Result};

pub use credentials::CredentialStore;
pub use ledger::ComparisonLedger;

/// Schema for both relations. Safe to run on every startup.
pub(crate) const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS comparisons (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    image1_name TEXT NOT NULL,
    image1_blob BLOB NOT NULL,
    image2_name TEXT NOT NULL,
    image2_blob BLOB NOT NULL,
    similarity REAL NOT NULL,
    result TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
";

/// Shared handle to the application's SQLite database.
#[derive(Clone, Debug)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database file and initialize the schema.
    pub fn open(path: &Path) -> Result<Self> {
        log::info!("Opening database at {}", path.display());
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("SQLite journal mode: {}", mode);
        conn.busy_timeout(Duration::from_millis(5000))?;
        Self::initialize(conn)
    }

    /// Open a private in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Credential store view over this database.
    pub fn credentials(&self, bcrypt_cost: u32) -> CredentialStore {
        CredentialStore::new(self.clone(), bcrypt_cost)
    }

    /// Comparison ledger view over this database.
    pub fn ledger(&self) -> ComparisonLedger {
        ComparisonLedger::new(self.clone())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::StorageUnavailable("database lock poisoned".to_string()))
    }
}
