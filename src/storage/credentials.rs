use rusqlite::{params, ErrorCode, OptionalExtension};

use super::Database;
use crate::error::{AppError, Result};

/// Durable mapping from username to salted bcrypt hash.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    db: Database,
    cost: u32,
}

impl CredentialStore {
    /// Creates a store that hashes with the given bcrypt work factor.
    pub fn new(db: Database, cost: u32) -> Self {
        Self { db, cost }
    }

    /// Hash `password` and insert a new user row.
    ///
    /// Duplicate usernames are detected by the UNIQUE constraint on insert,
    /// so two racing registrations cannot both succeed.
    pub fn create(&self, username: &str, password: &str) -> Result<()> {
        let hash = bcrypt::hash(password, self.cost)?;
        let conn = self.db.lock()?;
        match conn.execute(
            "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
            params![username, hash],
        ) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(AppError::UsernameTaken)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stored hash for `username`, if the user exists.
    pub fn find_hash(&self, username: &str) -> Result<Option<String>> {
        let conn = self.db.lock()?;
        let hash = conn
            .query_row(
                "SELECT password_hash FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// Number of registered users.
    pub fn count(&self) -> Result<usize> {
        let conn = self.db.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CredentialStore {
        Database::open_in_memory()
            .unwrap()
            .credentials(4)
    }

    #[test]
    fn test_create_stores_hash_not_plaintext() {
        let store = store();
        store.create("alice", "secret123").unwrap();

        let hash = store.find_hash("alice").unwrap().unwrap();
        assert_ne!(hash, "secret123");
        assert!(bcrypt::verify("secret123", &hash).unwrap());
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let store = store();
        store.create("alice", "one").unwrap();

        let err = store.create("alice", "two").unwrap_err();
        assert!(matches!(err, AppError::UsernameTaken));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_find_hash_missing_user() {
        let store = store();
        assert_eq!(store.find_hash("nobody").unwrap(), None);
    }

    #[test]
    fn test_salts_differ_per_user() {
        let store = store();
        store.create("a", "same").unwrap();
        store.create("b", "same").unwrap();
        assert_ne!(
            store.find_hash("a").unwrap(),
            store.find_hash("b").unwrap()
        );
    }
}
