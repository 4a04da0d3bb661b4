//! SQLite-backed lease locks.
//!
//! The advisory-lock backend for deployments where several worker
//! processes share one relational store. One `locks` table; acquisition is
//! a single transaction that evicts an expired row and inserts the new
//! lease, so two racing workers serialize on the row.
//!
//! Expiry uses wall-clock milliseconds (not `Instant`) because leases must
//! survive and be reclaimable across process boundaries.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::lock::{LockBackend, LockError, LockToken};

/// Lock backend over a shared sqlite database.
#[derive(Clone)]
pub struct SqliteLocks {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLocks {
    /// Open (or create) the lock table at `path`.
    pub fn open(path: &Path) -> Result<Self, LockError> {
        let conn = Connection::open(path).map_err(|e| LockError::Backend(e.to_string()))?;
        Self::from_connection(conn)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, LockError> {
        let conn = Connection::open_in_memory().map_err(|e| LockError::Backend(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, LockError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS locks (
                name       TEXT PRIMARY KEY,
                token      TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );",
        )
        .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl LockBackend for SqliteLocks {
    fn acquire(&self, key: &str, ttl: Duration) -> Result<LockToken, LockError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| LockError::Backend("connection poisoned".to_string()))?;

        let now_ms = Utc::now().timestamp_millis();
        let tx = conn
            .transaction()
            .map_err(|e| LockError::Backend(e.to_string()))?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT expires_at FROM locks WHERE name = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LockError::Backend(e.to_string()))?;

        if let Some(expires_at) = existing {
            if expires_at > now_ms {
                let remaining = (expires_at - now_ms) as u64;
                let age_ms = (ttl.as_millis() as u64).saturating_sub(remaining);
                return Err(LockError::Conflict {
                    key: key.to_string(),
                    holder_age: Duration::from_millis(age_ms),
                });
            }
            tx.execute("DELETE FROM locks WHERE name = ?1", params![key])
                .map_err(|e| LockError::Backend(e.to_string()))?;
        }

        let token = LockToken(uuid::Uuid::new_v4().to_string());
        let expires_at = now_ms + ttl.as_millis() as i64;
        tx.execute(
            "INSERT INTO locks (name, token, expires_at) VALUES (?1, ?2, ?3)",
            params![key, token.as_str(), expires_at],
        )
        .map_err(|e| LockError::Backend(e.to_string()))?;
        tx.commit().map_err(|e| LockError::Backend(e.to_string()))?;

        Ok(token)
    }

    fn release(&self, key: &str, token: &LockToken) -> Result<bool, LockError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| LockError::Backend("connection poisoned".to_string()))?;

        let removed = conn
            .execute(
                "DELETE FROM locks WHERE name = ?1 AND token = ?2",
                params![key, token.as_str()],
            )
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_then_conflict_then_release() {
        let locks = SqliteLocks::open_in_memory().unwrap();
        let ttl = Duration::from_secs(30);

        let token = locks.acquire("publish:A", ttl).unwrap();
        assert!(matches!(
            locks.acquire("publish:A", ttl),
            Err(LockError::Conflict { .. })
        ));

        assert!(locks.release("publish:A", &token).unwrap());
        locks.acquire("publish:A", ttl).unwrap();
    }

    #[test]
    fn test_expired_row_is_reclaimed() {
        let locks = SqliteLocks::open_in_memory().unwrap();

        let stale = locks.acquire("build:A", Duration::from_millis(5)).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let fresh = locks.acquire("build:A", Duration::from_secs(30)).unwrap();
        assert!(!locks.release("build:A", &stale).unwrap());
        assert!(locks.release("build:A", &fresh).unwrap());
    }

    #[test]
    fn test_release_requires_matching_token() {
        let locks = SqliteLocks::open_in_memory().unwrap();
        let ttl = Duration::from_secs(30);

        let _held = locks.acquire("build:A", ttl).unwrap();
        let bogus = LockToken("imposter".to_string());
        assert!(!locks.release("build:A", &bogus).unwrap());
        assert!(locks.acquire("build:A", ttl).is_err());
    }
}
