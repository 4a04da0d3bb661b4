//! Lease locks.
//!
//! A named, TTL-bounded mutual-exclusion lock. Keys are caller-composed
//! (`build:{app_id}` / `publish:{app_id}` — same primitive, disjoint
//! namespaces). A lease is live while `now - acquired_at < ttl`; an
//! expired lease is vacant and a new acquisition reclaims it in place.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Opaque proof of lock ownership. Required to release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl LockToken {
    fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lock acquisition failures.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another live holder exists. Distinguishable from backend faults so
    /// callers can map it to a 409-equivalent without reading the message.
    #[error("lock '{key}' is held by another caller")]
    Conflict {
        key: String,
        /// Age of the competing lease when the attempt was made.
        holder_age: Duration,
    },

    /// The backend itself failed (sqlite error, poisoned mutex).
    #[error("lock backend failure: {0}")]
    Backend(String),
}

impl LockError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Common contract for the two lock backends.
///
/// Implementations must be safe to share across worker threads.
pub trait LockBackend: Send + Sync {
    /// Acquire `key` for `ttl`, reclaiming any expired lease.
    fn acquire(&self, key: &str, ttl: Duration) -> Result<LockToken, LockError>;

    /// Release `key` if and only if `token` still owns it. Returns `true`
    /// when the lease was released, `false` when ownership had already
    /// moved on (expired and reclaimed by someone else).
    fn release(&self, key: &str, token: &LockToken) -> Result<bool, LockError>;
}

#[derive(Debug)]
struct Lease {
    token: LockToken,
    acquired_at: Instant,
    ttl: Duration,
}

impl Lease {
    fn is_expired(&self) -> bool {
        self.acquired_at.elapsed() >= self.ttl
    }
}

/// In-process TTL lock table for single-instance deployments.
///
/// Constructor-injected state, not a module-level singleton: every
/// scheduler (and every test) owns an independent table.
#[derive(Debug, Clone, Default)]
pub struct MemoryLocks {
    inner: Arc<Mutex<HashMap<String, Lease>>>,
}

impl MemoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) leases. Test/diagnostic helper.
    pub fn live_count(&self) -> usize {
        match self.inner.lock() {
            Ok(table) => table.values().filter(|l| !l.is_expired()).count(),
            Err(_) => 0,
        }
    }
}

impl LockBackend for MemoryLocks {
    fn acquire(&self, key: &str, ttl: Duration) -> Result<LockToken, LockError> {
        let mut table = self
            .inner
            .lock()
            .map_err(|_| LockError::Backend("lock table poisoned".to_string()))?;

        if let Some(existing) = table.get(key) {
            if !existing.is_expired() {
                return Err(LockError::Conflict {
                    key: key.to_string(),
                    holder_age: existing.acquired_at.elapsed(),
                });
            }
            // Expired: fall through and reclaim. The previous holder's
            // eventual release will miss on token compare.
        }

        let token = LockToken::mint();
        table.insert(
            key.to_string(),
            Lease {
                token: token.clone(),
                acquired_at: Instant::now(),
                ttl,
            },
        );
        Ok(token)
    }

    fn release(&self, key: &str, token: &LockToken) -> Result<bool, LockError> {
        let mut table = self
            .inner
            .lock()
            .map_err(|_| LockError::Backend("lock table poisoned".to_string()))?;

        match table.get(key) {
            Some(lease) if lease.token == *token => {
                table.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_second_acquire_conflicts_before_release() {
        let locks = MemoryLocks::new();
        let ttl = Duration::from_secs(30);

        let token = locks.acquire("build:A", ttl).unwrap();
        let second = locks.acquire("build:A", ttl);
        assert!(matches!(second, Err(LockError::Conflict { .. })));

        assert!(locks.release("build:A", &token).unwrap());
        locks.acquire("build:A", ttl).unwrap();
    }

    #[test]
    fn test_disjoint_keys_do_not_conflict() {
        let locks = MemoryLocks::new();
        let ttl = Duration::from_secs(30);

        locks.acquire("build:A", ttl).unwrap();
        locks.acquire("publish:A", ttl).unwrap();
        locks.acquire("build:B", ttl).unwrap();
        assert_eq!(locks.live_count(), 3);
    }

    #[test]
    fn test_expired_lease_is_reclaimed() {
        let locks = MemoryLocks::new();

        let stale = locks.acquire("build:A", Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(25));

        // New acquisition succeeds; the stale token no longer owns anything.
        let fresh = locks.acquire("build:A", Duration::from_secs(30)).unwrap();
        assert_ne!(stale, fresh);

        // Late release from the forgiven holder is a no-op.
        assert!(!locks.release("build:A", &stale).unwrap());
        assert!(locks.release("build:A", &fresh).unwrap());
    }

    #[test]
    fn test_release_with_wrong_token_keeps_lease() {
        let locks = MemoryLocks::new();
        let ttl = Duration::from_secs(30);

        let _token = locks.acquire("build:A", ttl).unwrap();
        let bogus = LockToken("not-the-holder".to_string());
        assert!(!locks.release("build:A", &bogus).unwrap());

        // Still held.
        assert!(locks.acquire("build:A", ttl).is_err());
    }

    #[test]
    fn test_only_one_thread_wins_a_race() {
        let locks = MemoryLocks::new();
        let ttl = Duration::from_secs(30);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                thread::spawn(move || locks.acquire("build:A", ttl).is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }
}
