//! Build job scheduler and lock discipline.
//!
//! Serializes build and publish execution per app and makes retries safe.
//! The two lock namespaces share one primitive but never collide; holding
//! a build lock says nothing about the publish lock and vice versa.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lane_protocol::{BuildJob, JobState, LaneError, Platform};
use lane_store::{JobStore, LockBackend, LockError, LockToken, StoreError};
use tracing::{debug, warn};

use crate::config::LockConfig;

/// Retry spacing while waiting out a contended lock.
const ACQUIRE_RETRY: Duration = Duration::from_millis(100);

/// Lock key namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockNamespace {
    Build,
    Publish,
}

impl LockNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Publish => "publish",
        }
    }

    fn key(&self, app_id: &str) -> String {
        format!("{}:{}", self.as_str(), app_id)
    }
}

/// Scoped lock ownership. Releases on drop; release is compare-and-release
/// by token, so a guard outliving its lease is a harmless no-op.
pub struct LockGuard {
    backend: Arc<dyn LockBackend>,
    key: String,
    token: Option<LockToken>,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl LockGuard {
    /// The held token's string form, for job bookkeeping.
    pub fn token_str(&self) -> &str {
        self.token.as_ref().map(|t| t.as_str()).unwrap_or("")
    }

    /// Release explicitly. Returns `false` when ownership had already
    /// moved on (lease expired and was reclaimed).
    pub fn release(mut self) -> bool {
        self.release_inner()
    }

    fn release_inner(&mut self) -> bool {
        let Some(token) = self.token.take() else {
            return false;
        };
        match self.backend.release(&self.key, &token) {
            Ok(released) => {
                if !released {
                    warn!(key = %self.key, "lock was reclaimed before release");
                }
                released
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "lock release failed");
                false
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Owns job records and the locking discipline around them.
pub struct BuildScheduler {
    store: JobStore,
    locks: Arc<dyn LockBackend>,
    lock_config: LockConfig,
}

impl BuildScheduler {
    pub fn new(store: JobStore, locks: Arc<dyn LockBackend>, lock_config: LockConfig) -> Self {
        Self {
            store,
            locks,
            lock_config,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Lease TTL for a namespace.
    pub fn lease_for(&self, namespace: LockNamespace) -> Duration {
        match namespace {
            LockNamespace::Build => self.lock_config.build_lease,
            LockNamespace::Publish => self.lock_config.publish_lease,
        }
    }

    /// Acquire the app's lock in a namespace, retrying a contended lock
    /// until the acquisition timeout. A still-contended lock surfaces as
    /// LOCK_CONFLICT, machine-checkable via [`LaneError::is_conflict`].
    pub fn acquire(
        &self,
        namespace: LockNamespace,
        app_id: &str,
        lease: Duration,
    ) -> Result<LockGuard, LaneError> {
        let key = namespace.key(app_id);
        let deadline = Instant::now() + self.lock_config.acquire_timeout;

        loop {
            match self.locks.acquire(&key, lease) {
                Ok(token) => {
                    debug!(key = %key, "lock acquired");
                    return Ok(LockGuard {
                        backend: Arc::clone(&self.locks),
                        key,
                        token: Some(token),
                    });
                }
                Err(LockError::Conflict { .. }) if Instant::now() < deadline => {
                    std::thread::sleep(ACQUIRE_RETRY);
                }
                Err(LockError::Conflict { .. }) => {
                    return Err(LaneError::conflict(namespace.as_str(), app_id));
                }
                Err(LockError::Backend(message)) => {
                    return Err(LaneError::store(message));
                }
            }
        }
    }

    /// Acquire, run `f`, and release on every exit path.
    pub fn run_exclusive<T>(
        &self,
        namespace: LockNamespace,
        app_id: &str,
        lease: Duration,
        f: impl FnOnce(&LockGuard) -> Result<T, LaneError>,
    ) -> Result<T, LaneError> {
        let guard = self.acquire(namespace, app_id, lease)?;
        let result = f(&guard);
        guard.release();
        result
    }

    // === Job transitions ===

    /// Create (or return the open) job for the pair.
    pub fn enqueue(&self, app_id: &str, platform: Platform) -> Result<BuildJob, LaneError> {
        self.store.enqueue(app_id, platform).map_err(store_err)
    }

    /// Transition to RUNNING. Requires the held build lock; the guard's
    /// token is recorded on the job row.
    pub fn mark_running(&self, job_id: &str, guard: &LockGuard) -> Result<(), LaneError> {
        self.store
            .mark_running(job_id, guard.token_str())
            .map_err(store_err)
    }

    /// Terminal transition; clears lock bookkeeping on the row.
    pub fn mark_terminal(
        &self,
        job_id: &str,
        outcome: JobState,
        error: Option<&str>,
    ) -> Result<(), LaneError> {
        self.store
            .mark_terminal(job_id, outcome, error)
            .map_err(store_err)
    }
}

fn store_err(err: StoreError) -> LaneError {
    match err {
        StoreError::JobNotFound(id) => LaneError::job_not_found(&id),
        StoreError::AppNotFound(id) => LaneError::app_not_found(&id),
        other => LaneError::store(other.to_string()),
    }
}
