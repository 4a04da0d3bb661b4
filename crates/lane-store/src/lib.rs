//! Store Lane persistence.
//!
//! Two concerns live here: the lease-lock primitive that serializes build
//! and publish work per app, and the sqlite-backed job/app store.
//!
//! Both lock backends expose identical semantics through [`LockBackend`]:
//! a caller either receives a token usable to release the lock, or a
//! conflict. Expired leases are vacant; release is compare-and-release by
//! token so a forgiven holder's late unlock is a no-op.

pub mod jobs;
pub mod lock;
pub mod sqlite_lock;

pub use jobs::{JobStore, StoreError};
pub use lock::{LockBackend, LockError, LockToken, MemoryLocks};
pub use sqlite_lock::SqliteLocks;
