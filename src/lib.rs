//! Store Lane - build-and-publish orchestration for mobile app binaries
//!
//! This crate turns an app configuration into a signed, store-compliant
//! binary and optionally publishes it to a storefront track. It owns the
//! job lifecycle with lease locking, the bridge to the remote CI build
//! runner, and the multi-step storefront publish protocol; the artifact
//! inspector and the persistent store live in member crates.

pub mod bridge;
pub mod config;
pub mod credentials;
pub mod generator;
pub mod pipeline;
pub mod publish;
pub mod scheduler;

pub use bridge::{PollOutcome, RemoteBuildBridge, TriggerOutcome};
pub use config::LaneConfig;
pub use credentials::{CredentialResolver, PublishCredentials};
pub use generator::ProjectGenerator;
pub use pipeline::BuildPipeline;
pub use publish::{PublishCoordinator, PublishReceipt};
pub use scheduler::{BuildScheduler, LockGuard};
