//! Error types for the lane.
//!
//! `ErrorCode` is the stable, machine-readable half of every failure; the
//! HTTP layer and the CLI map on the code, never on message text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes carried by [`LaneError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Required external-system configuration is absent. Checked eagerly,
    /// before any I/O.
    ConfigMissing,
    /// An expected external binary could not be spawned.
    ToolingUnavailable,
    /// Store-policy validation failed (the errors list carries details).
    ValidationFailed,
    /// Another live lock holder exists for this app.
    LockConflict,
    /// A remote HTTP call returned a non-success status or malformed body.
    UpstreamApi,
    /// The expected binary artifact is absent from disk.
    ArtifactMissing,
    /// Referenced job does not exist.
    JobNotFound,
    /// Referenced app does not exist.
    AppNotFound,
    /// Malformed or rejected caller input.
    InvalidRequest,
    /// Persistent store failure (sqlite).
    StoreFailure,
    /// Per-app credential material could not be decrypted.
    CredentialDecrypt,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigMissing => write!(f, "CONFIG_MISSING"),
            Self::ToolingUnavailable => write!(f, "TOOLING_UNAVAILABLE"),
            Self::ValidationFailed => write!(f, "VALIDATION_FAILED"),
            Self::LockConflict => write!(f, "LOCK_CONFLICT"),
            Self::UpstreamApi => write!(f, "UPSTREAM_API"),
            Self::ArtifactMissing => write!(f, "ARTIFACT_MISSING"),
            Self::JobNotFound => write!(f, "JOB_NOT_FOUND"),
            Self::AppNotFound => write!(f, "APP_NOT_FOUND"),
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
            Self::StoreFailure => write!(f, "STORE_FAILURE"),
            Self::CredentialDecrypt => write!(f, "CREDENTIAL_DECRYPT"),
        }
    }
}

/// A lane failure: stable code plus a human-readable, single-line message.
///
/// Messages must not contain secrets or decrypted credential material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneError {
    /// Error code from the registry.
    pub code: ErrorCode,
    /// Human-readable, single-line error message.
    pub message: String,
    /// Optional machine-readable details (failing field, upstream status).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl LaneError {
    /// Create a new lane error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a new lane error with additional data.
    pub fn with_data(code: ErrorCode, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Create a CONFIG_MISSING error naming the absent keys.
    pub fn config_missing(what: &str) -> Self {
        Self::with_data(
            ErrorCode::ConfigMissing,
            format!("required configuration is missing: {}", what),
            serde_json::json!({ "missing": what }),
        )
    }

    /// Create a LOCK_CONFLICT error for an app.
    pub fn conflict(namespace: &str, app_id: &str) -> Self {
        Self::with_data(
            ErrorCode::LockConflict,
            format!("a {} is already in progress for this app", namespace),
            serde_json::json!({ "namespace": namespace, "app_id": app_id }),
        )
    }

    /// Create an UPSTREAM_API error with the upstream status embedded for
    /// operator diagnosis.
    pub fn upstream(context: &str, status: Option<u16>) -> Self {
        let message = match status {
            Some(code) => format!("{} failed upstream (status {})", context, code),
            None => format!("{} failed upstream", context),
        };
        Self::with_data(
            ErrorCode::UpstreamApi,
            message,
            serde_json::json!({ "context": context, "status": status }),
        )
    }

    /// Create an ARTIFACT_MISSING error for a path.
    pub fn artifact_missing(path: &str) -> Self {
        Self::with_data(
            ErrorCode::ArtifactMissing,
            format!("expected artifact not found: {}", path),
            serde_json::json!({ "path": path }),
        )
    }

    /// Create a JOB_NOT_FOUND error.
    pub fn job_not_found(job_id: &str) -> Self {
        Self::with_data(
            ErrorCode::JobNotFound,
            format!("job '{}' not found", job_id),
            serde_json::json!({ "job_id": job_id }),
        )
    }

    /// Create an APP_NOT_FOUND error.
    pub fn app_not_found(app_id: &str) -> Self {
        Self::with_data(
            ErrorCode::AppNotFound,
            format!("app '{}' not found", app_id),
            serde_json::json!({ "app_id": app_id }),
        )
    }

    /// Create an INVALID_REQUEST error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Create a STORE_FAILURE error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StoreFailure, message)
    }

    /// Create a CREDENTIAL_DECRYPT error. Surfaced to the user as a
    /// reconnect prompt, never silently downgraded to the central identity.
    pub fn credential_decrypt(app_id: &str) -> Self {
        Self::with_data(
            ErrorCode::CredentialDecrypt,
            "stored publish credentials could not be decrypted; reconnect your account",
            serde_json::json!({ "app_id": app_id }),
        )
    }

    /// True when this error denotes a lock conflict. HTTP callers map this
    /// to a 409-equivalent response without inspecting the message.
    pub fn is_conflict(&self) -> bool {
        self.code == ErrorCode::LockConflict
    }
}

impl fmt::Display for LaneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for LaneError {}
