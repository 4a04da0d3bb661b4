//! Job and app records.
//!
//! A [`BuildJob`] is one build attempt for one app/platform pair. At most
//! one job per app may hold a live build lock at any time; the lock fields
//! here are bookkeeping only, the lock itself lives in the lock backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Build target platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Built by the remote CI runner; the Android toolchain is not
    /// available on the lane host.
    Android,
    /// Generated and bundled locally.
    Web,
}

impl Platform {
    /// Parse from the CLI/API string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "android" => Some(Self::Android),
            "web" => Some(Self::Web),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Web => "web",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    /// True for states no transition leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse from the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(Self::Queued),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One build attempt for one app/platform pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: String,
    pub app_id: String,
    pub platform: Platform,
    pub state: JobState,
    /// Monotonic attempt counter. Increments when a job re-enters the
    /// queue after a prior FAILED terminal state for the same pair.
    pub attempts: u32,
    /// Opaque lock token, set only while RUNNING.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_token: Option<String>,
    /// When the current lock was taken, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    /// Failure detail for FAILED jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The app-level fields the lane owns.
///
/// Mutated only by the scheduler and inspector; the publish coordinator
/// reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRecord {
    pub app_id: String,
    pub name: String,
    /// Reverse-DNS package identifier expected in the built artifact.
    pub package_name: String,
    /// Last published version code. Must strictly increase across
    /// successive published releases.
    pub version_code: i64,
    pub website_url: String,
    pub theme_color: String,
    /// Feature flags fed to the project generator. Every flag must map to
    /// exactly one template placeholder.
    #[serde(default)]
    pub features: BTreeMap<String, String>,
    /// Optional icon glyph for the generated launcher icon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_glyph: Option<String>,
    /// Encrypted per-app publish refresh token, if the user connected
    /// their own store account. Never stored decrypted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_token_enc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_logs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_build_at: Option<DateTime<Utc>>,
}

impl AppRecord {
    /// Minimal record for a new app.
    pub fn new(app_id: &str, name: &str, package_name: &str, website_url: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            name: name.to_string(),
            package_name: package_name.to_string(),
            version_code: 0,
            website_url: website_url.to_string(),
            theme_color: "#2196F3".to_string(),
            features: BTreeMap::new(),
            icon_glyph: None,
            publish_token_enc: None,
            artifact_path: None,
            artifact_mime: None,
            artifact_size: None,
            build_logs: None,
            build_error: None,
            last_build_at: None,
        }
    }
}
