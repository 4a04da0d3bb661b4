//! Lane configuration.
//!
//! Environment-derived, validated eagerly. Remote-build and publisher
//! sections each know whether they are configured; callers check before
//! any network call so an unconfigured deployment fails with
//! CONFIG_MISSING instead of an opaque upstream error.

use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use lane_protocol::LaneError;

/// Default advisory-lock acquisition timeout.
const DEFAULT_LOCK_ACQUIRE_SECS: u64 = 5;

/// Default build lock lease.
const DEFAULT_BUILD_LEASE_SECS: u64 = 600;

/// Default publish lock lease.
const DEFAULT_PUBLISH_LEASE_SECS: u64 = 120;

/// Remote build runner configuration (workflow-dispatch style).
#[derive(Debug, Clone, Default)]
pub struct RemoteBuildConfig {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub token: Option<String>,
    /// Workflow file the dispatch targets.
    pub workflow: String,
    pub callback_url: Option<String>,
    /// Base API URL; overridable for tests.
    pub api_base: String,
}

impl RemoteBuildConfig {
    /// All of owner/repo/token/callback must be present before any
    /// network call is made.
    pub fn is_configured(&self) -> bool {
        self.owner.is_some()
            && self.repo.is_some()
            && self.token.is_some()
            && self.callback_url.is_some()
    }

    /// Names of the missing fields, for the CONFIG_MISSING message.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.owner.is_none() {
            missing.push("remote build owner");
        }
        if self.repo.is_none() {
            missing.push("remote build repo");
        }
        if self.token.is_none() {
            missing.push("remote build token");
        }
        if self.callback_url.is_none() {
            missing.push("remote build callback url");
        }
        missing
    }
}

/// Storefront publisher configuration.
#[derive(Debug, Clone, Default)]
pub struct PublisherConfig {
    /// Service identity JSON, decoded (raw and base64 forms accepted).
    pub service_identity_json: Option<String>,
    /// Identity string for decrypting stored per-app refresh tokens.
    pub token_decryption_key: Option<String>,
    /// OAuth client id/secret for the refresh-token grant.
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    /// Base publisher API URL; overridable for tests.
    pub api_base: String,
    /// Base token-exchange URL; overridable for tests.
    pub token_url: String,
    /// Distribution track publishes go to.
    pub track: String,
}

/// Lock timing configuration.
#[derive(Debug, Clone, Copy)]
pub struct LockConfig {
    pub acquire_timeout: Duration,
    pub build_lease: Duration,
    pub publish_lease: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(DEFAULT_LOCK_ACQUIRE_SECS),
            build_lease: Duration::from_secs(DEFAULT_BUILD_LEASE_SECS),
            publish_lease: Duration::from_secs(DEFAULT_PUBLISH_LEASE_SECS),
        }
    }
}

impl LockConfig {
    /// Validate lock timing bounds.
    pub fn validate(&self) -> Result<(), LaneError> {
        if self.acquire_timeout.is_zero() || self.acquire_timeout > Duration::from_secs(60) {
            return Err(LaneError::invalid_request(format!(
                "lock acquire timeout must be in (0s, 60s], got {:?}",
                self.acquire_timeout
            )));
        }
        if self.build_lease.is_zero() || self.build_lease > Duration::from_secs(86400) {
            return Err(LaneError::invalid_request(format!(
                "build lease must be in (0s, 24h], got {:?}",
                self.build_lease
            )));
        }
        if self.publish_lease.is_zero() || self.publish_lease > self.build_lease {
            return Err(LaneError::invalid_request(format!(
                "publish lease must be in (0s, build lease], got {:?}",
                self.publish_lease
            )));
        }
        Ok(())
    }
}

/// External tool names, overridable for non-PATH installs.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub bundletool: String,
    pub aapt2: String,
    pub apksigner: String,
    pub jarsigner: String,
    /// Local bundler for the web platform.
    pub bundler: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            bundletool: "bundletool".to_string(),
            aapt2: "aapt2".to_string(),
            apksigner: "apksigner".to_string(),
            jarsigner: "jarsigner".to_string(),
            bundler: "web-bundler".to_string(),
        }
    }
}

/// Full lane configuration.
#[derive(Debug, Clone)]
pub struct LaneConfig {
    pub remote: RemoteBuildConfig,
    pub publisher: PublisherConfig,
    pub locks: LockConfig,
    pub tools: ToolPaths,
    /// Sqlite database path; `None` means in-memory (single-shot runs).
    pub db_path: Option<PathBuf>,
    /// Where generated projects and downloaded artifacts live.
    pub work_dir: PathBuf,
    /// Project template root for the generator.
    pub template_dir: PathBuf,
}

impl LaneConfig {
    /// Read configuration from `LANE_*` environment variables.
    pub fn from_env() -> Result<Self, LaneError> {
        let remote = RemoteBuildConfig {
            owner: env_opt("LANE_REMOTE_OWNER"),
            repo: env_opt("LANE_REMOTE_REPO"),
            token: env_opt("LANE_REMOTE_TOKEN"),
            workflow: env_opt("LANE_REMOTE_WORKFLOW").unwrap_or_else(|| "build.yml".to_string()),
            callback_url: env_opt("LANE_REMOTE_CALLBACK_URL"),
            api_base: env_opt("LANE_REMOTE_API_BASE")
                .unwrap_or_else(|| "https://api.github.com".to_string()),
        };

        let publisher = PublisherConfig {
            service_identity_json: decode_identity(env_opt("LANE_PUBLISH_SERVICE_JSON"))?,
            token_decryption_key: env_opt("LANE_PUBLISH_TOKEN_KEY"),
            oauth_client_id: env_opt("LANE_PUBLISH_OAUTH_CLIENT_ID"),
            oauth_client_secret: env_opt("LANE_PUBLISH_OAUTH_CLIENT_SECRET"),
            api_base: env_opt("LANE_PUBLISH_API_BASE")
                .unwrap_or_else(|| "https://androidpublisher.googleapis.com".to_string()),
            token_url: env_opt("LANE_PUBLISH_TOKEN_URL")
                .unwrap_or_else(|| "https://oauth2.googleapis.com/token".to_string()),
            track: env_opt("LANE_PUBLISH_TRACK").unwrap_or_else(|| "internal".to_string()),
        };

        let locks = LockConfig {
            acquire_timeout: env_secs("LANE_LOCK_ACQUIRE_SECS", DEFAULT_LOCK_ACQUIRE_SECS)?,
            build_lease: env_secs("LANE_LOCK_BUILD_LEASE_SECS", DEFAULT_BUILD_LEASE_SECS)?,
            publish_lease: env_secs("LANE_LOCK_PUBLISH_LEASE_SECS", DEFAULT_PUBLISH_LEASE_SECS)?,
        };
        locks.validate()?;

        let defaults = ToolPaths::default();
        let tools = ToolPaths {
            bundletool: env_opt("LANE_TOOL_BUNDLETOOL").unwrap_or(defaults.bundletool),
            aapt2: env_opt("LANE_TOOL_AAPT2").unwrap_or(defaults.aapt2),
            apksigner: env_opt("LANE_TOOL_APKSIGNER").unwrap_or(defaults.apksigner),
            jarsigner: env_opt("LANE_TOOL_JARSIGNER").unwrap_or(defaults.jarsigner),
            bundler: env_opt("LANE_TOOL_BUNDLER").unwrap_or(defaults.bundler),
        };

        Ok(Self {
            remote,
            publisher,
            locks,
            tools,
            db_path: env_opt("LANE_DB_PATH").map(PathBuf::from),
            work_dir: env_opt("LANE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./lane-work")),
            template_dir: env_opt("LANE_TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./templates")),
        })
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_secs(key: &str, default: u64) -> Result<Duration, LaneError> {
    match env_opt(key) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| LaneError::invalid_request(format!("{} must be an integer", key))),
    }
}

/// Accept the service identity as raw JSON or base64-encoded JSON, tried
/// in that order.
fn decode_identity(raw: Option<String>) -> Result<Option<String>, LaneError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    if raw.trim_start().starts_with('{') {
        return Ok(Some(raw));
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(|_| {
            LaneError::invalid_request("service identity is neither JSON nor base64 JSON")
        })?;
    String::from_utf8(decoded)
        .map(Some)
        .map_err(|_| LaneError::invalid_request("service identity base64 is not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_configured_requires_all_fields() {
        let mut remote = RemoteBuildConfig {
            owner: Some("acme".into()),
            repo: Some("builds".into()),
            token: Some("tok".into()),
            workflow: "build.yml".into(),
            callback_url: Some("https://lane.example/callback".into()),
            api_base: "https://api.github.com".into(),
        };
        assert!(remote.is_configured());

        remote.callback_url = None;
        assert!(!remote.is_configured());
        assert_eq!(remote.missing_fields(), vec!["remote build callback url"]);
    }

    #[test]
    fn test_identity_accepts_raw_and_base64_json() {
        let raw = r#"{"client_email":"svc@example"}"#;
        assert_eq!(
            decode_identity(Some(raw.to_string())).unwrap().as_deref(),
            Some(raw)
        );

        let b64 = base64::engine::general_purpose::STANDARD.encode(raw);
        assert_eq!(
            decode_identity(Some(b64)).unwrap().as_deref(),
            Some(raw)
        );

        assert!(decode_identity(Some("%%%not-base64%%%".to_string())).is_err());
    }

    #[test]
    fn test_lock_bounds() {
        let mut locks = LockConfig::default();
        assert!(locks.validate().is_ok());

        locks.acquire_timeout = Duration::from_secs(0);
        assert!(locks.validate().is_err());

        locks = LockConfig::default();
        locks.publish_lease = locks.build_lease + Duration::from_secs(1);
        assert!(locks.validate().is_err());
    }
}
