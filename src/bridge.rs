//! Remote build bridge.
//!
//! Obtains a binary for the platform whose toolchain is unavailable on the
//! lane host by delegating to a remote, asynchronous workflow runner:
//! dispatch a build, resolve the run id by recency, poll, download the
//! artifact.
//!
//! The bridge never lets a remote fault escape as an error: every public
//! operation returns an outcome the scheduler can turn into a failed job
//! while still releasing its lock. Configuration absence is checked before
//! any network call.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lane_protocol::{RemoteBuildRun, RunConclusion, RunStatus};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::RemoteBuildConfig;

/// Per-call HTTP deadline.
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Attempts at resolving the freshly dispatched run by recency.
const RUN_LOOKUP_ATTEMPTS: u32 = 3;

/// Outcome of a trigger call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Required remote configuration is absent; nothing was attempted.
    NotConfigured { missing: Vec<&'static str> },
    /// The remote API rejected the dispatch.
    Refused { message: String },
    /// Dispatch acknowledged. The run id is best-effort: the recency
    /// lookup can lose the race with the remote scheduler, in which case
    /// the caller must re-resolve before polling.
    Accepted { run_id: Option<u64> },
}

/// Outcome of a status poll.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Run(RemoteBuildRun),
    /// The poll itself failed; the run's last observed state stands.
    Unavailable { message: String },
}

/// Build parameters carried by the dispatch payload.
#[derive(Debug, Clone)]
pub struct BuildDispatch {
    pub app_id: String,
    pub app_name: String,
    pub package_name: String,
    pub website_url: String,
    pub version_code: i64,
}

#[derive(Deserialize)]
struct RunsPage {
    workflow_runs: Vec<RunRow>,
}

#[derive(Deserialize)]
struct RunRow {
    id: u64,
    status: Option<String>,
    conclusion: Option<String>,
    created_at: Option<String>,
}

#[derive(Deserialize)]
struct ArtifactsPage {
    artifacts: Vec<ArtifactRow>,
}

#[derive(Deserialize)]
struct ArtifactRow {
    archive_download_url: String,
}

/// Bridge to the remote workflow runner.
pub struct RemoteBuildBridge {
    config: RemoteBuildConfig,
    client: reqwest::blocking::Client,
    /// Pause between run-resolution attempts; shortened in tests.
    lookup_delay: Duration,
}

impl RemoteBuildBridge {
    pub fn new(config: RemoteBuildConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent("store-lane")
            .build()
            .unwrap_or_default();
        Self {
            config,
            client,
            lookup_delay: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = delay;
        self
    }

    fn repo_url(&self, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.config.api_base,
            self.config.owner.as_deref().unwrap_or(""),
            self.config.repo.as_deref().unwrap_or(""),
            tail
        )
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.config.token.as_deref().unwrap_or(""))
    }

    /// Dispatch a remote build and best-effort resolve its run id.
    pub fn trigger(&self, dispatch: &BuildDispatch) -> TriggerOutcome {
        if !self.config.is_configured() {
            return TriggerOutcome::NotConfigured {
                missing: self.config.missing_fields(),
            };
        }

        let dispatched_at = Utc::now();
        let url = self.repo_url(&format!(
            "actions/workflows/{}/dispatches",
            self.config.workflow
        ));
        let body = serde_json::json!({
            "ref": "main",
            "inputs": {
                "app_id": dispatch.app_id,
                "app_name": dispatch.app_name,
                "package_name": dispatch.package_name,
                "website_url": dispatch.website_url,
                "version_code": dispatch.version_code.to_string(),
                "callback_url": self.config.callback_url,
            }
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.bearer())
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send();

        match response {
            Ok(resp) if resp.status().is_success() => {
                debug!(app_id = %dispatch.app_id, "remote build dispatched");
            }
            Ok(resp) => {
                return TriggerOutcome::Refused {
                    message: format!("dispatch rejected (status {})", resp.status().as_u16()),
                };
            }
            Err(err) => {
                return TriggerOutcome::Refused {
                    message: format!("dispatch failed: {}", err),
                };
            }
        }

        // The acknowledgement carries no run id; look it up by recency.
        // A miss is legitimate (race with the remote scheduler) and the
        // caller falls back to a broader poll.
        for _ in 0..RUN_LOOKUP_ATTEMPTS {
            std::thread::sleep(self.lookup_delay);
            if let Some(run_id) = self.most_recent_run_since(dispatched_at) {
                return TriggerOutcome::Accepted {
                    run_id: Some(run_id),
                };
            }
        }
        TriggerOutcome::Accepted { run_id: None }
    }

    /// Most recent workflow-dispatch run, for callers re-resolving a run
    /// id the trigger could not pin down.
    pub fn resolve_recent_run(&self) -> Option<u64> {
        self.list_recent_runs()
            .into_iter()
            .map(|row| row.id)
            .next()
    }

    fn most_recent_run_since(&self, since: DateTime<Utc>) -> Option<u64> {
        // Tolerate modest clock skew between the lane and the remote end.
        let cutoff = since - chrono::Duration::seconds(30);
        self.list_recent_runs()
            .into_iter()
            .filter(|row| {
                row.created_at
                    .as_deref()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc) >= cutoff)
                    .unwrap_or(false)
            })
            .map(|row| row.id)
            .next()
    }

    fn list_recent_runs(&self) -> Vec<RunRow> {
        let url = self.repo_url("actions/runs?event=workflow_dispatch&per_page=5");
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.bearer())
            .header("Accept", "application/vnd.github+json")
            .send();
        match response.and_then(|r| r.error_for_status()) {
            Ok(resp) => match resp.json::<RunsPage>() {
                Ok(page) => page.workflow_runs,
                Err(err) => {
                    warn!(error = %err, "run listing body was malformed");
                    Vec::new()
                }
            },
            Err(err) => {
                warn!(error = %err, "run listing failed");
                Vec::new()
            }
        }
    }

    /// Idempotent, side-effect-free status read.
    pub fn poll_status(&self, run_id: u64) -> PollOutcome {
        let url = self.repo_url(&format!("actions/runs/{}", run_id));
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.bearer())
            .header("Accept", "application/vnd.github+json")
            .send();

        let resp = match response.and_then(|r| r.error_for_status()) {
            Ok(resp) => resp,
            Err(err) => {
                return PollOutcome::Unavailable {
                    message: format!("status poll failed: {}", err),
                }
            }
        };

        match resp.json::<RunRow>() {
            Ok(row) => {
                let status = RunStatus::from_remote(row.status.as_deref().unwrap_or(""));
                let conclusion = match status {
                    RunStatus::Completed => Some(RunConclusion::from_remote(
                        row.conclusion.as_deref().unwrap_or(""),
                    )),
                    _ => None,
                };
                PollOutcome::Run(RemoteBuildRun {
                    run_id: row.id,
                    status,
                    conclusion,
                })
            }
            Err(err) => PollOutcome::Unavailable {
                message: format!("status body was malformed: {}", err),
            },
        }
    }

    /// Download the completed run's artifact to `destination`. Returns
    /// `false` on any failure, leaving the destination path absent.
    pub fn fetch_artifact(&self, run_id: u64, destination: &Path) -> bool {
        let url = self.repo_url(&format!("actions/runs/{}/artifacts", run_id));
        let listing = self
            .client
            .get(&url)
            .header("Authorization", self.bearer())
            .header("Accept", "application/vnd.github+json")
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json::<ArtifactsPage>());

        let page = match listing {
            Ok(page) => page,
            Err(err) => {
                warn!(run_id, error = %err, "artifact listing failed");
                return false;
            }
        };

        // One artifact expected per run; take the first.
        let Some(artifact) = page.artifacts.first() else {
            warn!(run_id, "run produced no artifacts");
            return false;
        };

        let bytes = self
            .client
            .get(&artifact.archive_download_url)
            .header("Authorization", self.bearer())
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes());

        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(run_id, error = %err, "artifact download failed");
                return false;
            }
        };

        match write_atomically(destination, &bytes) {
            Ok(()) => true,
            Err(err) => {
                warn!(run_id, error = %err, "artifact write failed");
                let _ = std::fs::remove_file(destination);
                false
            }
        }
    }
}

/// Write via a sibling temp file then rename, so a failed download never
/// leaves a truncated artifact at the destination.
fn write_atomically(destination: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = destination.with_extension("part");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, destination)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_base: &str) -> RemoteBuildConfig {
        RemoteBuildConfig {
            owner: Some("acme".to_string()),
            repo: Some("builds".to_string()),
            token: Some("tok".to_string()),
            workflow: "build.yml".to_string(),
            callback_url: Some("https://lane.example/callback".to_string()),
            api_base: api_base.to_string(),
        }
    }

    fn bridge(server: &mockito::ServerGuard) -> RemoteBuildBridge {
        RemoteBuildBridge::new(config(&server.url()))
            .with_lookup_delay(Duration::from_millis(5))
    }

    #[test]
    fn test_unconfigured_trigger_makes_no_network_call() {
        let bridge = RemoteBuildBridge::new(RemoteBuildConfig {
            api_base: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        });
        let outcome = bridge.trigger(&BuildDispatch {
            app_id: "app-1".to_string(),
            app_name: "Demo".to_string(),
            package_name: "com.example.demo".to_string(),
            website_url: "https://demo.example".to_string(),
            version_code: 13,
        });
        match outcome {
            TriggerOutcome::NotConfigured { missing } => {
                assert_eq!(missing.len(), 4);
            }
            other => panic!("expected NotConfigured, got {other:?}"),
        }
    }

    #[test]
    fn test_trigger_resolves_run_by_recency() {
        let mut server = mockito::Server::new();
        let created = Utc::now().to_rfc3339();
        let _dispatch = server
            .mock(
                "POST",
                "/repos/acme/builds/actions/workflows/build.yml/dispatches",
            )
            .with_status(204)
            .create();
        let _runs = server
            .mock("GET", "/repos/acme/builds/actions/runs")
            .match_query(mockito::Matcher::Any)
            .with_body(format!(
                r#"{{"workflow_runs":[{{"id":4242,"status":"queued","conclusion":null,"created_at":"{created}"}}]}}"#
            ))
            .create();

        let outcome = bridge(&server).trigger(&BuildDispatch {
            app_id: "app-1".to_string(),
            app_name: "Demo".to_string(),
            package_name: "com.example.demo".to_string(),
            website_url: "https://demo.example".to_string(),
            version_code: 13,
        });
        assert_eq!(outcome, TriggerOutcome::Accepted { run_id: Some(4242) });
    }

    #[test]
    fn test_trigger_with_unresolvable_run_is_still_accepted() {
        let mut server = mockito::Server::new();
        let _dispatch = server
            .mock(
                "POST",
                "/repos/acme/builds/actions/workflows/build.yml/dispatches",
            )
            .with_status(204)
            .create();
        let _runs = server
            .mock("GET", "/repos/acme/builds/actions/runs")
            .match_query(mockito::Matcher::Any)
            .with_body(r#"{"workflow_runs":[]}"#)
            .expect_at_least(3)
            .create();

        let outcome = bridge(&server).trigger(&BuildDispatch {
            app_id: "app-1".to_string(),
            app_name: "Demo".to_string(),
            package_name: "com.example.demo".to_string(),
            website_url: "https://demo.example".to_string(),
            version_code: 13,
        });
        // Not an error: the caller re-resolves before polling.
        assert_eq!(outcome, TriggerOutcome::Accepted { run_id: None });
    }

    #[test]
    fn test_refused_dispatch_is_reported_not_thrown() {
        let mut server = mockito::Server::new();
        let _dispatch = server
            .mock(
                "POST",
                "/repos/acme/builds/actions/workflows/build.yml/dispatches",
            )
            .with_status(422)
            .create();

        let outcome = bridge(&server).trigger(&BuildDispatch {
            app_id: "app-1".to_string(),
            app_name: "Demo".to_string(),
            package_name: "com.example.demo".to_string(),
            website_url: "https://demo.example".to_string(),
            version_code: 13,
        });
        match outcome {
            TriggerOutcome::Refused { message } => assert!(message.contains("422")),
            other => panic!("expected Refused, got {other:?}"),
        }
    }

    #[test]
    fn test_poll_maps_status_and_conclusion() {
        let mut server = mockito::Server::new();
        let _run = server
            .mock("GET", "/repos/acme/builds/actions/runs/4242")
            .with_body(r#"{"id":4242,"status":"completed","conclusion":"success"}"#)
            .create();

        match bridge(&server).poll_status(4242) {
            PollOutcome::Run(run) => {
                assert!(run.is_success());
            }
            PollOutcome::Unavailable { message } => panic!("unavailable: {message}"),
        }
    }

    #[test]
    fn test_poll_failure_is_unavailable_not_panic() {
        let mut server = mockito::Server::new();
        let _run = server
            .mock("GET", "/repos/acme/builds/actions/runs/4242")
            .with_status(500)
            .create();

        assert!(matches!(
            bridge(&server).poll_status(4242),
            PollOutcome::Unavailable { .. }
        ));
    }

    #[test]
    fn test_fetch_artifact_failure_leaves_destination_absent() {
        let mut server = mockito::Server::new();
        let _artifacts = server
            .mock("GET", "/repos/acme/builds/actions/runs/4242/artifacts")
            .with_body(r#"{"artifacts":[]}"#)
            .create();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("app.aab");
        assert!(!bridge(&server).fetch_artifact(4242, &dest));
        assert!(!dest.exists());
    }

    #[test]
    fn test_fetch_artifact_downloads_first_artifact() {
        let mut server = mockito::Server::new();
        let download_url = format!("{}/download/1", server.url());
        let _artifacts = server
            .mock("GET", "/repos/acme/builds/actions/runs/4242/artifacts")
            .with_body(format!(
                r#"{{"artifacts":[{{"archive_download_url":"{download_url}"}}]}}"#
            ))
            .create();
        let _download = server
            .mock("GET", "/download/1")
            .with_body(b"binary-bytes".as_slice())
            .create();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("app.aab");
        assert!(bridge(&server).fetch_artifact(4242, &dest));
        assert_eq!(std::fs::read(&dest).unwrap(), b"binary-bytes");
    }
}
