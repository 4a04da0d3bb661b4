//! Pipeline orchestration for the store lane.
//!
//! Drives one build request end to end: enqueue the job, win the app's
//! build lock, run the platform path (local generate+bundle, or remote
//! trigger/poll/download), inspect the produced binary, and attach the
//! verdict to the job. Publishes run separately under the publish lock;
//! build-then-publish ordering is enforced here by precondition, not by
//! the locks.
//!
//! Bridge and inspector faults never escape this module as panics; the
//! job always reaches a terminal state and the lock is always released.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lane_inspect::{ArtifactFormat, Inspector, InspectorInput, ToolRunner};
use lane_protocol::{AppRecord, BuildJob, JobState, LaneError, Platform};
use tracing::{info, warn};

use crate::bridge::{BuildDispatch, PollOutcome, RemoteBuildBridge, TriggerOutcome};
use crate::generator::{GeneratedArtifact, ProjectGenerator};
use crate::publish::{PublishCoordinator, PublishReceipt};
use crate::scheduler::{BuildScheduler, LockNamespace};

/// Pipeline timing knobs; shortened in tests.
#[derive(Debug, Clone, Copy)]
pub struct PipelineTiming {
    /// Pause between remote status polls.
    pub poll_interval: Duration,
    /// Overall wall-clock deadline for a remote build.
    pub remote_deadline: Duration,
}

impl Default for PipelineTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            remote_deadline: Duration::from_secs(900),
        }
    }
}

/// What a build path produced before inspection.
struct BuildOutput {
    artifact: GeneratedArtifact,
    logs: String,
}

/// The lane's top-level orchestrator.
pub struct BuildPipeline {
    scheduler: BuildScheduler,
    generator: ProjectGenerator,
    bridge: RemoteBuildBridge,
    inspector: Inspector,
    coordinator: PublishCoordinator,
    work_dir: PathBuf,
    timing: PipelineTiming,
}

impl BuildPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: BuildScheduler,
        generator: ProjectGenerator,
        bridge: RemoteBuildBridge,
        inspector: Inspector,
        coordinator: PublishCoordinator,
        work_dir: PathBuf,
        timing: PipelineTiming,
    ) -> Self {
        Self {
            scheduler,
            generator,
            bridge,
            inspector,
            coordinator,
            work_dir,
            timing,
        }
    }

    pub fn scheduler(&self) -> &BuildScheduler {
        &self.scheduler
    }

    /// Execute one build for an app/platform pair.
    ///
    /// Returns the terminal job row. A concurrent build for the same app
    /// surfaces as a LOCK_CONFLICT error before any work happens.
    pub fn execute_build(&self, app_id: &str, platform: Platform) -> Result<BuildJob, LaneError> {
        let app = self.scheduler.store().get_app(app_id).map_err(|_| {
            LaneError::app_not_found(app_id)
        })?;
        let job = self.scheduler.enqueue(app_id, platform)?;

        let lease = self.scheduler.lease_for(LockNamespace::Build);
        let guard = self.scheduler.acquire(LockNamespace::Build, app_id, lease)?;
        self.scheduler.mark_running(&job.id, &guard)?;
        info!(app_id, job_id = %job.id, %platform, attempt = job.attempts, "build started");

        // From here on every path must terminate the job; failures are
        // recorded, not propagated.
        let built = match platform {
            Platform::Web => self.run_local(&app),
            Platform::Android => self.run_remote(&app),
        };

        match built {
            Ok(output) => self.finish_with_artifact(&app, &job, output),
            Err(message) => self.finish_failed(&app, &job, &message, None),
        }?;

        guard.release();
        self.scheduler.store().get_job(&job.id).map_err(|_| LaneError::job_not_found(&job.id))
    }

    /// Local path: instantiate the template tree and run the bundler.
    fn run_local(&self, app: &AppRecord) -> Result<BuildOutput, String> {
        let project_dir = self.work_dir.join(&app.app_id).join("project");
        let artifact_path = self.work_dir.join(&app.app_id).join("app.zip");

        self.generator
            .generate(app, &project_dir)
            .map_err(|e| e.message)?;
        let artifact = self
            .generator
            .build_local(&project_dir, &artifact_path)
            .map_err(|e| e.message)?;
        Ok(BuildOutput {
            artifact,
            logs: "local bundle completed".to_string(),
        })
    }

    /// Remote path: dispatch, resolve the run, poll to conclusion, fetch.
    fn run_remote(&self, app: &AppRecord) -> Result<BuildOutput, String> {
        let dispatch = BuildDispatch {
            app_id: app.app_id.clone(),
            app_name: app.name.clone(),
            package_name: app.package_name.clone(),
            website_url: app.website_url.clone(),
            version_code: app.version_code + 1,
        };

        let mut run_id = match self.bridge.trigger(&dispatch) {
            TriggerOutcome::NotConfigured { missing } => {
                return Err(format!(
                    "remote build is not configured: {}",
                    missing.join(", ")
                ))
            }
            TriggerOutcome::Refused { message } => return Err(message),
            TriggerOutcome::Accepted { run_id } => run_id,
        };

        let deadline = Instant::now() + self.timing.remote_deadline;
        let mut logs = String::new();

        let run = loop {
            if Instant::now() >= deadline {
                // Polling stops; the job is left failed and the lock is
                // eligible for stale reclaim if we crashed instead.
                return Err("remote build did not finish before the deadline".to_string());
            }

            // Never poll without a run id; re-resolve first.
            let Some(id) = run_id else {
                std::thread::sleep(self.timing.poll_interval);
                run_id = self.bridge.resolve_recent_run();
                continue;
            };

            match self.bridge.poll_status(id) {
                PollOutcome::Run(run) if run.is_finished() => {
                    let conclusion = run.conclusion.unwrap_or(lane_protocol::RunConclusion::Unknown);
                    logs.push_str(&format!("remote run {} concluded: {}\n", id, conclusion));
                    if !run.is_success() {
                        return Err(format!("remote build concluded: {}", conclusion));
                    }
                    break id;
                }
                PollOutcome::Run(_) => {
                    std::thread::sleep(self.timing.poll_interval);
                }
                PollOutcome::Unavailable { message } => {
                    // Transient poll failure; the run's state stands.
                    warn!(run_id = id, %message, "status poll unavailable");
                    std::thread::sleep(self.timing.poll_interval);
                }
            }
        };

        let artifact_path = self.work_dir.join(&app.app_id).join("app.aab");
        if !self.bridge.fetch_artifact(run, &artifact_path) {
            return Err(format!("remote run {} produced no downloadable artifact", run));
        }
        let size = std::fs::metadata(&artifact_path)
            .map(|m| m.len() as i64)
            .map_err(|_| "downloaded artifact vanished".to_string())?;
        Ok(BuildOutput {
            artifact: GeneratedArtifact {
                path: artifact_path,
                mime: "application/octet-stream".to_string(),
                size,
            },
            logs,
        })
    }

    /// Inspect the produced binary and attach the verdict to the job.
    fn finish_with_artifact(
        &self,
        app: &AppRecord,
        job: &BuildJob,
        output: BuildOutput,
    ) -> Result<(), LaneError> {
        let verdict = self.inspector.inspect(&InspectorInput {
            artifact: output.artifact.path.clone(),
            format: ArtifactFormat::from_path(&output.artifact.path),
            expected_package: app.package_name.clone(),
            previous_version_code: (app.version_code > 0).then_some(app.version_code),
        });

        let mut logs = output.logs;
        if let Some(digest) = artifact_digest(&output.artifact.path) {
            logs.push_str(&format!("artifact sha256: {}\n", digest));
        }
        for warning in &verdict.warnings {
            logs.push_str(&format!("warning: {}\n", warning));
        }

        if verdict.valid {
            self.scheduler.store().record_artifact(
                &app.app_id,
                &output.artifact.path.display().to_string(),
                &output.artifact.mime,
                output.artifact.size,
                Some(&logs),
            ).map_err(|e| LaneError::store(e.to_string()))?;
            self.scheduler.mark_terminal(&job.id, JobState::Succeeded, None)?;
            info!(app_id = %app.app_id, job_id = %job.id, "build succeeded");
            Ok(())
        } else {
            // Job error strings lead with the stable code so operators can
            // grep for validation failures across apps.
            let err = LaneError::new(
                lane_protocol::ErrorCode::ValidationFailed,
                verdict.errors.join("; "),
            );
            self.finish_failed(app, job, &err.to_string(), Some(&logs))
        }
    }

    fn finish_failed(
        &self,
        app: &AppRecord,
        job: &BuildJob,
        message: &str,
        logs: Option<&str>,
    ) -> Result<(), LaneError> {
        warn!(app_id = %app.app_id, job_id = %job.id, message, "build failed");
        self.scheduler
            .store()
            .record_build_failure(&app.app_id, message, logs)
            .map_err(|e| LaneError::store(e.to_string()))?;
        self.scheduler
            .mark_terminal(&job.id, JobState::Failed, Some(message))
    }

    /// Publish the app's current artifact.
    ///
    /// Precondition (caller-enforced ordering): the latest Android build
    /// for the app must have succeeded. An open build is a conflict; no
    /// build at all (or a failed one) is an invalid request. The publish
    /// lock does not imply the build lock and vice versa.
    pub fn publish(&self, app_id: &str) -> Result<PublishReceipt, LaneError> {
        let app = self
            .scheduler
            .store()
            .get_app(app_id)
            .map_err(|_| LaneError::app_not_found(app_id))?;

        let latest = self
            .scheduler
            .store()
            .latest_job(app_id, Platform::Android)
            .map_err(|e| LaneError::store(e.to_string()))?;
        match latest {
            Some(job) if job.state == JobState::Succeeded => {}
            // A build in flight means the artifact is about to change;
            // reject with the conflict code so callers retry after it,
            // instead of treating this as a hard failure.
            Some(job) if !job.state.is_terminal() => {
                return Err(LaneError::conflict("build", app_id))
            }
            _ => {
                return Err(LaneError::invalid_request(
                    "publish requires a prior successful build",
                ))
            }
        }

        let receipt = self.coordinator.publish(&self.scheduler, &app)?;
        self.scheduler
            .store()
            .record_published_version(app_id, receipt.version_code)
            .map_err(|e| LaneError::store(e.to_string()))?;
        Ok(receipt)
    }
}

/// Content digest recorded in the build logs, so a published binary can
/// be matched back to the exact bytes the lane inspected.
fn artifact_digest(path: &std::path::Path) -> Option<String> {
    use sha2::{Digest, Sha256};
    let bytes = std::fs::read(path).ok()?;
    Some(hex::encode(Sha256::digest(&bytes)))
}

/// Convenience constructor used by the CLI: wires every component from a
/// [`crate::config::LaneConfig`] with the real tool runner.
pub fn pipeline_from_config(config: &crate::config::LaneConfig) -> Result<BuildPipeline, LaneError> {
    use lane_store::{JobStore, MemoryLocks};

    let store = match &config.db_path {
        Some(path) => JobStore::open(path).map_err(|e| LaneError::store(e.to_string()))?,
        None => JobStore::open_in_memory().map_err(|e| LaneError::store(e.to_string()))?,
    };
    let locks: Arc<dyn lane_store::LockBackend> = match &config.db_path {
        Some(path) => {
            let lock_path = path.with_extension("locks.db");
            Arc::new(lane_store::SqliteLocks::open(&lock_path).map_err(|e| LaneError::store(e.to_string()))?)
        }
        None => Arc::new(MemoryLocks::new()),
    };
    let scheduler = BuildScheduler::new(store, locks, config.locks);

    let runner: Arc<dyn ToolRunner> = Arc::new(lane_inspect::SystemToolRunner);
    let generator = ProjectGenerator::new(
        config.template_dir.clone(),
        config.tools.bundler.clone(),
        Arc::clone(&runner),
    );
    let bridge = RemoteBuildBridge::new(config.remote.clone());
    let inspector_config = lane_inspect::InspectorConfig {
        bundletool: config.tools.bundletool.clone(),
        aapt2: config.tools.aapt2.clone(),
        apksigner: config.tools.apksigner.clone(),
        jarsigner: config.tools.jarsigner.clone(),
        ..lane_inspect::InspectorConfig::default()
    };
    let inspector = Inspector::new(inspector_config, Arc::clone(&runner));
    let coordinator = PublishCoordinator::new(config.publisher.clone());

    Ok(BuildPipeline::new(
        scheduler,
        generator,
        bridge,
        inspector,
        coordinator,
        config.work_dir.clone(),
        PipelineTiming::default(),
    ))
}
