//! End-to-end pipeline behavior over the remote build path.
//!
//! One mockito server plays both remote ends: the workflow runner
//! (dispatch, run listing, status, artifact download) and the storefront
//! publisher API. The run listing only carries a stale timestamp, so the
//! trigger cannot pin the run id and the pipeline has to re-resolve it
//! before polling.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use age::secrecy::ExposeSecret;
use lane_inspect::{Inspector, InspectorConfig, ToolError, ToolOutput, ToolRunner};
use lane_protocol::{AppRecord, JobState, Platform};
use lane_store::{JobStore, MemoryLocks};
use store_lane::bridge::RemoteBuildBridge;
use store_lane::config::{LockConfig, PublisherConfig, RemoteBuildConfig};
use store_lane::credentials::encrypt_refresh_token;
use store_lane::generator::ProjectGenerator;
use store_lane::pipeline::{BuildPipeline, PipelineTiming};
use store_lane::publish::PublishCoordinator;
use store_lane::scheduler::BuildScheduler;

const PACKAGE: &str = "com.example.demo";

const MANIFEST_OK: &str = r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example.demo" android:versionCode="1" android:versionName="1.0">
  <uses-sdk android:minSdkVersion="23" android:targetSdkVersion="34"/>
  <application android:label="Demo"/>
</manifest>
"#;

/// Plays the bundle dump tool and the signing verifier; the binary itself
/// comes from the mocked artifact download.
struct RemoteRunner;

impl ToolRunner for RemoteRunner {
    fn run(
        &self,
        program: &str,
        _args: &[&str],
        _timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        match program {
            "bundletool" => Ok(ToolOutput {
                stdout: MANIFEST_OK.to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            }),
            "jarsigner" => Ok(ToolOutput {
                stdout: "jar verified.".to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            }),
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}

fn pipeline(server: &mockito::ServerGuard, work: &Path, key: &str) -> BuildPipeline {
    let blob = encrypt_refresh_token(key, "refresh-123").unwrap();
    let mut app = AppRecord::new("app-1", "Demo", PACKAGE, "https://demo.example");
    app.publish_token_enc = Some(blob);

    let store = JobStore::open_in_memory().unwrap();
    store.upsert_app(&app).unwrap();
    let lock_config = LockConfig {
        acquire_timeout: Duration::from_millis(100),
        build_lease: Duration::from_secs(30),
        publish_lease: Duration::from_secs(10),
    };
    let scheduler = BuildScheduler::new(store, Arc::new(MemoryLocks::new()), lock_config);

    let runner: Arc<dyn ToolRunner> = Arc::new(RemoteRunner);
    let generator = ProjectGenerator::new(work.join("templates"), "bundler", Arc::clone(&runner));
    let inspector = Inspector::new(InspectorConfig::default(), Arc::clone(&runner));
    let bridge = RemoteBuildBridge::new(RemoteBuildConfig {
        owner: Some("acme".to_string()),
        repo: Some("builds".to_string()),
        token: Some("tok".to_string()),
        workflow: "build.yml".to_string(),
        callback_url: Some("https://lane.example/callback".to_string()),
        api_base: server.url(),
    });
    let coordinator = PublishCoordinator::new(PublisherConfig {
        token_decryption_key: Some(key.to_string()),
        oauth_client_id: Some("client-id".to_string()),
        oauth_client_secret: Some("client-secret".to_string()),
        api_base: server.url(),
        token_url: format!("{}/token", server.url()),
        track: "internal".to_string(),
        ..Default::default()
    });

    BuildPipeline::new(
        scheduler,
        generator,
        bridge,
        inspector,
        coordinator,
        work.to_path_buf(),
        PipelineTiming {
            poll_interval: Duration::from_millis(10),
            remote_deadline: Duration::from_secs(10),
        },
    )
}

#[test]
fn test_remote_build_then_publish_end_to_end() {
    let mut server = mockito::Server::new();
    let work = tempfile::tempdir().unwrap();

    let identity = age::x25519::Identity::generate();
    let key = identity.to_string().expose_secret().to_string();

    // Remote runner half.
    let dispatch = server
        .mock(
            "POST",
            "/repos/acme/builds/actions/workflows/build.yml/dispatches",
        )
        .with_status(204)
        .create();
    // The only visible run predates the dispatch, so the trigger's
    // recency lookup misses and the pipeline must re-resolve it.
    let runs = server
        .mock("GET", "/repos/acme/builds/actions/runs")
        .match_query(mockito::Matcher::Any)
        .with_body(
            r#"{"workflow_runs":[{"id":4242,"status":"in_progress","conclusion":null,"created_at":"2024-05-01T00:00:00Z"}]}"#,
        )
        .expect_at_least(4)
        .create();
    let status = server
        .mock("GET", "/repos/acme/builds/actions/runs/4242")
        .with_body(r#"{"id":4242,"status":"completed","conclusion":"success"}"#)
        .create();
    let download_url = format!("{}/download/7", server.url());
    let artifacts = server
        .mock("GET", "/repos/acme/builds/actions/runs/4242/artifacts")
        .with_body(format!(
            r#"{{"artifacts":[{{"archive_download_url":"{download_url}"}}]}}"#
        ))
        .create();
    let download = server
        .mock("GET", "/download/7")
        .with_body(b"aab-bytes".as_slice())
        .create();

    let pipeline = pipeline(&server, work.path(), &key);
    let job = pipeline.execute_build("app-1", Platform::Android).unwrap();
    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.platform, Platform::Android);

    dispatch.assert();
    runs.assert();
    status.assert();
    artifacts.assert();
    download.assert();

    let app = pipeline.scheduler().store().get_app("app-1").unwrap();
    assert!(app
        .artifact_path
        .as_deref()
        .unwrap_or("")
        .ends_with("app.aab"));
    assert_eq!(app.artifact_size, Some("aab-bytes".len() as i64));
    assert!(app
        .build_logs
        .as_deref()
        .unwrap_or("")
        .contains("remote run 4242 concluded: success"));

    // Storefront half: the four-step publish rides on the recorded build.
    let token = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"tok-1","expires_in":3600}"#)
        .create();
    let edits = server
        .mock(
            "POST",
            format!("/androidpublisher/v3/applications/{}/edits", PACKAGE).as_str(),
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"edit-1"}"#)
        .create();
    let upload = server
        .mock(
            "POST",
            format!(
                "/upload/androidpublisher/v3/applications/{}/edits/edit-1/bundles",
                PACKAGE
            )
            .as_str(),
        )
        .match_header("authorization", "Bearer tok-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"versionCode":7}"#)
        .create();
    let track = server
        .mock(
            "PUT",
            format!(
                "/androidpublisher/v3/applications/{}/edits/edit-1/tracks/internal",
                PACKAGE
            )
            .as_str(),
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("{}")
        .create();
    let commit = server
        .mock(
            "POST",
            format!(
                "/androidpublisher/v3/applications/{}/edits/edit-1:commit",
                PACKAGE
            )
            .as_str(),
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"edit-1"}"#)
        .create();

    let receipt = pipeline.publish("app-1").unwrap();
    assert_eq!(receipt.version_code, 7);
    assert!(receipt.track_url.contains(PACKAGE));

    token.assert();
    edits.assert();
    upload.assert();
    track.assert();
    commit.assert();

    // The published version sticks to the app record.
    let after = pipeline.scheduler().store().get_app("app-1").unwrap();
    assert_eq!(after.version_code, 7);
}
