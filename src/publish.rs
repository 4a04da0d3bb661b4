//! Publish coordinator.
//!
//! Drives the storefront's four-step publish protocol — create edit,
//! upload bundle, assign track, commit — exactly once per call, under the
//! app's publish lock. The protocol is not atomic: any step failing aborts
//! the attempt and the edit session is simply abandoned (store-side
//! garbage, invisible to end users until a commit).

use std::path::Path;
use std::time::Duration;

use lane_protocol::{AppRecord, LaneError};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::PublisherConfig;
use crate::credentials::CredentialResolver;
use crate::scheduler::{BuildScheduler, LockNamespace};

/// Deadline for publish API calls; the bundle upload streams a binary, so
/// this is the lane's longest remote call.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(60);

/// What a successful publish returns to the caller.
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    pub package_name: String,
    pub version_code: i64,
    pub track: String,
    pub track_url: String,
}

#[derive(Deserialize)]
struct EditSession {
    id: String,
}

#[derive(Deserialize)]
struct UploadedBundle {
    #[serde(rename = "versionCode")]
    version_code: Option<i64>,
}

/// Coordinates publishes against the storefront publisher API.
pub struct PublishCoordinator {
    publisher: PublisherConfig,
    resolver: CredentialResolver,
    client: reqwest::blocking::Client,
}

impl PublishCoordinator {
    pub fn new(publisher: PublisherConfig) -> Self {
        let resolver = CredentialResolver::new(publisher.clone());
        let client = reqwest::blocking::Client::builder()
            .timeout(PUBLISH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            publisher,
            resolver,
            client,
        }
    }

    /// Publish the app's current artifact to the configured track.
    ///
    /// Credential resolution and the whole remote sequence run inside the
    /// app's publish lock; a concurrent publish for the same app fails
    /// with LOCK_CONFLICT rather than queueing.
    pub fn publish(
        &self,
        scheduler: &BuildScheduler,
        app: &AppRecord,
    ) -> Result<PublishReceipt, LaneError> {
        let artifact = app
            .artifact_path
            .as_deref()
            .ok_or_else(|| LaneError::artifact_missing("app has no built artifact"))?;
        if !Path::new(artifact).is_file() {
            return Err(LaneError::artifact_missing(artifact));
        }

        // Credentials are resolved under the lock: a conflicting publish
        // never mints a bearer it cannot use.
        let lease = scheduler.lease_for(LockNamespace::Publish);
        scheduler.run_exclusive(LockNamespace::Publish, &app.app_id, lease, |_| {
            let credentials = self
                .resolver
                .resolve(&app.app_id, app.publish_token_enc.as_deref())?;
            debug!(app_id = %app.app_id, kind = credentials.kind(), "publish credentials resolved");
            let bearer = self.resolver.mint_bearer(&credentials)?;
            self.publish_steps(app, artifact, &bearer)
        })
    }

    fn publish_steps(
        &self,
        app: &AppRecord,
        artifact: &str,
        bearer: &str,
    ) -> Result<PublishReceipt, LaneError> {
        let package = &app.package_name;

        // Step 1: open an edit session scoped to the package.
        let edit: EditSession = self.post_json(
            &format!(
                "{}/androidpublisher/v3/applications/{}/edits",
                self.publisher.api_base, package
            ),
            bearer,
            None,
            "edit insert",
        )?;

        // Step 2: stream the binary into the session. No version code in
        // the response means the upload did not happen.
        let file = std::fs::File::open(artifact)
            .map_err(|_| LaneError::artifact_missing(artifact))?;
        let upload_url = format!(
            "{}/upload/androidpublisher/v3/applications/{}/edits/{}/bundles",
            self.publisher.api_base, package, edit.id
        );
        let response = self
            .client
            .post(&upload_url)
            .bearer_auth(bearer)
            .header("Content-Type", "application/octet-stream")
            .body(file)
            .send()
            .map_err(|e| LaneError::upstream(&format!("bundle upload: {}", e), None))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LaneError::upstream("bundle upload", Some(status.as_u16())));
        }
        let uploaded: UploadedBundle = response
            .json()
            .map_err(|_| LaneError::upstream("bundle upload body", Some(status.as_u16())))?;
        let version_code = match uploaded.version_code {
            Some(v) if v > 0 => v,
            _ => {
                return Err(LaneError::upstream(
                    "bundle upload returned no version code",
                    Some(status.as_u16()),
                ))
            }
        };

        // Step 3: assign the uploaded version to the track.
        let release_name = format!("{} ({})", app.name, version_code);
        let track_body = serde_json::json!({
            "track": self.publisher.track,
            "releases": [{
                "name": release_name,
                "versionCodes": [version_code.to_string()],
                "status": "completed",
            }]
        });
        let track_url = format!(
            "{}/androidpublisher/v3/applications/{}/edits/{}/tracks/{}",
            self.publisher.api_base, package, edit.id, self.publisher.track
        );
        let response = self
            .client
            .put(&track_url)
            .bearer_auth(bearer)
            .json(&track_body)
            .send()
            .map_err(|e| LaneError::upstream(&format!("track update: {}", e), None))?;
        if !response.status().is_success() {
            return Err(LaneError::upstream(
                "track update",
                Some(response.status().as_u16()),
            ));
        }

        // Step 4: commit the edit, making the assignment effective.
        let _: EditSession = self.post_json(
            &format!(
                "{}/androidpublisher/v3/applications/{}/edits/{}:commit",
                self.publisher.api_base, package, edit.id
            ),
            bearer,
            None,
            "edit commit",
        )?;

        info!(app_id = %app.app_id, version_code, track = %self.publisher.track, "published");
        Ok(PublishReceipt {
            package_name: package.clone(),
            version_code,
            track: self.publisher.track.clone(),
            track_url: format!(
                "https://play.google.com/console/developers/app/{}/tracks/{}",
                package, self.publisher.track
            ),
        })
    }

    fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        bearer: &str,
        body: Option<&serde_json::Value>,
        context: &str,
    ) -> Result<T, LaneError> {
        let mut request = self.client.post(url).bearer_auth(bearer);
        if let Some(body) = body {
            request = request.json(body);
        } else {
            request = request.header("Content-Length", "0");
        }
        let response = request
            .send()
            .map_err(|e| LaneError::upstream(&format!("{}: {}", context, e), None))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LaneError::upstream(context, Some(status.as_u16())));
        }
        response
            .json()
            .map_err(|_| LaneError::upstream(&format!("{} body", context), Some(status.as_u16())))
    }
}
