//! The inspector: existence check, backend chain, signing check, policy.
//!
//! `inspect` is a terminal boundary: whatever goes wrong internally, the
//! caller gets a structured [`ValidationResult`], never a propagated
//! error. The scheduler depends on that to terminate jobs cleanly.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{BackendError, BadgingBackend, BundleDumpBackend, ManifestBackend};
use crate::policy;
use crate::result::{ArtifactMetadata, ValidationResult};
use crate::tool::{ToolError, ToolRunner};

/// Declared artifact packaging format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// App bundle (`.aab`).
    Aab,
    /// Installable package (`.apk`).
    Apk,
}

impl ArtifactFormat {
    /// Infer from a file extension; defaults to bundle for unknown ones,
    /// the format the store prefers for uploads.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("apk") => Self::Apk,
            _ => Self::Aab,
        }
    }
}

/// Inspector tool configuration.
#[derive(Debug, Clone)]
pub struct InspectorConfig {
    pub bundletool: String,
    pub aapt2: String,
    pub apksigner: String,
    pub jarsigner: String,
    /// Deadline per external tool invocation.
    pub tool_timeout: Duration,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            bundletool: "bundletool".to_string(),
            aapt2: "aapt2".to_string(),
            apksigner: "apksigner".to_string(),
            jarsigner: "jarsigner".to_string(),
            tool_timeout: Duration::from_secs(20),
        }
    }
}

/// One inspection request.
#[derive(Debug, Clone)]
pub struct InspectorInput {
    pub artifact: PathBuf,
    pub format: ArtifactFormat,
    /// Package identifier the artifact must declare.
    pub expected_package: String,
    /// Last published version code, when one exists.
    pub previous_version_code: Option<i64>,
}

/// Artifact inspector.
pub struct Inspector {
    config: InspectorConfig,
    runner: Arc<dyn ToolRunner>,
}

enum SigningVerdict {
    Verified,
    Skipped(String),
    Rejected(String),
}

impl Inspector {
    pub fn new(config: InspectorConfig, runner: Arc<dyn ToolRunner>) -> Self {
        Self { config, runner }
    }

    /// Inspect an artifact. Always returns a result; internal faults
    /// become a generic invalid result.
    pub fn inspect(&self, input: &InspectorInput) -> ValidationResult {
        match catch_unwind(AssertUnwindSafe(|| self.inspect_inner(input))) {
            Ok(result) => result,
            Err(_) => ValidationResult::invalid("internal inspection failure"),
        }
    }

    fn inspect_inner(&self, input: &InspectorInput) -> ValidationResult {
        if !input.artifact.is_file() {
            return ValidationResult::invalid(format!(
                "artifact file not found: {}",
                input.artifact.display()
            ));
        }

        let metadata = match self.extract_metadata(input) {
            Ok(meta) => meta,
            Err(message) => return ValidationResult::invalid(message),
        };

        let mut findings = policy::evaluate(
            &metadata,
            &input.expected_package,
            input.previous_version_code,
        );

        match self.signing_check(input) {
            SigningVerdict::Verified => {}
            SigningVerdict::Skipped(reason) => findings
                .warnings
                .push(format!("signing check skipped: {}", reason)),
            SigningVerdict::Rejected(reason) => findings
                .errors
                .push(format!("signature verification failed: {}", reason)),
        }

        ValidationResult::from_findings(findings.errors, findings.warnings, metadata)
    }

    /// Run the preferred backend for the format, falling back to the other
    /// one. The first backend whose parse yields a package name wins; the
    /// fallback is consulted only when the primary produced no identity.
    fn extract_metadata(&self, input: &InspectorInput) -> Result<ArtifactMetadata, String> {
        let bundle = BundleDumpBackend::new(&self.config.bundletool);
        let badging = BadgingBackend::new(&self.config.aapt2);
        let chain: [&dyn ManifestBackend; 2] = match input.format {
            ArtifactFormat::Aab => [&bundle, &badging],
            ArtifactFormat::Apk => [&badging, &bundle],
        };

        let mut partial: Option<ArtifactMetadata> = None;
        let mut failures: Vec<String> = Vec::new();

        for backend in chain {
            match backend.extract(self.runner.as_ref(), &input.artifact, self.config.tool_timeout) {
                Ok(meta) if meta.has_identity() => return Ok(meta),
                Ok(meta) => {
                    // Parsed but anonymous; keep as last resort.
                    partial.get_or_insert(meta);
                }
                Err(BackendError::Unavailable(message))
                | Err(BackendError::Failed(message)) => {
                    failures.push(format!("{}: {}", backend.name(), message));
                }
            }
        }

        if let Some(meta) = partial {
            // Policy will report the missing identity fields.
            return Ok(meta);
        }

        Err(format!(
            "metadata extraction tooling unavailable: {}",
            failures.join("; ")
        ))
    }

    /// Best-effort signing verification. Tool absence degrades to a
    /// warning; the tool running and rejecting the artifact is a hard
    /// error.
    fn signing_check(&self, input: &InspectorInput) -> SigningVerdict {
        let path = input.artifact.display().to_string();
        let (program, args): (&str, Vec<&str>) = match input.format {
            ArtifactFormat::Apk => (&self.config.apksigner, vec!["verify", &path]),
            ArtifactFormat::Aab => (&self.config.jarsigner, vec!["-verify", &path]),
        };

        match self.runner.run(program, &args, self.config.tool_timeout) {
            Ok(_) => SigningVerdict::Verified,
            Err(ToolError::Failed { stderr, .. }) => SigningVerdict::Rejected(stderr),
            Err(err) => SigningVerdict::Skipped(err.to_string()),
        }
    }
}
