//! Manifest extraction backends.
//!
//! Two concrete backends behind one `extract` contract, selected and
//! chained by the inspector's format-priority rules. Each backend owns
//! its tool invocation and its output parser.

use std::path::Path;
use std::time::Duration;

use crate::parser;
use crate::result::ArtifactMetadata;
use crate::tool::{ToolError, ToolRunner};

/// Backend extraction failures.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backing tool is not installed.
    #[error("{0}")]
    Unavailable(String),

    /// The tool ran and failed, or produced nothing usable.
    #[error("{0}")]
    Failed(String),
}

impl From<ToolError> for BackendError {
    fn from(err: ToolError) -> Self {
        if err.is_unavailable() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Failed(err.to_string())
        }
    }
}

/// One manifest extraction backend.
pub trait ManifestBackend: Send + Sync {
    /// Short backend name for logs and error messages.
    fn name(&self) -> &'static str;

    /// Invoke the tool against `artifact` and parse its output into the
    /// normalized metadata shape.
    fn extract(
        &self,
        runner: &dyn ToolRunner,
        artifact: &Path,
        timeout: Duration,
    ) -> Result<ArtifactMetadata, BackendError>;
}

/// Bundle dump tool: understands the bundle format, emits manifest XML text.
pub struct BundleDumpBackend {
    program: String,
}

impl BundleDumpBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for BundleDumpBackend {
    fn default() -> Self {
        Self::new("bundletool")
    }
}

impl ManifestBackend for BundleDumpBackend {
    fn name(&self) -> &'static str {
        "bundle-dump"
    }

    fn extract(
        &self,
        runner: &dyn ToolRunner,
        artifact: &Path,
        timeout: Duration,
    ) -> Result<ArtifactMetadata, BackendError> {
        let bundle_arg = format!("--bundle={}", artifact.display());
        let output = runner.run(&self.program, &["dump", "manifest", &bundle_arg], timeout)?;
        Ok(parser::parse_manifest_xml(&output.stdout))
    }
}

/// Package badging tool: understands the package format, emits
/// `key='value'` attribute lines.
pub struct BadgingBackend {
    program: String,
}

impl BadgingBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for BadgingBackend {
    fn default() -> Self {
        Self::new("aapt2")
    }
}

impl ManifestBackend for BadgingBackend {
    fn name(&self) -> &'static str {
        "badging"
    }

    fn extract(
        &self,
        runner: &dyn ToolRunner,
        artifact: &Path,
        timeout: Duration,
    ) -> Result<ArtifactMetadata, BackendError> {
        let path = artifact.display().to_string();
        let output = runner.run(&self.program, &["dump", "badging", &path], timeout)?;
        Ok(parser::parse_badging(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolOutput;

    struct ScriptedRunner {
        stdout: &'static str,
    }

    impl ToolRunner for ScriptedRunner {
        fn run(
            &self,
            _program: &str,
            _args: &[&str],
            _timeout: Duration,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput {
                stdout: self.stdout.to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }
    }

    #[test]
    fn test_badging_backend_parses_its_format() {
        let runner = ScriptedRunner {
            stdout: "package: name='a.b.c' versionCode='7' versionName='0.7'\n",
        };
        let backend = BadgingBackend::default();
        let meta = backend
            .extract(&runner, Path::new("/tmp/app.apk"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(meta.package_name.as_deref(), Some("a.b.c"));
        assert_eq!(meta.version_code, Some(7));
    }

    #[test]
    fn test_bundle_backend_parses_its_format() {
        let runner = ScriptedRunner {
            stdout: r#"<manifest package="a.b.c" android:versionCode="7"/>"#,
        };
        let backend = BundleDumpBackend::default();
        let meta = backend
            .extract(&runner, Path::new("/tmp/app.aab"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(meta.package_name.as_deref(), Some("a.b.c"));
        assert_eq!(meta.version_code, Some(7));
    }

    #[test]
    fn test_tool_absence_maps_to_unavailable() {
        struct MissingRunner;
        impl ToolRunner for MissingRunner {
            fn run(
                &self,
                program: &str,
                _args: &[&str],
                _timeout: Duration,
            ) -> Result<ToolOutput, ToolError> {
                Err(ToolError::NotFound(program.to_string()))
            }
        }

        let backend = BadgingBackend::default();
        let err = backend
            .extract(&MissingRunner, Path::new("/tmp/app.apk"), Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }
}
