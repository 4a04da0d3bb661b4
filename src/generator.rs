//! Platform project generator.
//!
//! Instantiates a template tree from an app configuration and, for the
//! locally-compilable platform, invokes the bundler toolchain to produce
//! one artifact. Feature-flag substitution is total: every flag in the
//! configuration must map to a placeholder in the template, and every
//! placeholder must have a value — an unmapped flag is a configuration
//! error, never a silent default.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lane_inspect::{ToolError, ToolRunner};
use lane_protocol::{AppRecord, LaneError};
use tracing::debug;
use walkdir::WalkDir;

/// Deadline for the local bundler invocation.
const BUNDLER_TIMEOUT: Duration = Duration::from_secs(120);

/// A produced local artifact.
#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    pub path: PathBuf,
    pub mime: String,
    pub size: i64,
}

/// Template-driven project generator.
pub struct ProjectGenerator {
    template_dir: PathBuf,
    bundler: String,
    runner: Arc<dyn ToolRunner>,
}

impl ProjectGenerator {
    pub fn new(template_dir: PathBuf, bundler: impl Into<String>, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            template_dir,
            bundler: bundler.into(),
            runner,
        }
    }

    /// Instantiate the template tree for `app` under `out_dir`.
    ///
    /// Deterministic: same app configuration, same tree. Text files go
    /// through placeholder substitution; anything non-UTF-8 is copied
    /// verbatim.
    pub fn generate(&self, app: &AppRecord, out_dir: &Path) -> Result<(), LaneError> {
        if !self.template_dir.is_dir() {
            return Err(LaneError::config_missing("project template directory"));
        }

        let values = substitution_values(app);
        let mut seen_feature_placeholders: BTreeSet<String> = BTreeSet::new();

        for entry in WalkDir::new(&self.template_dir) {
            let entry = entry.map_err(|e| LaneError::store(format!("template walk: {}", e)))?;
            let rel = entry
                .path()
                .strip_prefix(&self.template_dir)
                .map_err(|e| LaneError::store(format!("template walk: {}", e)))?;
            let dest = out_dir.join(rel);

            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&dest)
                    .map_err(|e| LaneError::store(format!("mkdir {}: {}", dest.display(), e)))?;
                continue;
            }

            let raw = std::fs::read(entry.path())
                .map_err(|e| LaneError::store(format!("read {}: {}", entry.path().display(), e)))?;
            match String::from_utf8(raw) {
                Ok(text) => {
                    let rendered = render(&text, &values, &mut seen_feature_placeholders)
                        .map_err(|message| {
                            LaneError::invalid_request(format!(
                                "{}: {}",
                                rel.display(),
                                message
                            ))
                        })?;
                    std::fs::write(&dest, rendered)
                        .map_err(|e| LaneError::store(format!("write {}: {}", dest.display(), e)))?;
                }
                Err(raw) => {
                    std::fs::write(&dest, raw.as_bytes())
                        .map_err(|e| LaneError::store(format!("write {}: {}", dest.display(), e)))?;
                }
            }
        }

        // Totality, other direction: a configured flag the template never
        // mentions is a build-configuration error.
        for flag in app.features.keys() {
            let placeholder = format!("feature.{}", flag);
            if !seen_feature_placeholders.contains(&placeholder) {
                return Err(LaneError::invalid_request(format!(
                    "feature flag '{}' has no placeholder in the project template",
                    flag
                )));
            }
        }

        debug!(app_id = %app.app_id, out = %out_dir.display(), "project generated");
        Ok(())
    }

    /// Run the local bundler over a generated project, producing one
    /// artifact, or report the tooling failure.
    pub fn build_local(
        &self,
        project_dir: &Path,
        artifact_out: &Path,
    ) -> Result<GeneratedArtifact, LaneError> {
        let project = project_dir.display().to_string();
        let output = artifact_out.display().to_string();
        let result = self.runner.run(
            &self.bundler,
            &["--project", &project, "--output", &output],
            BUNDLER_TIMEOUT,
        );

        match result {
            Ok(_) => {}
            Err(err @ ToolError::NotFound(_)) => {
                return Err(LaneError::new(
                    lane_protocol::ErrorCode::ToolingUnavailable,
                    err.to_string(),
                ))
            }
            Err(err) => {
                return Err(LaneError::invalid_request(format!(
                    "local build failed: {}",
                    err
                )))
            }
        }

        let size = std::fs::metadata(artifact_out)
            .map(|m| m.len() as i64)
            .map_err(|_| LaneError::artifact_missing(&output))?;
        Ok(GeneratedArtifact {
            path: artifact_out.to_path_buf(),
            mime: "application/zip".to_string(),
            size,
        })
    }
}

/// Substitution values derived from the app configuration. Feature flags
/// live under the `feature.` prefix.
fn substitution_values(app: &AppRecord) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    values.insert("app_name".to_string(), app.name.clone());
    values.insert("package_name".to_string(), app.package_name.clone());
    values.insert("website_url".to_string(), app.website_url.clone());
    values.insert("theme_color".to_string(), app.theme_color.clone());
    values.insert("version_code".to_string(), app.version_code.to_string());
    values.insert(
        "icon_glyph".to_string(),
        app.icon_glyph.clone().unwrap_or_default(),
    );
    for (flag, value) in &app.features {
        values.insert(format!("feature.{}", flag), value.clone());
    }
    values
}

/// Replace `{{key}}` placeholders. Unknown placeholders are errors.
fn render(
    text: &str,
    values: &BTreeMap<String, String>,
    seen_features: &mut BTreeSet<String>,
) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err("unterminated '{{' placeholder".to_string());
        };
        let key = after[..end].trim();
        match values.get(key) {
            Some(value) => out.push_str(value),
            None => return Err(format!("placeholder '{{{{{}}}}}' has no value", key)),
        }
        if key.starts_with("feature.") {
            seen_features.insert(key.to_string());
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lane_inspect::ToolOutput;

    struct NoopRunner;
    impl ToolRunner for NoopRunner {
        fn run(
            &self,
            _program: &str,
            _args: &[&str],
            _timeout: Duration,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }
    }

    fn app() -> AppRecord {
        let mut app = AppRecord::new("app-1", "Demo", "com.example.demo", "https://demo.example");
        app.features
            .insert("push".to_string(), "enabled".to_string());
        app
    }

    fn generator(template_dir: &Path) -> ProjectGenerator {
        ProjectGenerator::new(
            template_dir.to_path_buf(),
            "bundler",
            Arc::new(NoopRunner),
        )
    }

    #[test]
    fn test_generate_substitutes_placeholders() {
        let templates = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(templates.path().join("src")).unwrap();
        std::fs::write(
            templates.path().join("src/config.json"),
            r#"{"name":"{{app_name}}","pkg":"{{package_name}}","push":"{{feature.push}}"}"#,
        )
        .unwrap();

        let out = tempfile::tempdir().unwrap();
        generator(templates.path()).generate(&app(), out.path()).unwrap();

        let rendered = std::fs::read_to_string(out.path().join("src/config.json")).unwrap();
        assert_eq!(
            rendered,
            r#"{"name":"Demo","pkg":"com.example.demo","push":"enabled"}"#
        );
    }

    #[test]
    fn test_unmapped_flag_is_an_error_not_a_default() {
        let templates = tempfile::tempdir().unwrap();
        // Template mentions no feature placeholders at all.
        std::fs::write(templates.path().join("index.html"), "<title>{{app_name}}</title>").unwrap();

        let out = tempfile::tempdir().unwrap();
        let err = generator(templates.path())
            .generate(&app(), out.path())
            .unwrap_err();
        assert!(err.message.contains("feature flag 'push'"));
    }

    #[test]
    fn test_unknown_placeholder_is_an_error() {
        let templates = tempfile::tempdir().unwrap();
        std::fs::write(templates.path().join("a.txt"), "{{mystery_value}}").unwrap();

        let out = tempfile::tempdir().unwrap();
        let mut app = app();
        app.features.clear();
        let err = generator(templates.path()).generate(&app, out.path()).unwrap_err();
        assert!(err.message.contains("mystery_value"));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let templates = tempfile::tempdir().unwrap();
        std::fs::write(
            templates.path().join("a.txt"),
            "{{app_name}} {{feature.push}}",
        )
        .unwrap();

        let out1 = tempfile::tempdir().unwrap();
        let out2 = tempfile::tempdir().unwrap();
        let gen = generator(templates.path());
        gen.generate(&app(), out1.path()).unwrap();
        gen.generate(&app(), out2.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(out1.path().join("a.txt")).unwrap(),
            std::fs::read_to_string(out2.path().join("a.txt")).unwrap()
        );
    }

    #[test]
    fn test_missing_bundler_is_tooling_unavailable() {
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

        let templates = tempfile::tempdir().unwrap();
        let gen = ProjectGenerator::new(
            templates.path().to_path_buf(),
            "bundler",
            Arc::new(MissingRunner),
        );
        let out = tempfile::tempdir().unwrap();
        let err = gen
            .build_local(out.path(), &out.path().join("app.zip"))
            .unwrap_err();
        assert_eq!(err.code, lane_protocol::ErrorCode::ToolingUnavailable);
    }
}
