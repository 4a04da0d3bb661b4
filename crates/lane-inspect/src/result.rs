//! Inspection result types.

use serde::{Deserialize, Serialize};

/// Normalized manifest metadata, regardless of which backend produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_sdk: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_sdk: Option<i64>,
    #[serde(default)]
    pub debuggable: bool,
    /// Deduplicated, in first-seen order.
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl ArtifactMetadata {
    /// True when the parse recovered enough to identify the package.
    /// Drives the backend fallback decision.
    pub fn has_identity(&self) -> bool {
        self.package_name.is_some()
    }

    /// Record a permission, preserving first-seen order without duplicates.
    pub fn push_permission(&mut self, name: &str) {
        if !name.is_empty() && !self.permissions.iter().any(|p| p == name) {
            self.permissions.push(name.to_string());
        }
    }
}

/// Outcome of one inspection call. Produced fresh per call; attached to
/// the job/app record by the caller, never persisted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ArtifactMetadata>,
}

impl ValidationResult {
    /// An invalid result with a single error and no metadata.
    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![error.into()],
            warnings: Vec::new(),
            metadata: None,
        }
    }

    /// Build a result from accumulated policy findings. Warnings never
    /// affect validity.
    pub fn from_findings(
        errors: Vec<String>,
        warnings: Vec<String>,
        metadata: ArtifactMetadata,
    ) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
            metadata: Some(metadata),
        }
    }
}
