//! Store-readiness policy.
//!
//! All rules are independent and accumulate; a result is valid when the
//! error list is empty. Warnings never affect validity.

use crate::result::ArtifactMetadata;

/// Lowest targetSdk the store currently accepts for new uploads.
pub const MIN_TARGET_SDK: i64 = 34;

/// minSdk below this draws a compatibility warning, never an error.
pub const WARN_MIN_SDK_BELOW: i64 = 23;

/// Permissions flagged for warning-level scrutiny. Matched against both
/// fully-qualified and short names.
pub const SENSITIVE_PERMISSIONS: &[&str] = &[
    "ACCESS_FINE_LOCATION",
    "ACCESS_COARSE_LOCATION",
    "ACCESS_BACKGROUND_LOCATION",
    "CAMERA",
    "RECORD_AUDIO",
    "READ_CONTACTS",
    "READ_CALL_LOG",
    "READ_SMS",
    "READ_PHONE_STATE",
    "BODY_SENSORS",
];

/// Accumulated policy findings.
#[derive(Debug, Default)]
pub struct Findings {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Evaluate store policy over normalized metadata.
///
/// `previous_version_code`, when supplied, is the last published version
/// number; the candidate must strictly exceed it.
pub fn evaluate(
    meta: &ArtifactMetadata,
    expected_package: &str,
    previous_version_code: Option<i64>,
) -> Findings {
    let mut findings = Findings::default();

    match meta.package_name.as_deref() {
        None => findings
            .errors
            .push("manifest has no package name".to_string()),
        Some(pkg) if pkg != expected_package => findings.errors.push(format!(
            "package name mismatch: manifest has '{}', expected '{}'",
            pkg, expected_package
        )),
        Some(_) => {}
    }

    match meta.version_code {
        None => findings
            .errors
            .push("manifest has no numeric versionCode".to_string()),
        Some(candidate) => {
            if let Some(previous) = previous_version_code {
                if candidate <= previous {
                    findings.errors.push(format!(
                        "versionCode {} must be greater than the previously published {}",
                        candidate, previous
                    ));
                }
            }
        }
    }

    match meta.target_sdk {
        None => findings
            .errors
            .push("manifest declares no targetSdkVersion".to_string()),
        Some(target) if target < MIN_TARGET_SDK => findings.errors.push(format!(
            "targetSdkVersion {} is below the store minimum {}",
            target, MIN_TARGET_SDK
        )),
        Some(_) => {}
    }

    if let Some(min) = meta.min_sdk {
        if min < WARN_MIN_SDK_BELOW {
            findings.warnings.push(format!(
                "minSdkVersion {} is below {}; very old devices will see this app",
                min, WARN_MIN_SDK_BELOW
            ));
        }
    }

    if meta.debuggable {
        findings
            .errors
            .push("application is debuggable; store uploads must not be".to_string());
    }

    for permission in &meta.permissions {
        if is_sensitive(permission) {
            findings.warnings.push(format!(
                "sensitive permission requested: {}",
                permission
            ));
        }
    }

    findings
}

/// Match a manifest permission against the sensitive set, accepting both
/// `android.permission.CAMERA` and bare `CAMERA` spellings.
pub fn is_sensitive(permission: &str) -> bool {
    let short = permission.rsplit('.').next().unwrap_or(permission);
    SENSITIVE_PERMISSIONS.contains(&short)
}
