//! Backend output parsers.
//!
//! Both inspection tools emit semi-structured text, in mutually
//! incompatible shapes:
//!
//! - badging: one record per line, `key='value'` attribute pairs, e.g.
//!   `package: name='com.example.app' versionCode='12' versionName='1.2'`
//! - bundle dump: the manifest as XML-ish element/attribute text, e.g.
//!   `<manifest package="com.example.app" android:versionCode="12">`
//!
//! Parsing is tolerant: unrecognized lines are skipped, absent fields stay
//! `None`, and policy decides what absence means.

use crate::result::ArtifactMetadata;

/// Parse `aapt2 dump badging` style output.
pub fn parse_badging(raw: &str) -> ArtifactMetadata {
    let mut meta = ArtifactMetadata::default();

    for line in raw.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("package:") {
            if meta.package_name.is_none() {
                meta.package_name = quoted_attr(rest, "name");
            }
            if meta.version_code.is_none() {
                meta.version_code = quoted_attr(rest, "versionCode").and_then(|v| v.parse().ok());
            }
            if meta.version_name.is_none() {
                meta.version_name = quoted_attr(rest, "versionName");
            }
        } else if let Some(rest) = line.strip_prefix("sdkVersion:") {
            meta.min_sdk = bare_quoted(rest).and_then(|v| v.parse().ok());
        } else if let Some(rest) = line.strip_prefix("targetSdkVersion:") {
            meta.target_sdk = bare_quoted(rest).and_then(|v| v.parse().ok());
        } else if let Some(rest) = line.strip_prefix("uses-permission:") {
            if let Some(name) = quoted_attr(rest, "name") {
                meta.push_permission(&name);
            }
        } else if line == "application-debuggable" {
            meta.debuggable = true;
        }
    }

    meta
}

/// Parse bundle-tool `dump manifest` style output (manifest XML text).
pub fn parse_manifest_xml(raw: &str) -> ArtifactMetadata {
    let mut meta = ArtifactMetadata::default();

    for element in raw.split('<').skip(1) {
        let element = element.split('>').next().unwrap_or(element);
        let (tag, attrs) = match element.split_once(char::is_whitespace) {
            Some((tag, attrs)) => (tag, attrs),
            None => (element, ""),
        };

        match tag {
            "manifest" => {
                meta.package_name = xml_attr(attrs, "package").or(meta.package_name.take());
                if let Some(v) = xml_attr(attrs, "android:versionCode") {
                    meta.version_code = v.parse().ok();
                }
                if let Some(v) = xml_attr(attrs, "android:versionName") {
                    meta.version_name = Some(v);
                }
            }
            "uses-sdk" => {
                if let Some(v) = xml_attr(attrs, "android:minSdkVersion") {
                    meta.min_sdk = v.parse().ok();
                }
                if let Some(v) = xml_attr(attrs, "android:targetSdkVersion") {
                    meta.target_sdk = v.parse().ok();
                }
            }
            "uses-permission" => {
                if let Some(name) = xml_attr(attrs, "android:name") {
                    meta.push_permission(&name);
                }
            }
            "application" => {
                if xml_attr(attrs, "android:debuggable").as_deref() == Some("true") {
                    meta.debuggable = true;
                }
            }
            _ => {}
        }
    }

    meta
}

/// Extract `key='value'` from a badging record.
fn quoted_attr(record: &str, key: &str) -> Option<String> {
    let marker = format!("{}='", key);
    let start = record.find(&marker)? + marker.len();
    let rest = &record[start..];
    let end = rest.find('\'')?;
    Some(rest[..end].to_string())
}

/// Extract the first `'value'` on a record (used for `sdkVersion:'21'`).
fn bare_quoted(record: &str) -> Option<&str> {
    let start = record.find('\'')? + 1;
    let rest = &record[start..];
    let end = rest.find('\'')?;
    Some(&rest[..end])
}

/// Extract `key="value"` from an XML attribute run.
fn xml_attr(attrs: &str, key: &str) -> Option<String> {
    let marker = format!("{}=\"", key);
    let start = attrs.find(&marker)? + marker.len();
    let rest = &attrs[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}
