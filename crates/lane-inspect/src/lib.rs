//! Artifact inspector.
//!
//! Given a packaged binary, the inspector extracts manifest metadata and
//! evaluates store-readiness policy, producing one [`ValidationResult`].
//!
//! Two inspection backends exist with incompatible text outputs: the
//! bundle dump tool (XML-ish element/attribute text) and the package
//! badging tool (`key='value'` lines). Backend selection follows the
//! artifact format with a fallback to the other backend; both failing is
//! a tooling error, distinct from a policy failure.
//!
//! The inspector is a terminal boundary for its own faults: `inspect`
//! always returns a result, never an error.

pub mod backend;
pub mod inspector;
pub mod parser;
pub mod policy;
pub mod result;
pub mod tool;

pub use backend::{BadgingBackend, BundleDumpBackend, ManifestBackend};
pub use inspector::{ArtifactFormat, Inspector, InspectorConfig, InspectorInput};
pub use result::{ArtifactMetadata, ValidationResult};
pub use tool::{SystemToolRunner, ToolError, ToolOutput, ToolRunner};
