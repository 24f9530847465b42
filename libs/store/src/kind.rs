//! Resource kinds addressed by the store.

use std::fmt;

use crate::error::{StoreError, StoreResult};

/// A kind of cluster object, with enough detail to build its REST path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    /// API group; empty for the core group.
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    /// Lower-case plural used in REST paths.
    pub plural: &'static str,
}

impl ResourceKind {
    /// Core `v1` ConfigMap, the home of semaphore capacity records.
    pub const CONFIG_MAP: ResourceKind = ResourceKind {
        group: "",
        version: "v1",
        kind: "ConfigMap",
        plural: "configmaps",
    };

    /// Argo `Workflow`.
    pub const WORKFLOW: ResourceKind = ResourceKind {
        group: "argoproj.io",
        version: "v1alpha1",
        kind: "Workflow",
        plural: "workflows",
    };

    /// The `apiVersion` string (`v1` or `group/version`).
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// REST path segments of the namespaced collection, or of one object
    /// in it when `name` is set.
    ///
    /// Segments are returned raw; the caller percent-encodes them. Names
    /// that cannot stand as a single path segment are rejected.
    pub fn path_segments<'a>(
        &self,
        namespace: &'a str,
        name: Option<&'a str>,
    ) -> StoreResult<Vec<&'a str>> {
        check_segment("namespace", namespace)?;

        let mut segments = if self.group.is_empty() {
            vec!["api", self.version]
        } else {
            vec!["apis", self.group, self.version]
        };
        segments.extend(["namespaces", namespace, self.plural]);

        if let Some(name) = name {
            check_segment("name", name)?;
            segments.push(name);
        }
        Ok(segments)
    }
}

/// The API server refuses these as object names; in a URL they would
/// address a different resource.
fn check_segment(field: &'static str, value: &str) -> StoreResult<()> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('%');
    if invalid {
        return Err(StoreError::InvalidName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}
