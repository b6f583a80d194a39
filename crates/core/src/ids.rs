//! Resource type identity: `ResourceTypeId` and its on-disk projection,
//! `GroupResource`.

use std::fmt;

/// A (group, version, resource) triple addressable through the cluster's
/// dynamic API. Two IDs are equal iff all three components match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ResourceTypeId {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl ResourceTypeId {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), resource: resource.into() }
    }

    /// The on-disk grouping key: (group, resource), dropping version.
    pub fn group_resource(&self) -> GroupResource {
        GroupResource { group: self.group.clone(), resource: self.resource.clone() }
    }
}

impl fmt::Display for ResourceTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

/// The (group, resource-name) pair used as the on-disk directory basename.
///
/// `Display` follows the same convention `kubectl api-resources` uses:
/// a bare resource name for the core group, `resource.group` otherwise.
/// This keeps directory names recognizable to anyone used to reading
/// Kubernetes API output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), resource: resource.into() }
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}
