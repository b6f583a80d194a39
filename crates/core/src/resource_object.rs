//! `ResourceObject`: an opaque, self-describing document mirrored from the
//! cluster. Modeled as a JSON object so it can round-trip through both the
//! cluster client (which speaks JSON) and YAML serialization on disk.

use serde_json::{Map, Value};

use crate::error::FilterError;
use crate::fieldpath::FieldPathSet;

/// One entry of `metadata.managedFields`: which agent owns which paths.
#[derive(Debug, Clone)]
pub struct ManagedFieldsEntry {
    pub manager: String,
    pub field_set: FieldPathSet,
}

/// A live cluster object, as a mutable JSON document plus metadata
/// accessors. Mutating `payload` through `ResourceObject` methods is how
/// `Filter::strip_fields` removes fields before serialization.
#[derive(Debug, Clone)]
pub struct ResourceObject {
    pub payload: Map<String, Value>,
}

impl ResourceObject {
    /// Construct from an arbitrary JSON value, failing if the root is not
    /// an object — every well-formed Kubernetes object is a JSON mapping at
    /// the root, and nothing downstream can handle anything else.
    pub fn from_value(value: Value) -> Result<Self, FilterError> {
        match value {
            Value::Object(map) => Ok(Self { payload: map }),
            _ => Err(FilterError::RootNotMapping),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.payload)
    }

    fn metadata(&self) -> Option<&Map<String, Value>> {
        self.payload.get("metadata").and_then(Value::as_object)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().and_then(|m| m.get("namespace")).and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata().and_then(|m| m.get("name")).and_then(Value::as_str)
    }

    pub fn has_owner_references(&self) -> bool {
        self.metadata()
            .and_then(|m| m.get("ownerReferences"))
            .and_then(Value::as_array)
            .is_some_and(|refs| !refs.is_empty())
    }

    /// Parse `metadata.managedFields` into `ManagedFieldsEntry` values.
    /// Entries whose `fieldsV1` is absent or malformed are skipped rather
    /// than treated as an error: a missing fieldsV1 just contributes no
    /// paths to the union.
    pub fn managed_fields(&self) -> Vec<ManagedFieldsEntry> {
        let Some(entries) = self.metadata().and_then(|m| m.get("managedFields")).and_then(Value::as_array)
        else {
            return Vec::new();
        };

        entries
            .iter()
            .filter_map(|entry| {
                let manager = entry.get("manager")?.as_str()?.to_string();
                let fields_v1 = entry.get("fieldsV1")?;
                Some(ManagedFieldsEntry { manager, field_set: FieldPathSet::from_fields_v1(fields_v1) })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ResourceObject {
        ResourceObject::from_value(json!({
            "metadata": {
                "name": "app-cfg",
                "namespace": "prod",
                "ownerReferences": [],
                "managedFields": [
                    {
                        "manager": "kube-controller-manager",
                        "fieldsV1": { "f:status": {} }
                    },
                    {
                        "manager": "kubectl-client-side-apply",
                        "fieldsV1": { "f:data": {} }
                    }
                ]
            },
            "data": { "key": "value" }
        }))
        .unwrap()
    }

    #[test]
    fn root_must_be_mapping() {
        assert!(ResourceObject::from_value(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn accessors_read_metadata() {
        let obj = sample();
        assert_eq!(obj.namespace(), Some("prod"));
        assert_eq!(obj.name(), Some("app-cfg"));
        assert!(!obj.has_owner_references());
    }

    #[test]
    fn managed_fields_parses_all_entries() {
        let obj = sample();
        let entries = obj.managed_fields();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.manager == "kubectl-client-side-apply"));
    }
}
