//! Three fused concerns: dropping uninteresting resource
//! types, deciding whether an object should be projected at all, and
//! stripping machine-managed fields before serialization.

use std::path::{Path, PathBuf};

use crate::error::FilterError;
use crate::fieldpath::FieldPathSet;
use crate::ids::{GroupResource, ResourceTypeId};
use crate::resource_object::ResourceObject;

/// High-churn, low-value resource names dropped before any watcher is
/// ever constructed for them.
const DROPPED_RESOURCES: &[&str] = &["events", "nodes"];

/// Namespace whose objects are never projected (node-local leases churn
/// every renewal and carry no operator-relevant state).
const IGNORED_NAMESPACE: &str = "kube-node-lease";

/// Managers whose field ownership is preserved rather than stripped:
/// anything written via the `kubectl` family of commands is user-authored.
const PRESERVED_MANAGER_PREFIX: &str = "kubectl";

/// Drops resource types whose resource-name is high-churn/low-value.
pub fn gvrs(ids: Vec<ResourceTypeId>) -> Vec<ResourceTypeId> {
    ids.into_iter().filter(|id| !DROPPED_RESOURCES.contains(&id.resource.as_str())).collect()
}

/// True iff the object should never be projected to disk: it lives in the
/// ignored namespace, or it's owned by another object (owned objects are
/// reproduced by their owner and projecting them is pure commit churn).
pub fn should_not_write(obj: &ResourceObject) -> bool {
    obj.namespace() == Some(IGNORED_NAMESPACE) || obj.has_owner_references()
}

/// Strips fields from `obj.payload` in place. The removed set is the union
/// of the static policy `FieldFilterSet` and every managed-fields entry
/// whose manager does not start with `kubectl`. Monotonic: never adds
/// fields, only ever narrows the payload.
pub fn strip_fields(obj: &mut ResourceObject, policy: &FieldPathSet) -> Result<(), FilterError> {
    let mut managed_non_kubectl = FieldPathSet::new();
    for entry in obj.managed_fields() {
        if entry.manager.starts_with(PRESERVED_MANAGER_PREFIX) {
            continue;
        }
        managed_non_kubectl = managed_non_kubectl.union(entry.field_set);
    }

    let removal_set = policy.clone().union(managed_non_kubectl);
    remove_matching(&mut obj.payload, &removal_set, &mut Vec::new());
    Ok(())
}

fn remove_matching(
    map: &mut serde_json::Map<String, serde_json::Value>,
    removal_set: &FieldPathSet,
    path: &mut Vec<String>,
) {
    let keys: Vec<String> = map.keys().cloned().collect();
    for key in keys {
        path.push(key.clone());
        if removal_set.contains_prefix_of(path) {
            map.remove(&key);
        } else if let Some(nested) = map.get_mut(&key).and_then(serde_json::Value::as_object_mut) {
            remove_matching(nested, removal_set, path);
        }
        path.pop();
    }
}

/// Pure function deriving the on-disk path for an object:
/// `<namespace-or-_>/<group-resource>/<name>.yaml`.
pub fn resource_path(namespace: Option<&str>, group_resource: &GroupResource, name: &str) -> PathBuf {
    let namespace = namespace.filter(|n| !n.is_empty()).unwrap_or("_");
    Path::new(namespace).join(group_resource.to_string()).join(format!("{name}.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use yare::parameterized;

    #[parameterized(
        empty_namespace = { None, "app-cfg", "_/configmaps/app-cfg.yaml" },
        named_namespace = { Some("prod"), "app-cfg", "prod/configmaps/app-cfg.yaml" },
    )]
    fn resource_path_is_deterministic(namespace: Option<&str>, name: &str, expected: &str) {
        let gr = GroupResource::new("", "configmaps");
        assert_eq!(resource_path(namespace, &gr, name), PathBuf::from(expected));
    }

    #[test]
    fn resource_path_same_inputs_same_output() {
        let gr = GroupResource::new("apps", "deployments");
        let a = resource_path(Some("prod"), &gr, "web");
        let b = resource_path(Some("prod"), &gr, "web");
        assert_eq!(a, b);
    }

    #[test]
    fn gvrs_drops_events_and_nodes() {
        let ids = vec![
            ResourceTypeId::new("", "v1", "events"),
            ResourceTypeId::new("", "v1", "nodes"),
            ResourceTypeId::new("", "v1", "configmaps"),
        ];
        let filtered = gvrs(ids);
        assert_eq!(filtered, vec![ResourceTypeId::new("", "v1", "configmaps")]);
    }

    fn obj_with_owner() -> ResourceObject {
        ResourceObject::from_value(json!({
            "metadata": { "name": "rs", "ownerReferences": [{"kind": "Deployment", "name": "web"}] }
        }))
        .unwrap()
    }

    #[test]
    fn owned_objects_are_skipped() {
        assert!(should_not_write(&obj_with_owner()));
    }

    #[test]
    fn node_lease_namespace_is_skipped() {
        let obj = ResourceObject::from_value(json!({
            "metadata": { "name": "node-a", "namespace": "kube-node-lease" }
        }))
        .unwrap();
        assert!(should_not_write(&obj));
    }

    #[test]
    fn ordinary_namespaced_object_is_written() {
        let obj = ResourceObject::from_value(json!({
            "metadata": { "name": "app-cfg", "namespace": "prod" }
        }))
        .unwrap();
        assert!(!should_not_write(&obj));
    }

    #[test]
    fn strip_fields_is_monotonic_and_removes_policy_and_managed_paths() {
        let mut obj = ResourceObject::from_value(json!({
            "metadata": {
                "name": "app-cfg",
                "namespace": "prod",
                "creationTimestamp": "2026-01-01T00:00:00Z",
                "resourceVersion": "123",
                "managedFields": [
                    { "manager": "kube-controller-manager", "fieldsV1": { "f:status": {} } },
                    { "manager": "kubectl-client-side-apply", "fieldsV1": { "f:data": {} } }
                ]
            },
            "data": { "key": "value" },
            "status": { "phase": "Bound" }
        }))
        .unwrap();

        let before_keys: std::collections::BTreeSet<_> = obj.payload.keys().cloned().collect();

        let mut policy = FieldPathSet::new();
        policy.insert(&["metadata".to_string(), "creationTimestamp".to_string()]);
        policy.insert(&["metadata".to_string(), "resourceVersion".to_string()]);

        strip_fields(&mut obj, &policy).unwrap();

        // status was removed (owned by kube-controller-manager, a non-kubectl manager)
        assert!(!obj.payload.contains_key("status"));
        // data survives (owned by kubectl-client-side-apply)
        assert!(obj.payload.get("data").is_some());
        // policy-listed fields were removed
        let metadata = obj.payload.get("metadata").unwrap().as_object().unwrap();
        assert!(!metadata.contains_key("creationTimestamp"));
        assert!(!metadata.contains_key("resourceVersion"));
        assert!(metadata.contains_key("name"));

        let after_keys: std::collections::BTreeSet<_> = obj.payload.keys().cloned().collect();
        assert!(after_keys.is_subset(&before_keys), "strip_fields must never add top-level keys");
    }

    #[test]
    fn strip_fields_errors_are_impossible_once_constructed() {
        // ResourceObject::from_value already guarantees a mapping root, so
        // strip_fields cannot itself fail; this documents that contract.
        let mut obj = ResourceObject::from_value(json!({"metadata": {"name": "x"}})).unwrap();
        assert!(strip_fields(&mut obj, &FieldPathSet::new()).is_ok());
    }
}
