//! A simplified field-path set, used both for the static `FieldFilterSet`
//! policy and for the per-object union of managed-field paths.
//!
//! Real Kubernetes `managed-fields` entries encode paths using the
//! `structured-merge-diff` grammar (`f:` map keys, `k:`/`v:`/`i:` list and
//! set element selectors). We model the common `f:`-only case exactly as
//! a trie of map keys, and treat any other selector kind as an opaque leaf
//! segment rather than a list element — good enough to remove whole
//! controller-managed subtrees, not precise enough to target one element
//! of a list.

use std::collections::BTreeMap;
use serde_json::Value;

/// A trie over dotted path segments. A node with `leaf = true` means "this
/// path and everything beneath it is a member of the set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPathSet {
    leaf: bool,
    children: BTreeMap<String, FieldPathSet>,
}

impl FieldPathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a path (sequence of map-key segments) into the set.
    pub fn insert(&mut self, path: &[String]) {
        match path.split_first() {
            None => self.leaf = true,
            Some((head, rest)) => self.children.entry(head.clone()).or_default().insert(rest),
        }
    }

    /// Union of `self` and `other`, consuming both.
    pub fn union(mut self, other: FieldPathSet) -> FieldPathSet {
        self.leaf = self.leaf || other.leaf;
        for (key, child) in other.children {
            self.children
                .entry(key)
                .and_modify(|existing| {
                    let taken = std::mem::take(existing);
                    *existing = taken.union(child.clone());
                })
                .or_insert(child);
        }
        self
    }

    /// True if this path (or an ancestor of it) is in the set.
    pub fn contains_prefix_of(&self, path: &[String]) -> bool {
        if self.leaf {
            return true;
        }
        match path.split_first() {
            None => false,
            Some((head, rest)) => {
                self.children.get(head).is_some_and(|child| child.contains_prefix_of(rest))
            }
        }
    }

    /// Parse a nested YAML/JSON value into a `FieldPathSet`. A leaf is any
    /// value that is not a non-empty mapping (the policy file convention is
    /// an empty mapping `{}` at the removal target, matching how
    /// `fieldpath.Set`'s JSON form marks a leaf).
    pub fn from_json(value: &Value) -> FieldPathSet {
        let mut set = FieldPathSet::new();
        collect_leaves(value, &mut Vec::new(), &mut set);
        set
    }

    /// Parse one real Kubernetes `FieldsV1` JSON document (the `f:`/`k:`/
    /// `v:`/`i:`-prefixed structure) into a `FieldPathSet`, stripping the
    /// `f:` prefix from map-key segments and collapsing any other prefix
    /// kind into an atomic leaf at that point.
    pub fn from_fields_v1(value: &Value) -> FieldPathSet {
        let mut set = FieldPathSet::new();
        collect_fields_v1(value, &mut Vec::new(), &mut set);
        set
    }

    pub fn is_empty(&self) -> bool {
        !self.leaf && self.children.is_empty()
    }
}

fn collect_leaves(value: &Value, path: &mut Vec<String>, out: &mut FieldPathSet) {
    match value.as_object() {
        Some(map) if !map.is_empty() => {
            for (key, child) in map {
                path.push(key.clone());
                collect_leaves(child, path, out);
                path.pop();
            }
        }
        _ => out.insert(path),
    }
}

fn collect_fields_v1(value: &Value, path: &mut Vec<String>, out: &mut FieldPathSet) {
    const IGNORED_KEY: &str = ".";
    match value.as_object() {
        Some(map) if !map.is_empty() => {
            for (key, child) in map {
                if key == IGNORED_KEY {
                    continue;
                }
                if let Some(field_name) = key.strip_prefix("f:") {
                    path.push(field_name.to_string());
                    collect_fields_v1(child, path, out);
                    path.pop();
                } else {
                    // k:/v:/i: selector into a list or set element: treat the
                    // parent path as an atomic leaf rather than recursing.
                    out.insert(path);
                }
            }
        }
        _ => out.insert(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn union_combines_disjoint_branches() {
        let mut a = FieldPathSet::new();
        a.insert(&["status".to_string()]);
        let mut b = FieldPathSet::new();
        b.insert(&["metadata".to_string(), "resourceVersion".to_string()]);
        let merged = a.union(b);
        assert!(merged.contains_prefix_of(&["status".to_string(), "phase".to_string()]));
        assert!(merged.contains_prefix_of(&["metadata".to_string(), "resourceVersion".to_string()]));
        assert!(!merged.contains_prefix_of(&["spec".to_string()]));
    }

    #[test]
    fn from_json_leaf_is_empty_mapping() {
        let policy = json!({
            "metadata": { "creationTimestamp": {}, "resourceVersion": {} },
            "status": {}
        });
        let set = FieldPathSet::from_json(&policy);
        assert!(set.contains_prefix_of(&["status".to_string(), "phase".to_string()]));
        assert!(set.contains_prefix_of(&[
            "metadata".to_string(),
            "creationTimestamp".to_string()
        ]));
        assert!(!set.contains_prefix_of(&["spec".to_string()]));
    }

    #[test]
    fn from_fields_v1_strips_f_prefix_and_collapses_other_selectors() {
        let fields = json!({
            "f:metadata": {
                "f:labels": {
                    "f:app": {}
                }
            },
            "f:spec": {
                "f:containers": {
                    "k:{\"name\":\"app\"}": {
                        ".": {},
                        "f:image": {}
                    }
                }
            }
        });
        let set = FieldPathSet::from_fields_v1(&fields);
        assert!(set.contains_prefix_of(&[
            "metadata".to_string(),
            "labels".to_string(),
            "app".to_string()
        ]));
        // the k: selector collapses its whole element to one leaf
        assert!(set.contains_prefix_of(&[
            "spec".to_string(),
            "containers".to_string(),
        ]));
    }
}
