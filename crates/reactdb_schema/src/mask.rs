//! Projection masks: which parts of a value a read copies out.

use crate::error::{SchemaError, SchemaResult};
use crate::node::{is_key_set_segment, SchemaNode, IDS_KEY};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A projection descriptor for reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Mask {
    /// Copy the whole value.
    #[default]
    Full,
    /// Copy scalars; containers come back empty.
    Leaf,
    /// Copy only the key set of a map, as `{key: 1, ...}`.
    Ids,
    /// Copy only the named fields, each with its own sub-mask. A field named
    /// `_ids` applies its sub-mask to every entry of a map.
    Fields(BTreeMap<String, Mask>),
}

/// How strictly a projection is checked against a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionCheck {
    /// Every path segment and masked field must exist in the schema.
    Exists,
    /// Like `Exists`, and field masks must not be applied to typed scalars.
    Shape,
}

impl Mask {
    /// Builds a field mask from `(name, sub-mask)` pairs.
    pub fn fields<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Mask)>,
    {
        Mask::Fields(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Builds a field mask selecting `names` as leaves.
    pub fn leaves<K: Into<String>>(names: impl IntoIterator<Item = K>) -> Self {
        Mask::fields(names.into_iter().map(|n| (n, Mask::Leaf)))
    }

    /// Returns true for the key-set mask.
    pub fn is_ids(&self) -> bool {
        matches!(self, Mask::Ids)
    }

    /// Returns true for the whole-value mask.
    pub fn is_full(&self) -> bool {
        matches!(self, Mask::Full)
    }

    /// Parses a mask description.
    ///
    /// `null` and `"*"` select everything, `1`/`true` select a leaf,
    /// `{"_ids": 1}` selects a key set, and other objects select fields.
    pub fn from_json(desc: &Value) -> SchemaResult<Self> {
        match desc {
            Value::Null => Ok(Mask::Full),
            Value::String(s) if s == "*" => Ok(Mask::Full),
            Value::Bool(true) => Ok(Mask::Leaf),
            Value::Number(n) if n.as_u64() == Some(1) => Ok(Mask::Leaf),
            Value::Object(obj) => {
                if obj.len() == 1 && obj.get(IDS_KEY).is_some_and(is_leaf_marker) {
                    return Ok(Mask::Ids);
                }
                let mut fields = BTreeMap::new();
                for (name, sub) in obj {
                    fields.insert(name.clone(), Mask::from_json(sub)?);
                }
                Ok(Mask::Fields(fields))
            }
            other => Err(SchemaError::invalid_mask(format!(
                "unsupported mask value {other}"
            ))),
        }
    }

    /// Copies the parts of `value` selected by this mask.
    ///
    /// `defaults` fill fields missing from `value`, and stand in for it
    /// entirely when it is absent. Returns `None` when both are absent.
    pub fn project(&self, value: Option<&Value>, defaults: Option<&Value>) -> Option<Value> {
        match (value, defaults) {
            (None, None) => None,
            (None, Some(d)) => Some(self.apply(d, None)),
            (Some(v), d) => Some(self.apply(v, d)),
        }
    }

    fn apply(&self, value: &Value, defaults: Option<&Value>) -> Value {
        let defaults = defaults.and_then(Value::as_object);
        match (self, value) {
            (Mask::Full, Value::Object(obj)) => {
                let mut out = obj.clone();
                if let Some(d) = defaults {
                    for (k, v) in d {
                        if !out.contains_key(k) {
                            out.insert(k.clone(), v.clone());
                        }
                    }
                }
                Value::Object(out)
            }
            (Mask::Full, v) => v.clone(),
            (Mask::Leaf, Value::Object(_)) => Value::Object(Map::new()),
            (Mask::Leaf, Value::Array(_)) => Value::Array(Vec::new()),
            (Mask::Leaf, v) => v.clone(),
            (Mask::Ids, Value::Object(obj)) => {
                let mut out = Map::with_capacity(obj.len());
                for k in obj.keys().chain(defaults.into_iter().flat_map(|d| d.keys())) {
                    out.insert(k.clone(), Value::from(1));
                }
                Value::Object(out)
            }
            (Mask::Ids, Value::Array(arr)) => {
                let mut out = Map::with_capacity(arr.len());
                for i in 0..arr.len() {
                    out.insert(i.to_string(), Value::from(1));
                }
                Value::Object(out)
            }
            (Mask::Ids, v) => v.clone(),
            (Mask::Fields(fields), Value::Object(obj)) => {
                let mut out = Map::new();
                if let Some(sub) = fields.get(IDS_KEY) {
                    for (k, v) in obj {
                        out.insert(k.clone(), sub.apply(v, None));
                    }
                }
                for (name, sub) in fields {
                    if name == IDS_KEY {
                        continue;
                    }
                    let child_default = defaults.and_then(|d| d.get(name));
                    if let Some(projected) = sub.project(obj.get(name), child_default) {
                        out.insert(name.clone(), projected);
                    }
                }
                Value::Object(out)
            }
            (Mask::Fields(_), v) => v.clone(),
        }
    }
}

fn is_leaf_marker(v: &Value) -> bool {
    matches!(v, Value::Bool(true)) || v.as_u64() == Some(1)
}

/// Checks that a read at `path` with `mask` makes sense for `schema`.
///
/// `path` is relative to the schema root (the store name already stripped).
pub fn validate_projection<S: AsRef<str>>(
    schema: &SchemaNode,
    path: &[S],
    mask: &Mask,
    check: ProjectionCheck,
) -> SchemaResult<()> {
    let mut at: Vec<String> = Vec::with_capacity(path.len());
    let mut node = schema;
    for key in path {
        let key = key.as_ref();
        at.push(key.to_string());
        if let SchemaNode::Leaf(leaf) = node {
            if leaf.kind.is_free_form() {
                return Ok(());
            }
        }
        node = node
            .descend(key)
            .ok_or_else(|| SchemaError::projection_mismatch(&at, "path is not in the schema"))?;
    }
    validate_mask(node, mask, check, &mut at)
}

fn validate_mask(
    node: &SchemaNode,
    mask: &Mask,
    check: ProjectionCheck,
    at: &mut Vec<String>,
) -> SchemaResult<()> {
    let fields = match mask {
        Mask::Full | Mask::Leaf => return Ok(()),
        Mask::Ids => {
            return if node.is_map_node() || node.is_list_node() {
                Ok(())
            } else {
                Err(SchemaError::projection_mismatch(
                    at,
                    "key-set mask on a node that is not a map",
                ))
            };
        }
        Mask::Fields(fields) => fields,
    };

    if let SchemaNode::Leaf(leaf) = node {
        if leaf.kind.is_free_form() {
            return Ok(());
        }
        return match check {
            ProjectionCheck::Exists => Ok(()),
            ProjectionCheck::Shape => Err(SchemaError::projection_mismatch(
                at,
                format!("field mask applied to {leaf}"),
            )),
        };
    }

    for (name, sub) in fields {
        at.push(name.clone());
        let child = if is_key_set_segment(name) {
            match node {
                SchemaNode::Map { entry, .. } | SchemaNode::List { entry, .. } => Some(&**entry),
                _ => None,
            }
        } else {
            node.descend(name)
        };
        match child {
            Some(child) => validate_mask(child, sub, check, at)?,
            None => {
                return Err(SchemaError::projection_mismatch(
                    at,
                    "masked field is not in the schema",
                ))
            }
        }
        at.pop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> SchemaNode {
        SchemaNode::from_json(&json!({
            "test": {
                "_ids": {
                    "foo": "INT",
                    "bar": "BOOL",
                    "blob": "OBJECT_NULLABLE",
                    "subMap": { "_ids": { "baz": "SHORTSTR" } }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn parse_masks() {
        assert_eq!(Mask::from_json(&json!(null)).unwrap(), Mask::Full);
        assert_eq!(Mask::from_json(&json!("*")).unwrap(), Mask::Full);
        assert_eq!(Mask::from_json(&json!(1)).unwrap(), Mask::Leaf);
        assert_eq!(Mask::from_json(&json!({ "_ids": 1 })).unwrap(), Mask::Ids);
        assert_eq!(
            Mask::from_json(&json!({ "bar": 1 })).unwrap(),
            Mask::leaves(["bar"])
        );
        assert!(Mask::from_json(&json!([1])).is_err());
    }

    #[test]
    fn project_fields_and_defaults() {
        let value = json!({ "foo": 12, "bar": true, "subMap": {} });
        let mask = Mask::leaves(["bar"]);
        assert_eq!(mask.project(Some(&value), None), Some(json!({ "bar": true })));
        assert_eq!(mask.project(None, None), None);

        let defaults = json!({ "foo": 34, "bar": true });
        assert_eq!(mask.project(None, Some(&defaults)), Some(json!({ "bar": true })));
        assert_eq!(
            Mask::Full.project(None, Some(&defaults)),
            Some(json!({ "foo": 34, "bar": true }))
        );
        assert_eq!(
            Mask::Full.project(Some(&json!({ "foo": 1 })), Some(&defaults)),
            Some(json!({ "foo": 1, "bar": true }))
        );
    }

    #[test]
    fn project_leaf_and_ids() {
        let value = json!({ "a": { "x": 1 }, "b": 2 });
        assert_eq!(Mask::Leaf.project(Some(&value), None), Some(json!({})));
        assert_eq!(Mask::Leaf.project(Some(&json!(12)), None), Some(json!(12)));
        assert_eq!(
            Mask::Ids.project(Some(&value), None),
            Some(json!({ "a": 1, "b": 1 }))
        );
    }

    #[test]
    fn project_ids_field() {
        let value = json!({ "k1": { "bar": true, "foo": 1 }, "k2": { "bar": false, "foo": 2 } });
        let mask = Mask::fields([(IDS_KEY, Mask::leaves(["bar"]))]);
        assert_eq!(
            mask.project(Some(&value), None),
            Some(json!({ "k1": { "bar": true }, "k2": { "bar": false } }))
        );
    }

    #[test]
    fn projection_validation() {
        let schema = schema();
        assert!(validate_projection(&schema, &["test", "a"], &Mask::leaves(["foo"]), ProjectionCheck::Exists).is_ok());
        assert!(validate_projection(&schema, &["test"], &Mask::Ids, ProjectionCheck::Exists).is_ok());
        assert!(validate_projection(&schema, &["test", "a"], &Mask::Ids, ProjectionCheck::Exists).is_err());
        assert!(validate_projection(&schema, &["test", "a"], &Mask::leaves(["nope"]), ProjectionCheck::Exists).is_err());
        assert!(validate_projection(&schema, &["nope"], &Mask::Leaf, ProjectionCheck::Exists).is_err());
        assert!(validate_projection(&schema, &["test", "a", "blob", "anything"], &Mask::Leaf, ProjectionCheck::Exists).is_ok());

        let bad_shape = Mask::fields([("foo", Mask::leaves(["x"]))]);
        assert!(validate_projection(&schema, &["test", "a"], &bad_shape, ProjectionCheck::Exists).is_ok());
        assert!(validate_projection(&schema, &["test", "a"], &bad_shape, ProjectionCheck::Shape).is_err());
    }
}
