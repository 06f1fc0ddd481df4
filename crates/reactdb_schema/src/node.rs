//! Recursive schema descriptors.

use crate::error::{SchemaError, SchemaResult};
use crate::types::{FieldType, LeafType};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Reserved key marking a map node (arbitrary keys, uniform entries).
pub const IDS_KEY: &str = "_ids";
/// Reserved key marking a list node (numeric keys, uniform entries).
pub const IDXS_KEY: &str = "_idxs";
/// Reserved key marking a node as nullable in schema descriptions.
pub const NULLABLE_KEY: &str = "_nullable";
/// Reserved key describing an enum leaf in schema descriptions.
pub const ENUM_KEY: &str = "_enum";

/// Returns true for the two reserved key-set path segments.
pub fn is_key_set_segment(key: &str) -> bool {
    key == IDS_KEY || key == IDXS_KEY
}

/// A node in a schema tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaNode {
    /// A typed scalar (or free-form) value.
    Leaf(LeafType),
    /// A map whose keys are data and whose entries share one schema.
    Map {
        /// Schema of every entry.
        entry: Box<SchemaNode>,
        /// Whether the map itself may be `null`.
        nullable: bool,
    },
    /// An ordered list whose elements share one schema.
    List {
        /// Schema of every element.
        entry: Box<SchemaNode>,
        /// Whether the list itself may be `null`.
        nullable: bool,
    },
    /// An object with a fixed set of named fields.
    Fixed {
        /// Field schemas in declaration order.
        fields: IndexMap<String, SchemaNode>,
        /// Whether the object itself may be `null`.
        nullable: bool,
    },
}

impl SchemaNode {
    /// Creates a non-nullable leaf.
    pub fn leaf(kind: FieldType) -> Self {
        SchemaNode::Leaf(LeafType::new(kind))
    }

    /// Creates a nullable leaf.
    pub fn nullable_leaf(kind: FieldType) -> Self {
        SchemaNode::Leaf(LeafType::nullable(kind))
    }

    /// Creates a map node.
    pub fn map(entry: SchemaNode) -> Self {
        SchemaNode::Map {
            entry: Box::new(entry),
            nullable: false,
        }
    }

    /// Creates a list node.
    pub fn list(entry: SchemaNode) -> Self {
        SchemaNode::List {
            entry: Box::new(entry),
            nullable: false,
        }
    }

    /// Creates a fixed-shape node from `(name, schema)` pairs.
    pub fn fixed<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, SchemaNode)>,
    {
        SchemaNode::Fixed {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            nullable: false,
        }
    }

    /// Returns this node marked nullable.
    #[must_use]
    pub fn into_nullable(self) -> Self {
        match self {
            SchemaNode::Leaf(leaf) => SchemaNode::Leaf(LeafType {
                nullable: true,
                ..leaf
            }),
            SchemaNode::Map { entry, .. } => SchemaNode::Map {
                entry,
                nullable: true,
            },
            SchemaNode::List { entry, .. } => SchemaNode::List {
                entry,
                nullable: true,
            },
            SchemaNode::Fixed { fields, .. } => SchemaNode::Fixed {
                fields,
                nullable: true,
            },
        }
    }

    /// Returns true if this node is a leaf type.
    pub fn is_leaf(&self) -> bool {
        matches!(self, SchemaNode::Leaf(_))
    }

    /// Returns the leaf type if this node is a leaf.
    pub fn as_leaf(&self) -> Option<&LeafType> {
        match self {
            SchemaNode::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Returns true if this node is a map node.
    pub fn is_map_node(&self) -> bool {
        matches!(self, SchemaNode::Map { .. })
    }

    /// Returns true if this node is a list node.
    pub fn is_list_node(&self) -> bool {
        matches!(self, SchemaNode::List { .. })
    }

    /// Returns true if this node is a fixed-shape node.
    pub fn is_fixed(&self) -> bool {
        matches!(self, SchemaNode::Fixed { .. })
    }

    /// Returns true if `null` is accepted in place of this node.
    pub fn is_nullable(&self) -> bool {
        match self {
            SchemaNode::Leaf(leaf) => leaf.nullable,
            SchemaNode::Map { nullable, .. }
            | SchemaNode::List { nullable, .. }
            | SchemaNode::Fixed { nullable, .. } => *nullable,
        }
    }

    /// Returns true if the fixed-shape node declares `key`.
    pub fn has_field(&self, key: &str) -> bool {
        match self {
            SchemaNode::Fixed { fields, .. } => fields.contains_key(key),
            _ => false,
        }
    }

    /// Returns the schema of child `key`, if the schema describes it.
    ///
    /// Map and list nodes describe every key. Leaves describe nothing below
    /// themselves, including free-form object leaves.
    pub fn descend(&self, key: &str) -> Option<&SchemaNode> {
        match self {
            SchemaNode::Leaf(_) => None,
            SchemaNode::Map { entry, .. } => Some(entry),
            SchemaNode::List { entry, .. } => {
                if key == IDXS_KEY || key.parse::<usize>().is_ok() {
                    Some(entry)
                } else {
                    None
                }
            }
            SchemaNode::Fixed { fields, .. } => fields.get(key),
        }
    }

    /// Walks `keys` from this node.
    pub fn for_path<S: AsRef<str>>(&self, keys: &[S]) -> Option<&SchemaNode> {
        let mut node = self;
        for key in keys {
            node = node.descend(key.as_ref())?;
        }
        Some(node)
    }

    /// Synthesizes the default value for this node.
    ///
    /// With `materialize` the node itself is being brought into existence, so
    /// a nullable container yields its shape rather than `null`, and
    /// free-form object leaves yield `{}`. Children are always filled with
    /// their non-materialized defaults.
    pub fn defaults(&self, materialize: bool) -> Value {
        match self {
            SchemaNode::Leaf(leaf) => {
                if materialize && leaf.kind.is_free_form() {
                    Value::Object(Map::new())
                } else {
                    leaf.default_value()
                }
            }
            SchemaNode::Map { nullable, .. } => {
                if *nullable && !materialize {
                    Value::Null
                } else {
                    Value::Object(Map::new())
                }
            }
            SchemaNode::List { nullable, .. } => {
                if *nullable && !materialize {
                    Value::Null
                } else {
                    Value::Array(Vec::new())
                }
            }
            SchemaNode::Fixed { fields, nullable } => {
                if *nullable && !materialize {
                    return Value::Null;
                }
                let mut obj = Map::with_capacity(fields.len());
                for (name, field) in fields {
                    obj.insert(name.clone(), field.defaults(false));
                }
                Value::Object(obj)
            }
        }
    }

    /// Builds a schema from its JSON description.
    ///
    /// ```
    /// use reactdb_schema::SchemaNode;
    /// use serde_json::json;
    ///
    /// let schema = SchemaNode::from_json(&json!({
    ///     "drafts": { "_ids": { "editCount": "INT", "title": "SHORTSTR_NULLABLE" } },
    /// })).unwrap();
    /// assert!(schema.for_path(&["drafts", "abc", "editCount"]).unwrap().is_leaf());
    /// ```
    pub fn from_json(desc: &Value) -> SchemaResult<Self> {
        let mut path = Vec::new();
        parse_node(desc, &mut path)
    }
}

fn parse_nullable(obj: &Map<String, Value>, path: &[String]) -> SchemaResult<bool> {
    match obj.get(NULLABLE_KEY) {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(SchemaError::invalid_schema(path, "_nullable must be a boolean")),
    }
}

fn parse_node(desc: &Value, path: &mut Vec<String>) -> SchemaResult<SchemaNode> {
    match desc {
        Value::String(name) => LeafType::from_name(name)
            .map(SchemaNode::Leaf)
            .ok_or_else(|| SchemaError::unknown_type(name.clone())),
        Value::Object(obj) => {
            let nullable = parse_nullable(obj, path)?;

            if let Some(values) = obj.get(ENUM_KEY) {
                let values = values
                    .as_array()
                    .ok_or_else(|| SchemaError::invalid_schema(path, "_enum must be an array"))?
                    .iter()
                    .map(|v| {
                        v.as_str().map(str::to_string).ok_or_else(|| {
                            SchemaError::invalid_schema(path, "_enum values must be strings")
                        })
                    })
                    .collect::<SchemaResult<Vec<_>>>()?;
                if values.is_empty() {
                    return Err(SchemaError::invalid_schema(path, "_enum must not be empty"));
                }
                return Ok(SchemaNode::Leaf(LeafType {
                    kind: FieldType::Enum(values),
                    nullable,
                }));
            }

            for (marker, is_map) in [(IDS_KEY, true), (IDXS_KEY, false)] {
                if let Some(entry_desc) = obj.get(marker) {
                    if obj.keys().any(|k| k != marker && k != NULLABLE_KEY) {
                        return Err(SchemaError::invalid_schema(
                            path,
                            format!("{marker} node cannot declare other fields"),
                        ));
                    }
                    path.push(marker.to_string());
                    let entry = Box::new(parse_node(entry_desc, path)?);
                    path.pop();
                    return Ok(if is_map {
                        SchemaNode::Map { entry, nullable }
                    } else {
                        SchemaNode::List { entry, nullable }
                    });
                }
            }

            let mut fields = IndexMap::with_capacity(obj.len());
            for (name, child) in obj {
                if name == NULLABLE_KEY {
                    continue;
                }
                if name.starts_with('_') {
                    return Err(SchemaError::invalid_schema(
                        path,
                        format!("unknown directive {name}"),
                    ));
                }
                path.push(name.clone());
                let node = parse_node(child, path)?;
                path.pop();
                fields.insert(name.clone(), node);
            }
            Ok(SchemaNode::Fixed { fields, nullable })
        }
        _ => Err(SchemaError::invalid_schema(
            path,
            "expected a type name or an object",
        )),
    }
}
