//! Leaf field types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Suffix marking a nullable leaf type in schema descriptions.
pub const NULLABLE_SUFFIX: &str = "_NULLABLE";

/// The kind of value a leaf field holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Integral number.
    Int,
    /// Any number.
    Number,
    /// Boolean.
    Bool,
    /// Short string (names, titles).
    ShortStr,
    /// Long string (bodies, descriptions).
    LongStr,
    /// Opaque identifier string.
    Id,
    /// Millisecond timestamp.
    Timestamp,
    /// One of a fixed set of strings. The first value is the default.
    Enum(Vec<String>),
    /// Free-form object; contents are not described by the schema.
    Object,
    /// Free-form JSON of any shape.
    JsonBlob,
}

impl FieldType {
    /// Returns the canonical upper-case name used in schema descriptions.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Int => "INT",
            FieldType::Number => "NUMBER",
            FieldType::Bool => "BOOL",
            FieldType::ShortStr => "SHORTSTR",
            FieldType::LongStr => "LONGSTR",
            FieldType::Id => "ID",
            FieldType::Timestamp => "TIME",
            FieldType::Enum(_) => "ENUM",
            FieldType::Object => "OBJECT",
            FieldType::JsonBlob => "JSONBLOB",
        }
    }

    /// Parses a type name (without the nullable suffix).
    ///
    /// Enums cannot be named this way; they are described with `{"_enum": [...]}`.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "INT" => FieldType::Int,
            "NUMBER" => FieldType::Number,
            "BOOL" => FieldType::Bool,
            "SHORTSTR" => FieldType::ShortStr,
            "LONGSTR" => FieldType::LongStr,
            "ID" => FieldType::Id,
            "TIME" | "TIMESTAMP" => FieldType::Timestamp,
            "OBJECT" => FieldType::Object,
            "JSONBLOB" => FieldType::JsonBlob,
            _ => return None,
        })
    }

    /// Returns true if values of this type are containers with free-form contents.
    pub fn is_free_form(&self) -> bool {
        matches!(self, FieldType::Object | FieldType::JsonBlob)
    }
}

/// A leaf type: a field kind plus nullability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafType {
    /// The kind of value.
    pub kind: FieldType,
    /// Whether `null` is an accepted value.
    pub nullable: bool,
}

impl LeafType {
    /// Creates a non-nullable leaf type.
    #[must_use]
    pub const fn new(kind: FieldType) -> Self {
        Self {
            kind,
            nullable: false,
        }
    }

    /// Creates a nullable leaf type.
    #[must_use]
    pub const fn nullable(kind: FieldType) -> Self {
        Self {
            kind,
            nullable: true,
        }
    }

    /// Parses a leaf type name such as `INT` or `LONGSTR_NULLABLE`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.strip_suffix(NULLABLE_SUFFIX) {
            Some(base) => FieldType::from_name(base).map(Self::nullable),
            None => FieldType::from_name(name).map(Self::new),
        }
    }

    /// Returns the value a field of this type holds when nothing was written.
    pub fn default_value(&self) -> Value {
        if self.nullable {
            return Value::Null;
        }
        match &self.kind {
            FieldType::Int | FieldType::Number | FieldType::Timestamp => Value::from(0),
            FieldType::Bool => Value::Bool(false),
            FieldType::ShortStr | FieldType::LongStr | FieldType::Id => {
                Value::String(String::new())
            }
            FieldType::Enum(values) => values
                .first()
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null),
            FieldType::Object => Value::Object(Map::new()),
            FieldType::JsonBlob => Value::Null,
        }
    }

    /// Returns true if `value` is acceptable for this type.
    ///
    /// With `forward_feed`, enum fields accept string values this schema does
    /// not know about, since a newer producer may have added them.
    pub fn validate(&self, value: &Value, forward_feed: bool) -> bool {
        if value.is_null() {
            return self.nullable || self.kind == FieldType::JsonBlob;
        }
        match &self.kind {
            FieldType::Int => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            FieldType::Number | FieldType::Timestamp => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::ShortStr | FieldType::LongStr | FieldType::Id => value.is_string(),
            FieldType::Enum(values) => match value.as_str() {
                Some(s) => forward_feed || values.iter().any(|v| v == s),
                None => false,
            },
            FieldType::Object => value.is_object(),
            FieldType::JsonBlob => true,
        }
    }
}

impl fmt::Display for LeafType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FieldType::Enum(values) => write!(f, "ENUM({})", values.join("|"))?,
            kind => f.write_str(kind.name())?,
        }
        if self.nullable {
            f.write_str(NULLABLE_SUFFIX)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_names() {
        assert_eq!(LeafType::from_name("INT"), Some(LeafType::new(FieldType::Int)));
        assert_eq!(
            LeafType::from_name("LONGSTR_NULLABLE"),
            Some(LeafType::nullable(FieldType::LongStr))
        );
        assert_eq!(LeafType::from_name("FLOAT"), None);
    }

    #[test]
    fn defaults() {
        assert_eq!(LeafType::new(FieldType::Int).default_value(), json!(0));
        assert_eq!(LeafType::new(FieldType::Bool).default_value(), json!(false));
        assert_eq!(LeafType::new(FieldType::ShortStr).default_value(), json!(""));
        assert_eq!(LeafType::nullable(FieldType::Object).default_value(), json!(null));
        assert_eq!(LeafType::new(FieldType::Object).default_value(), json!({}));
        let e = LeafType::new(FieldType::Enum(vec!["ONE".into(), "TWO".into()]));
        assert_eq!(e.default_value(), json!("ONE"));
    }

    #[test]
    fn validate_scalars() {
        let int = LeafType::new(FieldType::Int);
        assert!(int.validate(&json!(5), false));
        assert!(int.validate(&json!(5.0), false));
        assert!(!int.validate(&json!(5.5), false));
        assert!(!int.validate(&json!("5"), false));
        assert!(!int.validate(&json!(null), false));
        assert!(LeafType::nullable(FieldType::Int).validate(&json!(null), false));
    }

    #[test]
    fn enum_forward_feed() {
        let e = LeafType::new(FieldType::Enum(vec!["ONE".into(), "TWO".into()]));
        assert!(e.validate(&json!("TWO"), false));
        assert!(!e.validate(&json!("THREE"), false));
        assert!(e.validate(&json!("THREE"), true));
        assert!(!e.validate(&json!(3), true));
    }

    #[test]
    fn json_blob_accepts_anything() {
        let blob = LeafType::new(FieldType::JsonBlob);
        assert!(blob.validate(&json!(null), false));
        assert!(blob.validate(&json!([1, 2]), false));
        assert!(blob.validate(&json!({"a": 1}), false));
    }

    #[test]
    fn display() {
        assert_eq!(LeafType::nullable(FieldType::Int).to_string(), "INT_NULLABLE");
    }
}
