//! # ReactDB Schema
//!
//! Schema descriptors for ReactDB stores.
//!
//! This crate provides:
//! - Leaf field types with validation and defaults
//! - Recursive schema nodes (leaves, maps, lists, fixed objects)
//! - Parsing of JSON schema descriptions
//! - Projection masks and schema checks for reads
//!
//! ## Schema Descriptions
//!
//! - A string names a leaf type (`"INT"`, `"SHORTSTR_NULLABLE"`, ...)
//! - `{"_ids": X}` is a map whose entries all follow `X`
//! - `{"_idxs": X}` is a list whose elements all follow `X`
//! - `{"_enum": ["A", "B"]}` is an enum leaf defaulting to `"A"`
//! - Any other object is a fixed set of named fields
//! - `"_nullable": true` inside an object makes that node nullable
//!
//! ## Usage
//!
//! ```
//! use reactdb_schema::{Mask, SchemaNode};
//! use serde_json::json;
//!
//! let schema = SchemaNode::from_json(&json!({
//!     "drafts": { "_ids": { "editCount": "INT", "firstOpen": "BOOL" } },
//! })).unwrap();
//!
//! let entry = schema.for_path(&["drafts", "d1"]).unwrap();
//! assert_eq!(entry.defaults(true), json!({ "editCount": 0, "firstOpen": false }));
//!
//! let value = json!({ "editCount": 3, "firstOpen": true });
//! let mask = Mask::leaves(["editCount"]);
//! assert_eq!(mask.project(Some(&value), None), Some(json!({ "editCount": 3 })));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod mask;
mod node;
mod types;

pub use error::{SchemaError, SchemaResult};
pub use mask::{validate_projection, Mask, ProjectionCheck};
pub use node::{is_key_set_segment, SchemaNode, ENUM_KEY, IDS_KEY, IDXS_KEY, NULLABLE_KEY};
pub use types::{FieldType, LeafType, NULLABLE_SUFFIX};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(Value::from),
            "[a-z]{0,6}".prop_map(Value::String),
        ]
    }

    fn field_type() -> impl Strategy<Value = FieldType> {
        prop_oneof![
            Just(FieldType::Int),
            Just(FieldType::Number),
            Just(FieldType::Bool),
            Just(FieldType::ShortStr),
            Just(FieldType::Id),
            Just(FieldType::Object),
        ]
    }

    proptest! {
        #[test]
        fn leaf_defaults_validate(kind in field_type(), nullable in any::<bool>()) {
            let leaf = LeafType { kind, nullable };
            prop_assert!(leaf.validate(&leaf.default_value(), false));
        }

        #[test]
        fn full_mask_is_identity(v in scalar()) {
            prop_assert_eq!(Mask::Full.project(Some(&v), None), Some(v));
        }
    }

    #[test]
    fn reexports_compose() {
        let schema = SchemaNode::from_json(&json!({ "s": { "_ids": "INT" } })).unwrap();
        assert!(validate_projection(&schema, &["s"], &Mask::Ids, ProjectionCheck::Shape).is_ok());
        assert!(is_key_set_segment(IDS_KEY));
    }
}
