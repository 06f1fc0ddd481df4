//! Property-based test generators using proptest.
//!
//! Strategies produce data that fits [`drafts_schema`](crate::drafts_schema)
//! unless noted otherwise.

use proptest::prelude::*;
use reactdb_core::MergeAction;
use serde_json::{json, Map, Value};

/// Strategy for map keys: short lowercase identifiers.
pub fn map_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,5}").expect("Invalid regex")
}

/// Strategy for one `drafts` entry with every field set.
pub fn draft_entry_strategy() -> impl Strategy<Value = Value> {
    (0i64..1000, any::<bool>(), "[a-zA-Z ]{0,12}").prop_map(|(edits, first, title)| {
        json!({ "editCount": edits, "firstOpen": first, "title": title })
    })
}

/// Strategy for a whole `drafts` map.
pub fn drafts_map_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(map_key_strategy(), draft_entry_strategy(), 0..6)
        .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<String, Value>>()))
}

/// Strategy for a list of `tags`.
pub fn tags_strategy() -> impl Strategy<Value = Value> {
    prop::collection::vec("[a-z]{1,6}".prop_map(Value::String), 0..5).prop_map(Value::Array)
}

/// Strategy for JSON scalars of every kind.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::String),
    ]
}

/// Strategy for arbitrary JSON documents, for free-form stores.
pub fn json_value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(map_key_strategy(), inner, 0..4)
                .prop_map(|entries| Value::Object(entries.into_iter().collect())),
        ]
    })
}

/// Strategy for JSON objects only, for free-form stores.
pub fn json_object_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(map_key_strategy(), json_value_strategy(), 0..5)
        .prop_map(|entries| Value::Object(entries.into_iter().collect()))
}

/// Strategy for merge actions.
pub fn merge_action_strategy() -> impl Strategy<Value = MergeAction> {
    prop_oneof![
        Just(MergeAction::Create),
        Just(MergeAction::Update),
        Just(MergeAction::Upsert),
        Just(MergeAction::Replace),
        Just(MergeAction::Remove),
        Just(MergeAction::Min),
        Just(MergeAction::Max),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{drafts_schema, schema_node};
    use proptest::test_runner::TestRunner;

    #[test]
    fn draft_entries_fit_the_schema() {
        let schema = schema_node(&drafts_schema());
        let entry = schema.for_path(&["drafts", "any"]).unwrap();
        let mut runner = TestRunner::default();
        runner
            .run(&draft_entry_strategy(), |value| {
                for (key, field) in value.as_object().unwrap() {
                    let leaf = entry.descend(key).and_then(|n| n.as_leaf()).unwrap();
                    prop_assert!(leaf.validate(field, false));
                }
                Ok(())
            })
            .unwrap();
    }
}
