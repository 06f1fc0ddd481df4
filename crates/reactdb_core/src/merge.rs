//! Schema-validated patch application with change tracking.
//!
//! [`apply_action`] applies one [`MergeAction`] at a path of a document and
//! records what it touched into a [`ChangeTree`]. Data that does not fit the
//! schema is refused field by field and reported as a diagnostic; the rest
//! of the call proceeds.
//!
//! Compatibility rules:
//! - Forward feed: fields the schema does not describe are accepted when the
//!   store enables it (or has no schema at all)
//! - Backward feed: containers that must be created are filled with schema
//!   defaults, so data from older producers gains the fields it lacks

use crate::change_tree::ChangeTree;
use crate::diagnostics::{Diagnostic, DiagnosticReason, DiagnosticSink};
use crate::types::{path_str, MergeAction};
use reactdb_schema::{FieldType, LeafType, SchemaNode};
use serde_json::{Map, Value};

/// Field in `remove` fields that replaces the key with `{}` instead of deleting it.
pub const REPLACE_WITH_OBJECT_KEY: &str = "_replaceWithObject";

/// Schema used for everything below a free-form leaf.
static FREE_FORM: SchemaNode = SchemaNode::Leaf(LeafType::nullable(FieldType::JsonBlob));

/// Settings for one merge call.
#[derive(Clone, Copy, Default)]
pub struct MergeOptions<'a> {
    /// Schema of the document root. `None` accepts any shape.
    pub schema: Option<&'a SchemaNode>,
    /// Accept fields and enum values the schema does not know about.
    pub forward_feed: bool,
    /// Let the merge create missing schema'd intermediate objects.
    pub allow_sub_objects: bool,
    /// Key of the client issuing the change, for diagnostics.
    pub client_key: Option<&'a str>,
    /// Store name prefixed to diagnostic paths.
    pub store_name: Option<&'a str>,
    /// Where diagnostics go besides the log.
    pub diagnostics: Option<&'a dyn DiagnosticSink>,
}

impl<'a> MergeOptions<'a> {
    /// Creates options for a schemaless merge.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the schema.
    #[must_use]
    pub fn schema(mut self, schema: Option<&'a SchemaNode>) -> Self {
        self.schema = schema;
        self
    }

    /// Sets forward feed tolerance.
    #[must_use]
    pub fn forward_feed(mut self, value: bool) -> Self {
        self.forward_feed = value;
        self
    }

    /// Sets whether missing intermediate objects may be created.
    #[must_use]
    pub fn allow_sub_objects(mut self, value: bool) -> Self {
        self.allow_sub_objects = value;
        self
    }

    /// Sets the client key.
    #[must_use]
    pub fn client_key(mut self, key: Option<&'a str>) -> Self {
        self.client_key = key;
        self
    }

    /// Sets the store name used in diagnostics.
    #[must_use]
    pub fn store_name(mut self, name: &'a str) -> Self {
        self.store_name = Some(name);
        self
    }

    /// Sets the diagnostic sink.
    #[must_use]
    pub fn diagnostics(mut self, sink: Option<&'a dyn DiagnosticSink>) -> Self {
        self.diagnostics = sink;
        self
    }
}

/// Applies `action` at `keys` of `root`.
///
/// `keys` is relative to `root`. Returns true if the document changed.
/// Every changed path is recorded into `change`, if given.
///
/// ```
/// use reactdb_core::{apply_action, ChangeTree, MergeAction, MergeOptions};
/// use serde_json::json;
///
/// let mut doc = json!({ "x": { "count": 1 } });
/// let mut change = ChangeTree::new();
/// let keys = vec!["x".to_string(), "count".to_string()];
///
/// assert!(apply_action(&mut doc, MergeAction::Update, &keys, json!(2), MergeOptions::new(), Some(&mut change)));
/// assert_eq!(doc, json!({ "x": { "count": 2 } }));
/// assert_eq!(change.to_json(), json!({ "x": { "count": { "_force": true } } }));
/// ```
pub fn apply_action(
    root: &mut Value,
    action: MergeAction,
    keys: &[String],
    fields: Value,
    options: MergeOptions<'_>,
    change: Option<&mut ChangeTree>,
) -> bool {
    let mut ctx = MergeContext {
        action,
        options,
        changed: false,
    };
    match action {
        MergeAction::Create => path_create(&mut ctx, root, keys, fields, change),
        MergeAction::Remove => path_remove(&mut ctx, root, keys, &fields, change),
        _ => path_update(&mut ctx, root, keys, fields, change),
    }
    ctx.changed
}

struct MergeContext<'a> {
    action: MergeAction,
    options: MergeOptions<'a>,
    changed: bool,
}

impl MergeContext<'_> {
    fn mark_changed(&mut self, change: Option<&mut ChangeTree>) {
        self.changed = true;
        if let Some(change) = change {
            change.mark();
        }
    }

    fn accepts_unknown(&self) -> bool {
        self.options.forward_feed || self.options.schema.is_none()
    }

    fn report(&self, keys: &[String], reason: DiagnosticReason, detail: Option<&Value>) {
        let path = match self.options.store_name {
            Some(store) if keys.is_empty() => store.to_string(),
            Some(store) => format!("{store}/{}", path_str(keys)),
            None => path_str(keys),
        };
        let mut diagnostic = Diagnostic::new(format!("merge.{}", self.action), path, reason)
            .with_client_key(self.options.client_key);
        if let Some(detail) = detail {
            diagnostic = diagnostic.with_detail(detail.clone());
        }
        diagnostic.emit(self.options.diagnostics);
    }

    /// Combines a validated scalar with the existing value and records the change.
    fn get_val(
        &mut self,
        change: Option<&mut ChangeTree>,
        field_val: Value,
        existing: Option<&Value>,
    ) -> Value {
        let value = match (
            self.action,
            field_val.as_f64(),
            existing.and_then(Value::as_f64),
        ) {
            (MergeAction::Max, Some(new), Some(old)) if old > new => {
                existing.cloned().unwrap_or(field_val)
            }
            (MergeAction::Min, Some(new), Some(old)) if old < new => {
                existing.cloned().unwrap_or(field_val)
            }
            _ => field_val,
        };
        if !same_value(existing, &value) {
            self.mark_changed(change);
        }
        value
    }
}

fn same_value(existing: Option<&Value>, value: &Value) -> bool {
    match existing {
        Some(Value::Number(a)) => match value {
            Value::Number(b) => a == b || (a.as_f64().is_some() && a.as_f64() == b.as_f64()),
            _ => false,
        },
        Some(existing) => existing == value,
        None => false,
    }
}

fn descend<'c>(change: Option<&'c mut ChangeTree>, key: &str) -> Option<&'c mut ChangeTree> {
    change.and_then(|c| c.descend(key))
}

fn descend_schema<'s>(schema: Option<&'s SchemaNode>, key: &str) -> Option<&'s SchemaNode> {
    match schema {
        Some(SchemaNode::Leaf(leaf)) if leaf.kind.is_free_form() => Some(&FREE_FORM),
        Some(node) => node.descend(key),
        None => None,
    }
}

fn is_container(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

fn is_unset(value: Option<&Value>) -> bool {
    value.map_or(true, Value::is_null)
}

pub(crate) fn get_child<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

pub(crate) fn get_child_mut<'v>(value: &'v mut Value, key: &str) -> Option<&'v mut Value> {
    match value {
        Value::Object(map) => map.get_mut(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        _ => None,
    }
}

/// Returns the value at `keys` below `root`.
pub fn get_path<'v, S: AsRef<str>>(root: &'v Value, keys: &[S]) -> Option<&'v Value> {
    let mut value = root;
    for key in keys {
        value = get_child(value, key.as_ref())?;
    }
    Some(value)
}

/// Returns the value at `keys` below `root`, mutably.
pub(crate) fn get_path_mut<'v, S: AsRef<str>>(
    root: &'v mut Value,
    keys: &[S],
) -> Option<&'v mut Value> {
    let mut value = root;
    for key in keys {
        value = get_child_mut(value, key.as_ref())?;
    }
    Some(value)
}

/// Sets child `key`. Lists accept an index up to their length.
pub(crate) fn set_child(value: &mut Value, key: &str, child: Value) -> bool {
    match value {
        Value::Object(map) => {
            map.insert(key.to_string(), child);
            true
        }
        Value::Array(items) => match key.parse::<usize>() {
            Ok(i) if i < items.len() => {
                items[i] = child;
                true
            }
            Ok(i) if i == items.len() => {
                items.push(child);
                true
            }
            _ => false,
        },
        _ => false,
    }
}

pub(crate) fn remove_child(value: &mut Value, key: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.shift_remove(key),
        Value::Array(items) => match key.parse::<usize>() {
            Ok(i) if i < items.len() => Some(items.remove(i)),
            _ => None,
        },
        _ => None,
    }
}

fn into_entries(value: Value) -> Vec<(String, Value)> {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => Vec::new(),
    }
}

fn is_leaf_update(schema: Option<&SchemaNode>, fields: &Value, target: Option<&Value>) -> bool {
    matches!(schema, Some(SchemaNode::Leaf(_)))
        || !fields.is_object()
        || !target.is_some_and(Value::is_object)
}

fn is_allowed_object(field: &Value, schema: Option<&SchemaNode>) -> bool {
    if !field.is_object() {
        return true;
    }
    matches!(schema, Some(SchemaNode::Leaf(leaf)) if leaf.kind == FieldType::Object)
}

fn create_container(
    ctx: &MergeContext<'_>,
    parent: &mut Value,
    key: &str,
    schema: Option<&SchemaNode>,
    at: &[String],
) -> bool {
    let fresh = schema.map_or_else(|| Value::Object(Map::new()), |s| s.defaults(true));
    if set_child(parent, key, fresh) {
        true
    } else {
        ctx.report(at, DiagnosticReason::NotAContainer, None);
        false
    }
}

/// Resets or deletes fields of `existing` that `new_obj` does not carry.
fn remove_replaced_fields(
    ctx: &mut MergeContext<'_>,
    new_obj: &Value,
    existing: &mut Value,
    schema: Option<&SchemaNode>,
    change: Option<&mut ChangeTree>,
) {
    let fixed = schema.filter(|s| s.is_fixed());
    let mut change = change;
    match existing {
        Value::Array(items) => {
            let keep = new_obj.as_array().map_or(0, Vec::len);
            for i in (keep..items.len()).rev() {
                ctx.mark_changed(descend(change.as_deref_mut(), &i.to_string()));
                items.remove(i);
            }
        }
        Value::Object(map) => {
            let stale: Vec<String> = map
                .keys()
                .filter(|k| get_child(new_obj, k.as_str()).is_none())
                .cloned()
                .collect();
            for id in stale {
                match fixed.and_then(|s| s.descend(&id)) {
                    Some(field_schema) => {
                        let default = field_schema.defaults(false);
                        if map.get(&id) != Some(&default) {
                            ctx.mark_changed(descend(change.as_deref_mut(), &id));
                        }
                        map.insert(id, default);
                    }
                    None => {
                        ctx.mark_changed(descend(change.as_deref_mut(), &id));
                        map.shift_remove(&id);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Validates `field_val` against `schema` and merges it over `existing`.
///
/// Returns the value to store. A refused value returns `existing` untouched.
fn type_check_field(
    ctx: &mut MergeContext<'_>,
    field_val: Value,
    existing: Option<Value>,
    schema: Option<&SchemaNode>,
    keys: &mut Vec<String>,
    change: Option<&mut ChangeTree>,
) -> Option<Value> {
    let node = match schema {
        None => {
            if ctx.accepts_unknown() {
                return Some(ctx.get_val(change, field_val, existing.as_ref()));
            }
            ctx.report(keys, DiagnosticReason::UnknownField, Some(&field_val));
            return existing;
        }
        Some(SchemaNode::Leaf(leaf)) => {
            if leaf.validate(&field_val, ctx.options.forward_feed) {
                return Some(ctx.get_val(change, field_val, existing.as_ref()));
            }
            ctx.report(keys, DiagnosticReason::TypeMismatch, Some(&field_val));
            return existing;
        }
        Some(node) => node,
    };

    if !is_container(&field_val) {
        if field_val.is_null() && node.is_nullable() {
            return Some(ctx.get_val(change, field_val, existing.as_ref()));
        }
        ctx.report(keys, DiagnosticReason::TypeMismatch, Some(&field_val));
        return existing;
    }

    let mut change = change;
    let mut existing = existing;
    if ctx.action == MergeAction::Replace {
        if let Some(existing) = existing.as_mut() {
            remove_replaced_fields(ctx, &field_val, existing, Some(node), change.as_deref_mut());
        }
    }
    let mut target = match existing {
        Some(value) if is_container(&value) => value,
        _ => {
            ctx.mark_changed(change.take());
            node.defaults(true)
        }
    };
    for (id, sub) in into_entries(field_val) {
        let sub_change = descend(change.as_deref_mut(), &id);
        let sub_schema = descend_schema(Some(node), &id);
        merge_child(ctx, &mut target, &id, sub, sub_schema, keys, sub_change);
    }
    Some(target)
}

/// Runs [`type_check_field`] for child `key` of `parent`, in place.
fn merge_child(
    ctx: &mut MergeContext<'_>,
    parent: &mut Value,
    key: &str,
    field_val: Value,
    schema: Option<&SchemaNode>,
    keys: &mut Vec<String>,
    change: Option<&mut ChangeTree>,
) {
    keys.push(key.to_string());
    let existing = get_child_mut(parent, key).map(std::mem::take);
    if let Some(value) = type_check_field(ctx, field_val, existing, schema, keys, change) {
        if !set_child(parent, key, value) {
            ctx.report(keys, DiagnosticReason::NotAContainer, None);
        }
    }
    keys.pop();
}

fn update_fields(
    ctx: &mut MergeContext<'_>,
    obj: &mut Value,
    keys: &mut Vec<String>,
    fields: Value,
    schema: Option<&SchemaNode>,
    change: Option<&mut ChangeTree>,
    allow_sub: bool,
) {
    let mut change = change;
    for (id, val) in into_entries(fields) {
        let sub_schema = descend_schema(schema, &id);
        if !allow_sub && !is_allowed_object(&val, sub_schema) {
            keys.push(id);
            ctx.report(keys, DiagnosticReason::SubObjectNotAllowed, Some(&val));
            keys.pop();
            continue;
        }
        if get_child(obj, &id) == Some(&val) {
            continue;
        }
        let sub_change = descend(change.as_deref_mut(), &id);
        merge_child(ctx, obj, &id, val, sub_schema, keys, sub_change);
    }
}

fn path_create(
    ctx: &mut MergeContext<'_>,
    root: &mut Value,
    keys: &[String],
    fields: Value,
    change: Option<&mut ChangeTree>,
) {
    let allow_sub = ctx.options.allow_sub_objects;
    let mut node = root;
    let mut schema = ctx.options.schema;
    let mut change = change;

    for (i, key) in keys.iter().enumerate() {
        let is_last = i + 1 == keys.len();
        schema = descend_schema(schema, key);
        change = descend(change, key);

        if is_unset(get_child(node, key)) {
            if schema.is_some() && !allow_sub && !is_last {
                let missing = Value::String(path_str(&keys[..=i]));
                ctx.report(keys, DiagnosticReason::MissingObjectInPath, Some(&missing));
                return;
            }
            if !create_container(ctx, node, key, schema, &keys[..=i]) {
                return;
            }
            ctx.mark_changed(change.take());
        } else if is_last {
            ctx.report(keys, DiagnosticReason::PathAlreadyExists, None);
            return;
        }

        node = match get_child_mut(node, key) {
            Some(next) => next,
            None => return,
        };
    }

    if !node.is_object() {
        ctx.report(keys, DiagnosticReason::NotAContainer, Some(&fields));
        return;
    }
    if !fields.is_object() {
        ctx.report(keys, DiagnosticReason::NonObjectFields, Some(&fields));
        return;
    }

    let mut path = keys.to_vec();
    if let Some(SchemaNode::Leaf(_)) = schema {
        let existing = std::mem::take(node);
        *node = type_check_field(ctx, fields, Some(existing), schema, &mut path, change)
            .unwrap_or(Value::Null);
        return;
    }
    for (id, val) in into_entries(fields) {
        let sub_schema = descend_schema(schema, &id);
        let sub_change = descend(change.as_deref_mut(), &id);
        merge_child(ctx, node, &id, val, sub_schema, &mut path, sub_change);
    }
}

fn path_remove(
    ctx: &mut MergeContext<'_>,
    root: &mut Value,
    keys: &[String],
    fields: &Value,
    change: Option<&mut ChangeTree>,
) {
    let Some((last, parent_keys)) = keys.split_last() else {
        return;
    };
    let mut parent = root;
    let mut schema = ctx.options.schema;
    let mut change = change;

    for (i, key) in parent_keys.iter().enumerate() {
        schema = descend_schema(schema, key);
        change = descend(change, key);
        parent = match get_child_mut(parent, key) {
            Some(next) if !next.is_null() => next,
            _ => {
                if schema.is_some() && !ctx.options.allow_sub_objects {
                    let missing = Value::String(path_str(&keys[..=i]));
                    ctx.report(keys, DiagnosticReason::MissingParent, Some(&missing));
                }
                return;
            }
        };
    }

    // removing an absent key is expected during feed replay
    if get_child(parent, last).is_none() {
        return;
    }

    let replace_with_object = fields
        .get(REPLACE_WITH_OBJECT_KEY)
        .is_some_and(|v| v.as_bool().unwrap_or(!v.is_null()));
    if replace_with_object {
        ctx.mark_changed(descend(change, last));
        set_child(parent, last, Value::Object(Map::new()));
    } else if parent.is_array() {
        // later elements shift down, so the whole list is changed
        ctx.mark_changed(change);
        remove_child(parent, last);
    } else {
        ctx.mark_changed(descend(change, last));
        remove_child(parent, last);
    }
}

fn path_update(
    ctx: &mut MergeContext<'_>,
    root: &mut Value,
    keys: &[String],
    fields: Value,
    change: Option<&mut ChangeTree>,
) {
    let is_replace = ctx.action == MergeAction::Replace;
    let is_upsert = ctx.action == MergeAction::Upsert || is_replace;
    let allow_sub = ctx.options.allow_sub_objects || is_replace;
    let mut change = change;

    let Some((last, parent_keys)) = keys.split_last() else {
        let schema = ctx.options.schema;
        if is_leaf_update(schema, &fields, Some(&*root)) {
            ctx.report(keys, DiagnosticReason::NotAContainer, Some(&fields));
            return;
        }
        if is_replace {
            remove_replaced_fields(ctx, &fields, root, schema, change.as_deref_mut());
        }
        update_fields(ctx, root, &mut Vec::new(), fields, schema, change, allow_sub);
        return;
    };

    let mut parent = root;
    let mut schema = ctx.options.schema;
    for (i, key) in parent_keys.iter().enumerate() {
        schema = descend_schema(schema, key);
        change = descend(change, key);
        if is_unset(get_child(parent, key)) {
            if !is_upsert {
                ctx.report(keys, DiagnosticReason::MissingPath, Some(&fields));
                return;
            }
            if !create_container(ctx, parent, key, schema, &keys[..=i]) {
                return;
            }
            ctx.mark_changed(change.take());
        }
        parent = match get_child_mut(parent, key) {
            Some(next) => next,
            None => {
                ctx.report(&keys[..=i], DiagnosticReason::NotAContainer, None);
                return;
            }
        };
    }

    let parent_schema = schema;
    let target_schema = descend_schema(parent_schema, last);
    let mut created = false;
    if is_unset(get_child(parent, last)) {
        let leaf_write = is_leaf_update(target_schema, &fields, Some(&Value::Object(Map::new())));
        if !leaf_write {
            if !is_upsert {
                ctx.report(keys, DiagnosticReason::MissingPath, Some(&fields));
                return;
            }
            if !create_container(ctx, parent, last, target_schema, keys) {
                return;
            }
            created = true;
        }
    }

    if is_leaf_update(target_schema, &fields, get_child(parent, last)) {
        // write the value as a single field of the parent
        let child_change = descend(change.as_deref_mut(), last);
        if created {
            ctx.mark_changed(child_change);
        }
        let mut wrapped = Map::with_capacity(1);
        wrapped.insert(last.clone(), fields);
        let mut path = parent_keys.to_vec();
        update_fields(
            ctx,
            parent,
            &mut path,
            Value::Object(wrapped),
            parent_schema,
            change,
            allow_sub,
        );
        return;
    }

    let mut child_change = descend(change, last);
    if created {
        ctx.mark_changed(child_change.take());
    }
    let Some(target) = get_child_mut(parent, last) else {
        return;
    };
    if is_replace {
        remove_replaced_fields(ctx, &fields, target, target_schema, child_change.as_deref_mut());
    }
    let mut path = keys.to_vec();
    update_fields(ctx, target, &mut path, fields, target_schema, child_change, allow_sub);
}
