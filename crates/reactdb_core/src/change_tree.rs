//! Sparse record of what changed since the last flush.

use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Key used for the forced marker in the JSON rendering of a change tree.
pub const FORCE_KEY: &str = "_force";

/// A node in a change tree.
///
/// Children mirror the document's keys. A forced node means the whole subtree
/// below it changed; nothing below a forced node is recorded separately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeTree {
    children: IndexMap<String, ChangeTree>,
    forced: bool,
}

impl ChangeTree {
    /// Creates an empty change tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a forced node.
    pub fn forced() -> Self {
        Self {
            children: IndexMap::new(),
            forced: true,
        }
    }

    /// Returns true if this subtree is marked as changed as a whole.
    pub fn is_forced(&self) -> bool {
        self.forced
    }

    /// Returns true if nothing is recorded here.
    ///
    /// Children that were stepped into but never marked do not count.
    pub fn is_empty(&self) -> bool {
        !self.forced && self.children.values().all(ChangeTree::is_empty)
    }

    /// Returns true if this node or one of its direct children is forced.
    pub fn has_forced_child(&self) -> bool {
        self.forced || self.children.values().any(|c| c.forced)
    }

    /// Returns the child recorded under `key`.
    pub fn get(&self, key: &str) -> Option<&ChangeTree> {
        self.children.get(key)
    }

    /// Iterates over recorded children in insertion order.
    pub fn children(&self) -> impl Iterator<Item = (&String, &ChangeTree)> {
        self.children.iter()
    }

    /// Iterates over recorded child keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.children.keys()
    }

    /// Steps into child `key`, creating it if needed.
    ///
    /// Returns `None` when this node or the child is forced, since nothing
    /// below a forced node is tracked.
    pub fn descend(&mut self, key: &str) -> Option<&mut ChangeTree> {
        if self.forced {
            return None;
        }
        let child = self.children.entry(key.to_string()).or_default();
        if child.forced {
            None
        } else {
            Some(child)
        }
    }

    /// Returns child `key`, creating it if needed, whether or not it is forced.
    pub fn entry(&mut self, key: &str) -> &mut ChangeTree {
        self.children.entry(key.to_string()).or_default()
    }

    /// Marks this whole subtree as changed.
    pub fn mark(&mut self) {
        self.forced = true;
    }

    /// Folds `src` into this tree.
    pub fn merge_from(&mut self, src: &ChangeTree) {
        if self.forced {
            return;
        }
        if src.forced {
            self.forced = true;
            return;
        }
        for (key, child) in &src.children {
            match self.children.get_mut(key) {
                Some(existing) => existing.merge_from(child),
                None => {
                    self.children.insert(key.clone(), child.clone());
                }
            }
        }
    }

    /// Forgets everything recorded.
    pub fn clear(&mut self) {
        self.children.clear();
        self.forced = false;
    }

    /// Renders the tree as JSON, with forced nodes carrying `"_force": true`.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::with_capacity(self.children.len() + 1);
        for (key, child) in &self.children {
            obj.insert(key.clone(), child.to_json());
        }
        if self.forced {
            obj.insert(FORCE_KEY.to_string(), Value::Bool(true));
        }
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descend_creates_nodes() {
        let mut tree = ChangeTree::new();
        assert!(tree.is_empty());
        tree.descend("a").unwrap().descend("b").unwrap();
        assert_eq!(tree.to_json(), json!({ "a": { "b": {} } }));
        assert!(tree.is_empty());

        tree.entry("a").entry("b").mark();
        assert!(!tree.is_empty());
    }

    #[test]
    fn forced_nodes_stop_descent() {
        let mut tree = ChangeTree::new();
        tree.descend("a").unwrap().mark();
        assert!(tree.descend("a").is_none());
        assert!(tree.get("a").unwrap().is_forced());
        assert!(tree.has_forced_child());

        let mut forced = ChangeTree::forced();
        assert!(forced.descend("x").is_none());
        assert_eq!(forced.to_json(), json!({ "_force": true }));
    }

    #[test]
    fn merge_trees() {
        let mut dst = ChangeTree::new();
        dst.descend("a").unwrap().descend("x").unwrap().mark();

        let mut src = ChangeTree::new();
        src.descend("a").unwrap().descend("y").unwrap().mark();
        src.descend("b").unwrap().mark();

        dst.merge_from(&src);
        assert_eq!(
            dst.to_json(),
            json!({
                "a": { "x": { "_force": true }, "y": { "_force": true } },
                "b": { "_force": true }
            })
        );

        dst.merge_from(&ChangeTree::forced());
        assert!(dst.is_forced());
        dst.clear();
        assert!(dst.is_empty());
    }
}
