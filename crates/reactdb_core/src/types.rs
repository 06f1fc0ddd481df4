//! Core type definitions for ReactDB.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a watcher.
///
/// Watcher IDs are handed out in creation order and never reused. Triggers of
/// equal priority are delivered in ID order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(pub u64);

impl WatcherId {
    /// Creates a new watcher ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watcher:{}", self.0)
    }
}

/// The kind of change a merge applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeAction {
    /// Create new data at a path that holds nothing.
    Create,
    /// Update fields of existing data.
    Update,
    /// Update fields, creating missing containers.
    Upsert,
    /// Replace data, pruning fields the new value omits.
    Replace,
    /// Remove the key at a path.
    Remove,
    /// Keep the smaller of the old and new numbers.
    Min,
    /// Keep the larger of the old and new numbers.
    Max,
}

impl MergeAction {
    /// Returns the lower-case name of the action.
    pub fn as_str(self) -> &'static str {
        match self {
            MergeAction::Create => "create",
            MergeAction::Update => "update",
            MergeAction::Upsert => "upsert",
            MergeAction::Replace => "replace",
            MergeAction::Remove => "remove",
            MergeAction::Min => "min",
            MergeAction::Max => "max",
        }
    }
}

impl fmt::Display for MergeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "create" => MergeAction::Create,
            "update" => MergeAction::Update,
            "upsert" => MergeAction::Upsert,
            "replace" => MergeAction::Replace,
            "remove" => MergeAction::Remove,
            "min" => MergeAction::Min,
            "max" => MergeAction::Max,
            other => {
                return Err(CoreError::invalid_operation(format!(
                    "unknown merge action '{other}'"
                )))
            }
        })
    }
}

/// Per-call settings for a data change.
#[derive(Debug, Clone, Default)]
pub struct ChangeOptions {
    /// Key of the client issuing the change, used in diagnostics.
    pub client_key: Option<String>,

    /// Let this change create missing schema'd intermediate objects.
    pub allow_sub_object_create: bool,

    /// Queue the change without running the immediate pass or scheduling a tick.
    pub no_watch_trigger: bool,
}

impl ChangeOptions {
    /// Creates default change options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the client key.
    #[must_use]
    pub fn client_key(mut self, key: impl Into<String>) -> Self {
        self.client_key = Some(key.into());
        self
    }

    /// Sets whether missing intermediate objects may be created.
    #[must_use]
    pub const fn allow_sub_object_create(mut self, value: bool) -> Self {
        self.allow_sub_object_create = value;
        self
    }

    /// Sets whether watch delivery is skipped for this change.
    #[must_use]
    pub const fn no_watch_trigger(mut self, value: bool) -> Self {
        self.no_watch_trigger = value;
        self
    }
}

/// Joins path segments with `/`.
pub fn path_str<S: AsRef<str>>(path: &[S]) -> String {
    let mut out = String::new();
    for (i, key) in path.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(key.as_ref());
    }
    out
}

/// Converts borrowed path segments into an owned path.
pub fn to_path<S: AsRef<str>>(path: &[S]) -> Vec<String> {
    path.iter().map(|k| k.as_ref().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watcher_id_ordering() {
        let a = WatcherId::new(1);
        let b = WatcherId::new(2);
        assert!(a < b);
        assert_eq!(format!("{b}"), "watcher:2");
    }

    #[test]
    fn action_names() {
        for action in [
            MergeAction::Create,
            MergeAction::Update,
            MergeAction::Upsert,
            MergeAction::Replace,
            MergeAction::Remove,
            MergeAction::Min,
            MergeAction::Max,
        ] {
            assert_eq!(action.as_str().parse::<MergeAction>().unwrap(), action);
        }
        assert!("merge".parse::<MergeAction>().is_err());
        assert_eq!(
            serde_json::to_string(&MergeAction::Upsert).unwrap(),
            "\"upsert\""
        );
    }

    #[test]
    fn path_helpers() {
        assert_eq!(path_str(&["a", "b", "c"]), "a/b/c");
        assert_eq!(path_str::<&str>(&[]), "");
        assert_eq!(to_path(&["x"]), vec!["x".to_string()]);
    }

    #[test]
    fn change_options_builder() {
        let opts = ChangeOptions::new().client_key("c1").no_watch_trigger(true);
        assert_eq!(opts.client_key.as_deref(), Some("c1"));
        assert!(opts.no_watch_trigger);
        assert!(!opts.allow_sub_object_create);
    }
}
