//! # ReactDB Core
//!
//! Reactive in-memory document store for ReactDB.
//!
//! This crate provides:
//! - A schema-aware merge engine (create, update, upsert, replace, remove, min, max)
//! - Change trees recording exactly what each merge touched
//! - Watchers with path + mask subscriptions and cached projections
//! - Batched, priority-ordered change delivery on a host-driven tick
//! - A registry of named stores, including server-synced stores
//! - Reactors and memoized derived data built on watchers
//!
//! ## Soft Failures
//!
//! Data that does not fit the schema never aborts a merge. Each field is
//! validated on its own; rejected fields are skipped and reported as a
//! [`Diagnostic`] through `tracing` and an optional [`DiagnosticSink`].
//! Programming mistakes (unknown store, double flush, writing through a
//! read-only watcher) are returned as [`CoreError`].
//!
//! ## Usage
//!
//! ```
//! use reactdb_core::{DataStore, Mask, StoreOptions, Watcher};
//! use reactdb_schema::SchemaNode;
//! use serde_json::json;
//!
//! let store = DataStore::builder().build();
//! let schema = SchemaNode::from_json(&json!({ "x": { "count": "INT" } })).unwrap();
//! store.register_store("s", StoreOptions::new().schema(schema), None).unwrap();
//!
//! assert!(store.create_data(&["s", "x"], json!({ "count": 5 })).unwrap());
//! assert!(!store.update_data(&["s", "x", "count"], json!(5)).unwrap());
//!
//! let watcher = Watcher::new(0, false, |_, changes| {
//!     assert_eq!(changes[0].data, Some(json!({ "count": 6 })));
//! });
//! store.get_data(Some(&watcher), &["s", "x"], &Mask::Full, None).unwrap();
//! store.update_data(&["s", "x", "count"], json!(6)).unwrap();
//! store.flush_now();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_tree;
mod config;
mod diagnostics;
mod error;
mod memoize;
mod merge;
mod reactor;
mod store;
mod types;
pub mod watch;

pub use change_tree::{ChangeTree, FORCE_KEY};
pub use config::{EngineConfig, StoreOptions};
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticReason, DiagnosticSink, Severity};
pub use error::{CoreError, CoreResult};
pub use memoize::{MemoFn, Memoizer, MEMOIZED_STORE, MEMOIZER_PRIORITY};
pub use merge::{apply_action, get_path, MergeOptions, REPLACE_WITH_OBJECT_KEY};
pub use reactor::{create_data_reactor, ReactorHandle};
pub use store::{CodeWatch, DataStore, DataStoreBuilder};
pub use types::{path_str, to_path, ChangeOptions, MergeAction, WatcherId};
pub use watch::{
    Change, ManualTicker, TestInfo, TestOutcome, TickScheduler, Trigger, Watcher, WatchScheduler,
};

pub use reactdb_schema::Mask;
