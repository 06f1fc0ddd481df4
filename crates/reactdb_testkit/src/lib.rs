//! # ReactDB Testkit
//!
//! Test utilities for ReactDB.
//!
//! This crate provides:
//! - Shared test schemas and a store harness driven by a manual ticker
//! - Recording watchers that keep every delivered batch
//! - Temporary JSON files for command-line tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```
//! use reactdb_testkit::prelude::*;
//! use serde_json::json;
//!
//! let t = TestStore::with_schema("s", &drafts_schema());
//! let recorder = RecordingWatcher::new(0);
//! t.get_data(Some(recorder.watcher()), &["s", "x"], &Mask::Full, None).unwrap();
//!
//! t.update_data(&["s", "x", "count"], json!(6)).unwrap();
//! t.tick();
//! assert_eq!(recorder.last_values(), vec![Some(json!({ "count": 6 }))]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use reactdb_core::Mask;
}

pub use fixtures::*;
pub use generators::*;
