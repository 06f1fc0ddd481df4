//! Test fixtures and store helpers.
//!
//! Provides shared schemas, a store harness whose ticks are stepped by the
//! test, and watchers that record what they were told.

use parking_lot::Mutex;
use reactdb_core::{
    CollectingSink, DataStore, EngineConfig, ManualTicker, StoreOptions, Trigger, Watcher,
};
use reactdb_schema::SchemaNode;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Schema description used across the test suites.
///
/// - `x`: a fixed object with one `INT`
/// - `drafts`: a map of draft entries
/// - `settings`: an enum and a nullable number
/// - `tags`: a list of short strings
/// - `blob`: a free-form JSON value
pub fn drafts_schema() -> Value {
    json!({
        "x": { "count": "INT" },
        "drafts": {
            "_ids": { "editCount": "INT", "firstOpen": "BOOL", "title": "SHORTSTR" }
        },
        "settings": {
            "theme": { "_enum": ["LIGHT", "DARK"] },
            "volume": "NUMBER_NULLABLE"
        },
        "tags": { "_idxs": "SHORTSTR" },
        "blob": "JSONBLOB"
    })
}

/// Parses a schema description, panicking on invalid input.
pub fn schema_node(desc: &Value) -> SchemaNode {
    SchemaNode::from_json(desc).expect("Invalid test schema")
}

/// A store registry whose batched deliveries run only when the test ticks.
pub struct TestStore {
    /// The registry under test.
    pub store: DataStore,
    /// The ticker batched deliveries are queued on.
    pub ticker: Arc<ManualTicker>,
    /// Every diagnostic the registry raised.
    pub sink: Arc<CollectingSink>,
}

impl TestStore {
    /// Creates a registry with no stores.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates a registry with the given configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        let ticker = Arc::new(ManualTicker::new());
        let sink = Arc::new(CollectingSink::new());
        let store = DataStore::builder()
            .config(config)
            .ticker(ticker.clone())
            .diagnostics(sink.clone())
            .build();
        Self {
            store,
            ticker,
            sink,
        }
    }

    /// Creates a registry holding one store with the described schema.
    pub fn with_schema(name: &str, desc: &Value) -> Self {
        let t = Self::new();
        t.register(name, Some(desc));
        t
    }

    /// Registers a store, panicking on failure.
    pub fn register(&self, name: &str, desc: Option<&Value>) {
        let options = match desc {
            Some(desc) => StoreOptions::new().schema(schema_node(desc)),
            None => StoreOptions::new(),
        };
        self.store
            .register_store(name, options, None)
            .expect("Failed to register test store");
    }

    /// Runs queued ticks until none are left. Returns how many ran.
    pub fn tick(&self) -> usize {
        self.ticker.run_pending()
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = DataStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// One change as a recording watcher saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedChange {
    /// Slash-joined path of the change.
    pub path: String,
    /// The new projected value.
    pub data: Option<Value>,
}

/// Shared, ordered log of which labeled watcher was called.
pub type DeliveryLog = Arc<Mutex<Vec<String>>>;

/// A watcher that keeps every batch it is delivered.
pub struct RecordingWatcher {
    watcher: Watcher,
    batches: Arc<Mutex<Vec<Vec<RecordedChange>>>>,
}

impl RecordingWatcher {
    /// Creates a batched recording watcher.
    pub fn new(priority: i32) -> Self {
        Self::build(priority, false, None)
    }

    /// Creates a recording watcher notified synchronously.
    pub fn immediate() -> Self {
        Self::build(0, true, None)
    }

    /// Creates a recording watcher that also appends `label` to `log` on
    /// every delivery.
    pub fn labeled(label: &str, priority: i32, log: &DeliveryLog) -> Self {
        Self::build(priority, false, Some((label.to_string(), log.clone())))
    }

    fn build(priority: i32, immediate: bool, label: Option<(String, DeliveryLog)>) -> Self {
        let batches: Arc<Mutex<Vec<Vec<RecordedChange>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        let watcher = Watcher::new(priority, immediate, move |_, changes| {
            if let Some((label, log)) = &label {
                log.lock().push(label.clone());
            }
            sink.lock().push(
                changes
                    .iter()
                    .map(|c| RecordedChange {
                        path: c.path_str.clone(),
                        data: c.data.clone(),
                    })
                    .collect(),
            );
        });
        Self { watcher, batches }
    }

    /// Returns the underlying watcher.
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    /// Returns how many times the watcher was called.
    pub fn call_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// Returns every batch delivered so far.
    pub fn batches(&self) -> Vec<Vec<RecordedChange>> {
        self.batches.lock().clone()
    }

    /// Returns the values of the most recent batch.
    pub fn last_values(&self) -> Vec<Option<Value>> {
        self.batches
            .lock()
            .last()
            .map(|batch| batch.iter().map(|c| c.data.clone()).collect())
            .unwrap_or_default()
    }

    /// Forgets every recorded batch.
    pub fn clear(&self) {
        self.batches.lock().clear();
    }
}

/// Returns the paths of every change in `triggers`, per watcher, in
/// delivery order.
pub fn trigger_paths(triggers: &[Trigger]) -> Vec<Vec<String>> {
    triggers
        .iter()
        .map(|t| t.changes.iter().map(|c| c.path_str.clone()).collect())
        .collect()
}

/// JSON files in a temporary directory, removed on drop.
pub struct TempFiles {
    dir: TempDir,
}

impl TempFiles {
    /// Creates an empty temporary directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Writes `value` as pretty JSON and returns the file's path.
    pub fn write_json(&self, name: &str, value: &Value) -> PathBuf {
        let text = serde_json::to_string_pretty(value).expect("Failed to serialize JSON");
        self.write_text(name, &text)
    }

    /// Writes one compact JSON document per line and returns the file's path.
    pub fn write_lines(&self, name: &str, values: &[Value]) -> PathBuf {
        let text: Vec<String> = values.iter().map(Value::to_string).collect();
        self.write_text(name, &text.join("\n"))
    }

    /// Writes raw text and returns the file's path.
    pub fn write_text(&self, name: &str, text: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, text).expect("Failed to write temp file");
        path
    }
}

impl Default for TempFiles {
    fn default() -> Self {
        Self::new()
    }
}
