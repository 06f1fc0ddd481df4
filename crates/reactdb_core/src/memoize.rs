//! Memoized derived data.
//!
//! A [`Memoizer`] caches the result of a function of watched data inside the
//! registry, under `MemoizedData/<uid>/<args...>`, so readers of a memoized
//! value are notified like readers of any other data.

use crate::config::StoreOptions;
use crate::error::{CoreError, CoreResult};
use crate::store::DataStore;
use crate::watch::{Change, Watcher};
use parking_lot::Mutex;
use reactdb_schema::Mask;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Name of the store holding memoized results.
pub const MEMOIZED_STORE: &str = "MemoizedData";

/// Priority of memoizer watchers.
pub const MEMOIZER_PRIORITY: i32 = 10;

/// A memoized function. It reads its inputs through the watcher it is given.
pub type MemoFn = Arc<dyn Fn(&Watcher, &[Value]) -> Value + Send + Sync>;

struct MemoEntry {
    watcher: Watcher,
    dirty: bool,
}

type Entries = Mutex<HashMap<Vec<String>, MemoEntry>>;

/// Caches a function of watched data, one entry per argument list.
///
/// An entry is recomputed as soon as its inputs change if anything watches
/// it, and otherwise on its next read.
pub struct Memoizer {
    store: DataStore,
    uid: String,
    func: MemoFn,
    entries: Arc<Entries>,
}

fn arg_key(arg: &Value) -> String {
    match arg {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compute(
    store: &DataStore,
    func: &MemoFn,
    watcher: &Watcher,
    path: &[String],
    args: &[Value],
) -> CoreResult<()> {
    watcher.reset_watches();
    let value = func(watcher, args);
    watcher.prune_unused_watches();
    store.replace_data(path, value)?;
    Ok(())
}

impl Memoizer {
    /// Creates a memoizer, registering the memoized-data store if needed.
    pub fn new<F>(store: &DataStore, uid: impl Into<String>, func: F) -> CoreResult<Self>
    where
        F: Fn(&Watcher, &[Value]) -> Value + Send + Sync + 'static,
    {
        match store.register_store(
            MEMOIZED_STORE,
            StoreOptions::new().allow_sub_object_create(true),
            None,
        ) {
            Ok(()) | Err(CoreError::DuplicateStore { .. }) => {}
            Err(err) => return Err(err),
        }
        Ok(Self {
            store: store.clone(),
            uid: uid.into(),
            func: Arc::new(func),
            entries: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Returns the memoizer's key under the memoized-data store.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Returns the store path holding the result for `args`.
    pub fn path_for(&self, args: &[Value]) -> Vec<String> {
        let mut path = Vec::with_capacity(args.len() + 2);
        path.push(MEMOIZED_STORE.to_string());
        path.push(self.uid.clone());
        path.extend(args.iter().map(arg_key));
        path
    }

    /// Returns the result for `args`, computing it if it is missing or
    /// stale. With a watcher, the result is watched like any other data.
    pub fn get(&self, watcher: Option<&Watcher>, args: &[Value]) -> CoreResult<Option<Value>> {
        let path = self.path_for(args);
        let stale = self
            .entries
            .lock()
            .get(&path)
            .map_or(true, |entry| entry.dirty);
        if stale {
            self.recompute(&path, args)?;
        }
        self.store.get_data(watcher, &path, &Mask::Full, None)
    }

    /// Returns true if `change` is a change to one of this memoizer's results.
    pub fn is_my_change(&self, change: &Change) -> bool {
        change.path.first().map(String::as_str) == Some(MEMOIZED_STORE)
            && change.path.get(1) == Some(&self.uid)
    }

    /// Returns the number of cached argument lists.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing has been computed yet.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn recompute(&self, path: &[String], args: &[Value]) -> CoreResult<()> {
        let watcher = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(path.to_vec()).or_insert_with(|| MemoEntry {
                watcher: self.entry_watcher(path.to_vec(), args.to_vec()),
                dirty: true,
            });
            entry.dirty = false;
            entry.watcher.clone()
        };
        compute(&self.store, &self.func, &watcher, path, args)
    }

    fn entry_watcher(&self, path: Vec<String>, args: Vec<Value>) -> Watcher {
        let store = self.store.clone();
        let func = self.func.clone();
        let entries: Weak<Entries> = Arc::downgrade(&self.entries);
        Watcher::new(MEMOIZER_PRIORITY, true, move |watcher, _| {
            if store.has_watches(&path) {
                if let Err(err) = compute(&store, &func, watcher, &path, &args) {
                    tracing::warn!(path = ?path, error = %err, "memoized recompute failed");
                }
            } else if let Some(entries) = entries.upgrade() {
                if let Some(entry) = entries.lock().get_mut(&path) {
                    entry.dirty = true;
                }
            }
        })
    }
}

impl Drop for Memoizer {
    fn drop(&mut self) {
        for entry in self.entries.lock().values() {
            entry.watcher.destroy();
        }
    }
}

impl fmt::Debug for Memoizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoizer")
            .field("uid", &self.uid)
            .field("entries", &self.len())
            .finish()
    }
}
