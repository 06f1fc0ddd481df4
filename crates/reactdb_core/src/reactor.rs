//! Data reactors.
//!
//! A reactor is a watcher whose callback re-runs a function. Every run
//! re-registers exactly the watches the function read, so the reactor
//! tracks whatever its function depends on at the moment.

use crate::watch::{Change, Watcher};
use parking_lot::Mutex;
use std::fmt;

/// Owner of a reactor created by [`create_data_reactor`].
///
/// Dropping the handle destroys the reactor.
pub struct ReactorHandle {
    watcher: Mutex<Option<Watcher>>,
}

impl ReactorHandle {
    /// Returns the reactor's watcher, or `None` once destroyed.
    pub fn watcher(&self) -> Option<Watcher> {
        self.watcher.lock().clone()
    }

    /// Returns true once [`destroy`](Self::destroy) has been called.
    pub fn is_destroyed(&self) -> bool {
        self.watcher.lock().is_none()
    }

    /// Stops the reactor. Calling this twice is a no-op.
    pub fn destroy(&self) {
        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            tracing::debug!(watcher = %watcher.id(), "destroying reactor");
            watcher.destroy();
        }
    }
}

impl Drop for ReactorHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("watcher", &*self.watcher.lock())
            .finish()
    }
}

/// Creates a reactor that runs `func` now and again whenever data it read
/// changes.
///
/// `func` reads through the watcher it is given; reads made on other
/// watchers, or none, are not tracked. It also receives the batch of
/// changes that caused the run, which is empty for the first run.
///
/// # Example
///
/// ```
/// use reactdb_core::{create_data_reactor, DataStore, Mask, StoreOptions};
/// use serde_json::json;
/// use std::sync::atomic::{AtomicI64, Ordering};
/// use std::sync::Arc;
///
/// let store = DataStore::builder().build();
/// store.register_store("s", StoreOptions::new(), Some(json!({ "n": 1 }))).unwrap();
///
/// let seen = Arc::new(AtomicI64::new(0));
/// let (reader, sink) = (store.clone(), seen.clone());
/// let reactor = create_data_reactor(0, false, move |watcher, _| {
///     let n = reader.get_data(Some(watcher), &["s", "n"], &Mask::Full, None).unwrap();
///     sink.store(n.and_then(|v| v.as_i64()).unwrap_or(0), Ordering::SeqCst);
/// });
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
///
/// store.update_data(&["s", "n"], json!(2)).unwrap();
/// store.flush_now();
/// assert_eq!(seen.load(Ordering::SeqCst), 2);
/// reactor.destroy();
/// ```
pub fn create_data_reactor<F>(priority: i32, trigger_immediate: bool, func: F) -> ReactorHandle
where
    F: Fn(&Watcher, &[Change]) + Send + Sync + 'static,
{
    let watcher = Watcher::new(priority, trigger_immediate, move |watcher, changes: &[Change]| {
        if watcher.is_destroyed() {
            return;
        }
        watcher.reset_watches();
        func(watcher, changes);
        watcher.prune_unused_watches();
    });
    watcher.trigger(&[]);
    ReactorHandle {
        watcher: Mutex::new(Some(watcher)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataStore, Mask, StoreOptions};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn store() -> DataStore {
        let store = DataStore::builder().build();
        store
            .register_store("s", StoreOptions::new(), Some(json!({ "a": 1, "b": 1, "use_b": false })))
            .unwrap();
        store
    }

    #[test]
    fn runs_once_at_creation() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let reactor = create_data_reactor(0, false, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(reactor.watcher().unwrap().is_read_only());
    }

    #[test]
    fn tracks_current_dependencies() {
        let store = store();
        let runs = Arc::new(AtomicUsize::new(0));
        let (reader, counter) = (store.clone(), runs.clone());
        let reactor = create_data_reactor(0, false, move |watcher, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            let use_b = reader
                .get_data(Some(watcher), &["s", "use_b"], &Mask::Full, None)
                .unwrap();
            let key = if use_b == Some(json!(true)) { "b" } else { "a" };
            reader.get_data(Some(watcher), &["s", key], &Mask::Full, None).unwrap();
        });
        assert_eq!(reactor.watcher().unwrap().watch_count(), 2);

        store.update_data(&["s", "b"], json!(2)).unwrap();
        store.flush_now();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        store.update_data(&["s", "use_b"], json!(true)).unwrap();
        store.flush_now();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // "a" is no longer read, so it no longer triggers
        store.update_data(&["s", "a"], json!(5)).unwrap();
        store.flush_now();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        store.update_data(&["s", "b"], json!(3)).unwrap();
        store.flush_now();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn receives_the_triggering_changes() {
        let store = store();
        let batches = Arc::new(Mutex::new(Vec::new()));
        let (reader, target) = (store.clone(), batches.clone());
        let reactor = create_data_reactor(0, false, move |watcher, changes| {
            target
                .lock()
                .push(changes.iter().map(|c| c.path_str.clone()).collect::<Vec<_>>());
            reader.get_data(Some(watcher), &["s", "a"], &Mask::Full, None).unwrap();
        });

        store.update_data(&["s", "a"], json!(2)).unwrap();
        store.flush_now();
        assert_eq!(*batches.lock(), vec![Vec::new(), vec!["s/a".to_string()]]);
        reactor.destroy();
    }

    #[test]
    fn destroyed_reactor_stops() {
        let store = store();
        let runs = Arc::new(AtomicUsize::new(0));
        let (reader, counter) = (store.clone(), runs.clone());
        let reactor = create_data_reactor(0, false, move |watcher, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            reader.get_data(Some(watcher), &["s", "a"], &Mask::Full, None).unwrap();
        });
        reactor.destroy();
        reactor.destroy();
        assert!(reactor.is_destroyed());
        assert!(!store.has_any_watches("s"));

        store.update_data(&["s", "a"], json!(2)).unwrap();
        store.flush_now();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
