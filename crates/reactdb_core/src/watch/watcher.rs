//! Watchers and the watches they own.

use crate::types::{path_str, WatcherId};
use parking_lot::Mutex;
use reactdb_schema::{is_key_set_segment, Mask};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

static NEXT_WATCHER_ID: AtomicU64 = AtomicU64::new(0);

/// Callback invoked with one ordered batch of changes.
pub type TriggerCallback = Arc<dyn Fn(&Watcher, &[Change]) + Send + Sync>;

/// One changed projection delivered to a watcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    /// Full path of the change, store name first.
    pub path: Vec<String>,
    /// Slash-joined path.
    pub path_str: String,
    /// Number of path segments.
    pub depth: usize,
    /// Mask the watch was registered with.
    #[serde(skip)]
    pub mask: Mask,
    /// The freshly projected value. `None` if nothing is stored there.
    pub data: Option<Value>,
}

impl Change {
    pub(crate) fn new(path: Vec<String>, mask: Mask, data: Option<Value>) -> Self {
        Self {
            path_str: path_str(&path),
            depth: path.len(),
            path,
            mask,
            data,
        }
    }
}

/// A single (watcher, path, mask) subscription.
///
/// Shared between the watcher that owns it and the watch tree it is
/// registered in. Invalidating it leaves the tree entry in place; the tree
/// drops it lazily during its next walk.
pub(crate) struct Watch {
    pub(crate) source_id: u64,
    pub(crate) path: Vec<String>,
    pub(crate) path_str: String,
    pub(crate) mask: Mask,
    pub(crate) defaults: Option<Value>,
    pub(crate) multi_data: bool,
    watcher: Weak<WatcherInner>,
    alive: AtomicBool,
    count: AtomicUsize,
    data: Mutex<Option<Value>>,
}

impl Watch {
    pub(crate) fn new(
        source_id: u64,
        path: Vec<String>,
        mask: Mask,
        defaults: Option<Value>,
        data: Option<Value>,
        watcher: &Watcher,
    ) -> Self {
        Self {
            source_id,
            path_str: path_str(&path),
            multi_data: path.iter().any(|k| is_key_set_segment(k)),
            path,
            mask,
            defaults,
            watcher: Arc::downgrade(&watcher.inner),
            alive: AtomicBool::new(true),
            count: AtomicUsize::new(1),
            data: Mutex::new(data),
        }
    }

    /// Returns true while the watch is owned by a live watcher.
    pub(crate) fn is_live(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.watcher.strong_count() > 0
    }

    pub(crate) fn invalidate(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub(crate) fn watcher(&self) -> Option<Watcher> {
        if !self.alive.load(Ordering::Acquire) {
            return None;
        }
        self.watcher.upgrade().map(|inner| Watcher { inner })
    }

    pub(crate) fn bump(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn cached(&self) -> Option<Value> {
        self.data.lock().clone()
    }

    /// Stores `data` if it differs from the cached value. Returns true if it did.
    pub(crate) fn update_cached(&self, data: &Option<Value>) -> bool {
        let mut cached = self.data.lock();
        if *cached == *data {
            return false;
        }
        cached.clone_from(data);
        true
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("path", &self.path_str)
            .field("mask", &self.mask)
            .field("alive", &self.is_live())
            .finish()
    }
}

struct WatcherState {
    watches: Vec<Arc<Watch>>,
    read_only: bool,
    destroyed: bool,
}

struct WatcherInner {
    id: WatcherId,
    priority: i32,
    trigger_immediate: bool,
    callback: TriggerCallback,
    state: Mutex<WatcherState>,
}

/// A consumer of change notifications.
///
/// A watcher owns the watches registered through it and receives one
/// callback per flush with every change to those watches, ordered shallow
/// paths first. Watchers with a negative priority, or created as
/// immediate, are notified synchronously from the change that caused it.
///
/// Cloning a watcher yields another handle to the same watcher. The
/// watcher's watches stop firing once every handle is dropped.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatcherInner>,
}

impl Watcher {
    /// Creates a watcher.
    pub fn new<F>(priority: i32, trigger_immediate: bool, callback: F) -> Self
    where
        F: Fn(&Watcher, &[Change]) + Send + Sync + 'static,
    {
        Self::with_callback(priority, trigger_immediate, Arc::new(callback))
    }

    /// Creates a watcher from a shared callback.
    pub fn with_callback(priority: i32, trigger_immediate: bool, callback: TriggerCallback) -> Self {
        let id = WatcherId::new(NEXT_WATCHER_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(WatcherInner {
                id,
                priority,
                trigger_immediate: trigger_immediate || priority < 0,
                callback,
                state: Mutex::new(WatcherState {
                    watches: Vec::new(),
                    read_only: false,
                    destroyed: false,
                }),
            }),
        }
    }

    /// Returns the watcher's ID. IDs increase in creation order.
    pub fn id(&self) -> WatcherId {
        self.inner.id
    }

    /// Returns the delivery priority (lower is earlier).
    pub fn priority(&self) -> i32 {
        self.inner.priority
    }

    /// Returns true if changes are delivered synchronously.
    pub fn is_immediate(&self) -> bool {
        self.inner.trigger_immediate
    }

    /// Returns true if new watches cannot be registered.
    pub fn is_read_only(&self) -> bool {
        self.inner.state.lock().read_only
    }

    /// Returns true once [`destroy`](Self::destroy) has been called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Returns the number of watches this watcher owns.
    pub fn watch_count(&self) -> usize {
        self.inner.state.lock().watches.len()
    }

    /// Starts a compute pass: zeroes reference counts and allows new watches.
    pub fn reset_watches(&self) {
        let mut state = self.inner.state.lock();
        for watch in &state.watches {
            watch.count.store(0, Ordering::Release);
        }
        state.read_only = false;
    }

    /// Ends a compute pass: drops every watch not read since
    /// [`reset_watches`](Self::reset_watches) and turns read-only.
    pub fn prune_unused_watches(&self) {
        let mut state = self.inner.state.lock();
        state.watches.retain(|watch| {
            let used = watch.count.load(Ordering::Acquire) > 0;
            if !used {
                watch.invalidate();
            }
            used
        });
        state.read_only = true;
    }

    /// Drops every watch with this path and mask.
    pub fn remove_watch<S: AsRef<str>>(&self, path: &[S], mask: &Mask) {
        let path = path_str(path);
        let mut state = self.inner.state.lock();
        state.watches.retain(|watch| {
            let matched = watch.path_str == path && watch.mask == *mask;
            if matched {
                watch.invalidate();
            }
            !matched
        });
    }

    /// Invalidates every watch and stops further delivery.
    pub fn destroy(&self) {
        let mut state = self.inner.state.lock();
        for watch in state.watches.drain(..) {
            watch.invalidate();
        }
        state.destroyed = true;
    }

    /// Runs the callback with `changes`.
    pub fn trigger(&self, changes: &[Change]) {
        (self.inner.callback)(self, changes);
    }

    pub(crate) fn find_watch(&self, source_id: u64, path: &str, mask: &Mask) -> Option<Arc<Watch>> {
        self.inner
            .state
            .lock()
            .watches
            .iter()
            .find(|w| w.source_id == source_id && w.path_str == path && w.mask == *mask)
            .cloned()
    }

    pub(crate) fn push_watch(&self, watch: Arc<Watch>) {
        self.inner.state.lock().watches.push(watch);
    }
}

impl PartialEq for Watcher {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Watcher {}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("priority", &self.inner.priority)
            .field("immediate", &self.inner.trigger_immediate)
            .finish()
    }
}
