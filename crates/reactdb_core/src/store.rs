//! The store registry.
//!
//! A [`DataStore`] holds any number of named documents ("stores"). Every
//! path handed to it starts with the store name. Mutations go through the
//! merge engine and are recorded into one change tree keyed by store name;
//! reads through a [`Watcher`] register watches that the scheduler later
//! intersects with that change tree.

use crate::change_tree::ChangeTree;
use crate::config::{EngineConfig, StoreOptions};
use crate::diagnostics::{Diagnostic, DiagnosticReason, DiagnosticSink};
use crate::error::{CoreError, CoreResult};
use crate::merge::{
    apply_action, get_child, get_child_mut, get_path, remove_child, set_child, MergeOptions,
};
use crate::types::{path_str, to_path, ChangeOptions, MergeAction};
use crate::watch::{
    ManualTicker, TestInfo, TickScheduler, Trigger, TriggeredWatch, WalkContext, Watch,
    WatchScheduler, WatchSource, WatchTree, Watcher,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use reactdb_schema::{is_key_set_segment, validate_projection, Mask, ProjectionCheck, SchemaNode};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

struct ServerState {
    data: Value,
    change_tree: ChangeTree,
    client_change_tree: Option<ChangeTree>,
}

struct StoreEntry {
    options: StoreOptions,
    data: Value,
    server: Option<ServerState>,
}

#[derive(Default)]
struct RegistryState {
    stores: IndexMap<String, StoreEntry>,
    change_tree: ChangeTree,
}

#[derive(Default)]
struct WatchTrees {
    batched: WatchTree,
    immediate: WatchTree,
}

impl WatchTrees {
    fn for_watcher(&mut self, watcher: &Watcher) -> &mut WatchTree {
        if watcher.is_immediate() {
            &mut self.immediate
        } else {
            &mut self.batched
        }
    }
}

struct StoreInner {
    id: u64,
    config: EngineConfig,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    scheduler: Arc<WatchScheduler>,
    // lock order: state, then watches
    state: Mutex<RegistryState>,
    watches: Mutex<WatchTrees>,
}

/// Builder for a [`DataStore`].
pub struct DataStoreBuilder {
    config: EngineConfig,
    scheduler: Option<Arc<WatchScheduler>>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
}

impl DataStoreBuilder {
    /// Creates a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            scheduler: None,
            diagnostics: None,
        }
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Schedules batched delivery on `ticker`.
    #[must_use]
    pub fn ticker(mut self, ticker: Arc<dyn TickScheduler>) -> Self {
        self.scheduler = Some(WatchScheduler::new(ticker));
        self
    }

    /// Shares a scheduler with other stores.
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<WatchScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Sends diagnostics to `sink` as well as the log.
    #[must_use]
    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    /// Builds the store.
    ///
    /// Without a ticker or scheduler, ticks are queued on a private
    /// [`ManualTicker`] and batches are delivered by [`DataStore::flush_now`].
    pub fn build(self) -> DataStore {
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| WatchScheduler::new(Arc::new(ManualTicker::new())));
        DataStore {
            inner: Arc::new(StoreInner {
                id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
                config: self.config,
                diagnostics: self.diagnostics,
                scheduler,
                state: Mutex::new(RegistryState::default()),
                watches: Mutex::new(WatchTrees::default()),
            }),
        }
    }
}

impl Default for DataStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A registry of named, schema-validated documents with watches.
///
/// Cloning yields another handle to the same registry.
///
/// # Example
///
/// ```
/// use reactdb_core::{DataStore, Mask, StoreOptions, Watcher};
/// use reactdb_schema::SchemaNode;
/// use serde_json::json;
/// use std::sync::{Arc, Mutex};
///
/// let store = DataStore::builder().build();
/// let schema = SchemaNode::from_json(&json!({ "x": { "count": "INT" } })).unwrap();
/// store.register_store("s", StoreOptions::new().schema(schema), None).unwrap();
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// let watcher = Watcher::new(0, false, move |_, changes| {
///     sink.lock().unwrap().push(changes[0].data.clone());
/// });
/// store.get_data(Some(&watcher), &["s", "x"], &Mask::Full, None).unwrap();
///
/// store.update_data(&["s", "x", "count"], json!(6)).unwrap();
/// store.flush_now();
/// assert_eq!(*seen.lock().unwrap(), vec![Some(json!({ "count": 6 }))]);
/// ```
#[derive(Clone)]
pub struct DataStore {
    inner: Arc<StoreInner>,
}

/// Handle to a code watch created by [`DataStore::add_code_watch`].
///
/// The watch stops firing when the handle is dropped or removed.
#[derive(Debug)]
pub struct CodeWatch {
    watcher: Watcher,
}

impl CodeWatch {
    /// Returns the watcher behind this code watch.
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}

fn split_path<S: AsRef<str>>(path: &[S]) -> CoreResult<(String, Vec<String>)> {
    let mut keys = to_path(path);
    if keys.is_empty() {
        return Err(CoreError::EmptyPath);
    }
    let name = keys.remove(0);
    Ok((name, keys))
}

fn field_count(value: &Value) -> usize {
    match value {
        Value::Object(map) => map.len() + map.values().map(field_count).sum::<usize>(),
        Value::Array(items) => items.len() + items.iter().map(field_count).sum::<usize>(),
        _ => 0,
    }
}

/// Copies every subtree `change` marks from `src` over `dst`.
fn clone_changed(dst: &mut Value, src: &Value, change: &ChangeTree) {
    let containers = (dst.is_object() || dst.is_array()) && (src.is_object() || src.is_array());
    if change.is_forced() || !containers {
        *dst = src.clone();
        return;
    }
    for (key, sub_change) in change.children() {
        match get_child(src, key) {
            Some(src_child) => match get_child_mut(dst, key) {
                Some(dst_child) => clone_changed(dst_child, src_child, sub_change),
                None => {
                    set_child(dst, key, src_child.clone());
                }
            },
            None => {
                remove_child(dst, key);
            }
        }
    }
}

impl DataStore {
    /// Returns a builder.
    pub fn builder() -> DataStoreBuilder {
        DataStoreBuilder::new()
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Returns the scheduler delivering this store's batches.
    pub fn scheduler(&self) -> &Arc<WatchScheduler> {
        &self.inner.scheduler
    }

    // ---- registration ----

    /// Registers a store.
    ///
    /// `initial` defaults to the schema's defaults, or `{}` without a schema.
    pub fn register_store(
        &self,
        name: &str,
        options: StoreOptions,
        initial: Option<Value>,
    ) -> CoreResult<()> {
        let mut state = self.inner.state.lock();
        if state.stores.contains_key(name) {
            return Err(CoreError::DuplicateStore {
                name: name.to_string(),
            });
        }
        let data = initial.unwrap_or_else(|| match &options.schema {
            Some(schema) => schema.defaults(true),
            None => Value::Object(Map::new()),
        });
        let server = options.server_synced.then(|| ServerState {
            data: data.clone(),
            change_tree: ChangeTree::new(),
            client_change_tree: None,
        });
        tracing::debug!(store = name, server_synced = options.server_synced, "registered store");
        state.stores.insert(
            name.to_string(),
            StoreEntry {
                options,
                data,
                server,
            },
        );
        Ok(())
    }

    /// Returns true if a store is registered under `name`.
    pub fn has_store(&self, name: &str) -> bool {
        self.inner.state.lock().stores.contains_key(name)
    }

    /// Returns the names of all stores in registration order.
    pub fn store_names(&self) -> Vec<String> {
        self.inner.state.lock().stores.keys().cloned().collect()
    }

    // ---- reads ----

    /// Reads a masked projection of the data at `path`.
    ///
    /// With a watcher, a previously registered watch for the same path and
    /// mask returns its cached value; otherwise the projection is computed
    /// and, unless the watcher is read-only, a watch is registered.
    pub fn get_data<S: AsRef<str>>(
        &self,
        watcher: Option<&Watcher>,
        path: &[S],
        mask: &Mask,
        defaults: Option<&Value>,
    ) -> CoreResult<Option<Value>> {
        let full_path = to_path(path);
        let Some((name, keys)) = full_path.split_first() else {
            return Err(CoreError::EmptyPath);
        };

        if let Some(watcher) = watcher {
            if let Some(watch) = watcher.find_watch(self.inner.id, &path_str(&full_path), mask) {
                watch.bump();
                return Ok(watch.cached());
            }
        }

        let (data, diagnostics) = self.inner.project(name, keys, mask, defaults)?;
        for diagnostic in diagnostics {
            diagnostic.emit(self.inner.diagnostics.as_deref());
        }

        if let Some(watcher) = watcher {
            if !watcher.is_read_only() {
                self.register_watch(watcher, full_path, mask, defaults, data.clone());
            }
        }
        Ok(data)
    }

    /// Reads the whole value at `path` without watching it.
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> CoreResult<Option<Value>> {
        self.get_data(None, path, &Mask::Full, None)
    }

    /// Registers a watch and returns the current value.
    ///
    /// Paths containing `_ids` or `_idxs` are registered without a read and
    /// return `None`.
    pub fn add_watch<S: AsRef<str>>(
        &self,
        watcher: &Watcher,
        path: &[S],
        mask: &Mask,
        defaults: Option<&Value>,
    ) -> CoreResult<Option<Value>> {
        if watcher.is_read_only() {
            return Err(CoreError::ReadOnlyWatcher {
                watcher: watcher.id().as_u64(),
            });
        }
        let full_path = to_path(path);
        if full_path.iter().any(|k| is_key_set_segment(k)) {
            let name = full_path.first().ok_or(CoreError::EmptyPath)?;
            if !self.has_store(name) {
                return Err(CoreError::unknown_store(name.as_str()));
            }
            self.register_watch(watcher, full_path, mask, defaults, None);
            return Ok(None);
        }
        self.get_data(Some(watcher), path, mask, defaults)
    }

    /// Returns a copy of the raw data at `path`, without watching it.
    pub fn get_raw_data<S: AsRef<str>>(&self, path: &[S]) -> CoreResult<Option<Value>> {
        let (name, keys) = split_path(path)?;
        let state = self.inner.state.lock();
        let entry = state
            .stores
            .get(&name)
            .ok_or_else(|| CoreError::unknown_store(name.as_str()))?;
        Ok(get_path(&entry.data, &keys).cloned())
    }

    /// Returns true if anything is stored at `path`.
    pub fn has_data<S: AsRef<str>>(&self, path: &[S]) -> bool {
        matches!(self.get_raw_data(path), Ok(Some(_)))
    }

    /// Returns the schema describing `path`, if the store has one.
    pub fn get_schema<S: AsRef<str>>(&self, path: &[S]) -> CoreResult<Option<SchemaNode>> {
        let (name, keys) = split_path(path)?;
        let state = self.inner.state.lock();
        let entry = state
            .stores
            .get(&name)
            .ok_or_else(|| CoreError::unknown_store(name.as_str()))?;
        Ok(entry
            .options
            .schema
            .as_deref()
            .and_then(|schema| schema.for_path(&keys))
            .cloned())
    }

    // ---- changes ----

    /// Applies `action` at `path`.
    ///
    /// Returns true if the document changed. Server-synced stores must use
    /// [`change_client_data`](Self::change_client_data) or
    /// [`change_server_data`](Self::change_server_data) instead.
    pub fn change_data<S: AsRef<str>>(
        &self,
        action: MergeAction,
        path: &[S],
        fields: Value,
        options: &ChangeOptions,
    ) -> CoreResult<bool> {
        let (name, keys) = split_path(path)?;
        if self.is_server_synced(&name)? {
            return Err(CoreError::ServerSyncedStore { name });
        }
        self.change_data_internal(&name, action, &keys, fields, options)
    }

    /// Creates data at a path that holds nothing.
    pub fn create_data<S: AsRef<str>>(&self, path: &[S], fields: Value) -> CoreResult<bool> {
        self.change_data(MergeAction::Create, path, fields, &ChangeOptions::default())
    }

    /// Updates fields of existing data.
    pub fn update_data<S: AsRef<str>>(&self, path: &[S], fields: Value) -> CoreResult<bool> {
        self.change_data(MergeAction::Update, path, fields, &ChangeOptions::default())
    }

    /// Updates fields, creating missing containers.
    pub fn upsert_data<S: AsRef<str>>(&self, path: &[S], fields: Value) -> CoreResult<bool> {
        self.change_data(MergeAction::Upsert, path, fields, &ChangeOptions::default())
    }

    /// Replaces data, pruning fields the new value omits.
    pub fn replace_data<S: AsRef<str>>(&self, path: &[S], fields: Value) -> CoreResult<bool> {
        self.change_data(MergeAction::Replace, path, fields, &ChangeOptions::default())
    }

    /// Removes the key at `path`.
    pub fn remove_data<S: AsRef<str>>(&self, path: &[S]) -> CoreResult<bool> {
        self.change_data(MergeAction::Remove, path, Value::Null, &ChangeOptions::default())
    }

    /// Keeps the smaller of the stored and given numbers.
    pub fn min_data<S: AsRef<str>>(&self, path: &[S], fields: Value) -> CoreResult<bool> {
        self.change_data(MergeAction::Min, path, fields, &ChangeOptions::default())
    }

    /// Keeps the larger of the stored and given numbers.
    pub fn max_data<S: AsRef<str>>(&self, path: &[S], fields: Value) -> CoreResult<bool> {
        self.change_data(MergeAction::Max, path, fields, &ChangeOptions::default())
    }

    /// Flips the boolean at `path` and returns its previous value.
    pub fn toggle_bool<S: AsRef<str>>(&self, path: &[S]) -> CoreResult<bool> {
        match self.get_raw_data(path)? {
            Some(Value::Bool(current)) => {
                self.change_data(
                    MergeAction::Replace,
                    path,
                    Value::Bool(!current),
                    &ChangeOptions::default(),
                )?;
                Ok(current)
            }
            _ => Err(CoreError::NotABoolean {
                path: path_str(path),
            }),
        }
    }

    /// Replaces the data at `path` with its schema defaults.
    pub fn reset_to_defaults<S: AsRef<str>>(&self, path: &[S]) -> CoreResult<bool> {
        let (name, keys) = split_path(path)?;
        let defaults = {
            let state = self.inner.state.lock();
            let entry = state
                .stores
                .get(&name)
                .ok_or_else(|| CoreError::unknown_store(name.as_str()))?;
            let schema = entry
                .options
                .schema
                .as_deref()
                .ok_or_else(|| CoreError::NoSchema { name: name.clone() })?;
            let node = schema.for_path(&keys).ok_or_else(|| {
                CoreError::invalid_operation(format!(
                    "path '{}' is not described by the schema",
                    path_str(path)
                ))
            })?;
            node.defaults(keys.is_empty())
        };
        self.change_data(MergeAction::Replace, path, defaults, &ChangeOptions::default())
    }

    /// Resets a whole store, including server truth, to its defaults.
    pub fn reset_store_to_defaults(&self, name: &str) -> CoreResult<()> {
        let (defaults, server_synced) = {
            let state = self.inner.state.lock();
            let entry = state
                .stores
                .get(name)
                .ok_or_else(|| CoreError::unknown_store(name))?;
            let defaults = match &entry.options.schema {
                Some(schema) => schema.defaults(true),
                None => Value::Object(Map::new()),
            };
            (defaults, entry.server.is_some())
        };

        if server_synced {
            self.merge_server(name, MergeAction::Replace, &[], defaults.clone())?;
            self.with_server(name, |server| server.change_tree.clear())?;
        }
        self.change_data_internal(
            name,
            MergeAction::Replace,
            &[],
            defaults,
            &ChangeOptions::default(),
        )?;
        if server_synced {
            self.with_server(name, |server| server.client_change_tree = None)?;
        }
        Ok(())
    }

    /// Resets every store to its defaults.
    pub fn reset_all(&self) -> CoreResult<()> {
        for name in self.store_names() {
            self.reset_store_to_defaults(&name)?;
        }
        Ok(())
    }

    fn is_server_synced(&self, name: &str) -> CoreResult<bool> {
        let state = self.inner.state.lock();
        state
            .stores
            .get(name)
            .map(|entry| entry.server.is_some())
            .ok_or_else(|| CoreError::unknown_store(name))
    }

    fn change_data_internal(
        &self,
        name: &str,
        action: MergeAction,
        keys: &[String],
        fields: Value,
        change_options: &ChangeOptions,
    ) -> CoreResult<bool> {
        let changed = {
            let mut guard = self.inner.state.lock();
            let RegistryState {
                stores,
                change_tree,
            } = &mut *guard;
            let entry = stores
                .get_mut(name)
                .ok_or_else(|| CoreError::unknown_store(name))?;
            let StoreEntry {
                options,
                data,
                server,
            } = entry;

            let merge = MergeOptions {
                schema: options.schema.as_deref(),
                forward_feed: options.forward_feed,
                allow_sub_objects: change_options.allow_sub_object_create
                    || options.allow_sub_object_create,
                client_key: change_options.client_key.as_deref(),
                store_name: Some(name),
                diagnostics: self.inner.diagnostics.as_deref(),
            };

            let store_change = change_tree.entry(name);
            let changed = if store_change.is_forced() {
                apply_action(data, action, keys, fields, merge, None)
            } else {
                apply_action(data, action, keys, fields, merge, Some(&mut *store_change))
            };

            if changed {
                if let Some(server) = server.as_mut() {
                    server
                        .client_change_tree
                        .get_or_insert_with(ChangeTree::new)
                        .merge_from(store_change);
                }
            }
            changed
        };

        if changed {
            self.mark_pending();
            if !change_options.no_watch_trigger {
                self.inner.scheduler.trigger_next_frame();
            }
        }
        Ok(changed)
    }

    // ---- server-synced stores ----

    /// Applies `action` to server truth only. Nothing is delivered until
    /// [`reset_client_to_server`](Self::reset_client_to_server).
    pub fn change_server_data<S: AsRef<str>>(
        &self,
        action: MergeAction,
        path: &[S],
        fields: Value,
    ) -> CoreResult<bool> {
        let (name, keys) = split_path(path)?;
        self.merge_server(&name, action, &keys, fields)
    }

    /// Applies an optimistic local change to a server-synced store.
    pub fn change_client_data<S: AsRef<str>>(
        &self,
        action: MergeAction,
        path: &[S],
        fields: Value,
        options: &ChangeOptions,
    ) -> CoreResult<bool> {
        let (name, keys) = split_path(path)?;
        if !self.is_server_synced(&name)? {
            return Err(CoreError::not_server_synced(name));
        }
        self.change_data_internal(&name, action, &keys, fields, options)
    }

    /// Discards optimistic client changes and copies every subtree changed
    /// on either side from server truth.
    ///
    /// Without `force`, does nothing unless the client changed something.
    pub fn reset_client_to_server(&self, name: &str, force: bool) -> CoreResult<()> {
        let changed = {
            let mut guard = self.inner.state.lock();
            let RegistryState {
                stores,
                change_tree,
            } = &mut *guard;
            let entry = stores
                .get_mut(name)
                .ok_or_else(|| CoreError::unknown_store(name))?;
            let StoreEntry { data, server, .. } = entry;
            let server = server
                .as_mut()
                .ok_or_else(|| CoreError::not_server_synced(name))?;
            if server.client_change_tree.is_none() && !force {
                return Ok(());
            }

            let store_change = change_tree.entry(name);
            store_change.merge_from(&server.change_tree);
            if let Some(client) = server.client_change_tree.take() {
                store_change.merge_from(&client);
            }
            server.change_tree.clear();

            clone_changed(data, &server.data, store_change);
            !store_change.is_empty()
        };

        if changed {
            self.mark_pending();
            self.inner.scheduler.trigger_next_frame();
        }
        Ok(())
    }

    /// Forgets the server-side change record.
    pub fn reset_server_change_tree(&self, name: &str) -> CoreResult<()> {
        self.with_server(name, |server| server.change_tree.clear())
    }

    /// Returns a copy of server truth at `path`.
    pub fn get_server_data<S: AsRef<str>>(&self, path: &[S]) -> CoreResult<Option<Value>> {
        let (name, keys) = split_path(path)?;
        let state = self.inner.state.lock();
        let entry = state
            .stores
            .get(&name)
            .ok_or_else(|| CoreError::unknown_store(name.as_str()))?;
        let server = entry
            .server
            .as_ref()
            .ok_or_else(|| CoreError::not_server_synced(name.as_str()))?;
        Ok(get_path(&server.data, &keys).cloned())
    }

    /// Applies an action read back from a persisted log.
    ///
    /// Server-synced stores take it as server truth and resync the client.
    pub fn apply_replayed_action<S: AsRef<str>>(
        &self,
        action: MergeAction,
        path: &[S],
        fields: Value,
        ordering_key: Option<&str>,
    ) -> CoreResult<bool> {
        let (name, keys) = split_path(path)?;
        if self.is_server_synced(&name)? {
            let changed = self.merge_server(&name, action, &keys, fields)?;
            self.reset_client_to_server(&name, true)?;
            return Ok(changed);
        }
        let options = ChangeOptions {
            client_key: ordering_key.map(str::to_string),
            ..ChangeOptions::default()
        };
        self.change_data_internal(&name, action, &keys, fields, &options)
    }

    fn merge_server(
        &self,
        name: &str,
        action: MergeAction,
        keys: &[String],
        fields: Value,
    ) -> CoreResult<bool> {
        let mut state = self.inner.state.lock();
        let entry = state
            .stores
            .get_mut(name)
            .ok_or_else(|| CoreError::unknown_store(name))?;
        let StoreEntry {
            options, server, ..
        } = entry;
        let server = server
            .as_mut()
            .ok_or_else(|| CoreError::not_server_synced(name))?;
        let merge = MergeOptions {
            schema: options.schema.as_deref(),
            forward_feed: options.forward_feed,
            allow_sub_objects: options.allow_sub_object_create,
            client_key: None,
            store_name: Some(name),
            diagnostics: self.inner.diagnostics.as_deref(),
        };
        Ok(apply_action(
            &mut server.data,
            action,
            keys,
            fields,
            merge,
            Some(&mut server.change_tree),
        ))
    }

    fn with_server<F: FnOnce(&mut ServerState)>(&self, name: &str, f: F) -> CoreResult<()> {
        let mut state = self.inner.state.lock();
        let entry = state
            .stores
            .get_mut(name)
            .ok_or_else(|| CoreError::unknown_store(name))?;
        let server = entry
            .server
            .as_mut()
            .ok_or_else(|| CoreError::not_server_synced(name))?;
        f(server);
        Ok(())
    }

    // ---- watches ----

    fn register_watch(
        &self,
        watcher: &Watcher,
        path: Vec<String>,
        mask: &Mask,
        defaults: Option<&Value>,
        data: Option<Value>,
    ) {
        let watch = Arc::new(Watch::new(
            self.inner.id,
            path,
            mask.clone(),
            defaults.cloned(),
            data,
            watcher,
        ));
        watcher.push_watch(watch.clone());
        let mut trees = self.inner.watches.lock();
        trees.for_watcher(watcher).add(&watch.path, watch.clone());
    }

    fn mark_pending(&self) {
        let inner: Arc<dyn WatchSource> = self.inner.clone();
        let source: Weak<dyn WatchSource> = Arc::downgrade(&inner);
        self.inner.scheduler.add_to_pending(self.inner.id, source);
    }

    /// Returns true if a live watch sits at `path` or one of its ancestors.
    pub fn has_watches<S: AsRef<str>>(&self, path: &[S]) -> bool {
        let mut trees = self.inner.watches.lock();
        trees.batched.has_watches_on_path(path) || trees.immediate.has_watches_on_path(path)
    }

    /// Returns true if a live watch sits at `path` or anywhere below it.
    pub fn has_watches_in_tree<S: AsRef<str>>(&self, path: &[S]) -> bool {
        let mut trees = self.inner.watches.lock();
        let WatchTrees { batched, immediate } = &mut *trees;
        let found = [batched, immediate]
            .into_iter()
            .any(|tree| tree.node_mut(path).is_some_and(|node| node.has_any()));
        found
    }

    /// Returns true if any live watch sits anywhere in store `name`.
    pub fn has_any_watches(&self, name: &str) -> bool {
        self.has_watches_in_tree(&[name])
    }

    /// Returns the number of live watches registered exactly at `path`.
    pub fn count_watches<S: AsRef<str>>(&self, path: &[S]) -> usize {
        let mut trees = self.inner.watches.lock();
        let WatchTrees { batched, immediate } = &mut *trees;
        let count: usize = [batched, immediate]
            .into_iter()
            .map(|tree| tree.node_mut(path).map_or(0, |node| node.count_live()))
            .sum();
        count
    }

    /// Watches `path` from code. `callback` receives each changed value.
    ///
    /// Returns the handle and the current value.
    pub fn add_code_watch<S, F>(
        &self,
        path: &[S],
        mask: &Mask,
        priority: i32,
        callback: F,
    ) -> CoreResult<(CodeWatch, Option<Value>)>
    where
        S: AsRef<str>,
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        let watcher = Watcher::new(priority, false, move |_, changes| {
            for change in changes {
                tracing::debug!(path = %change.path_str, "code watch triggered");
                callback(change.data.as_ref());
            }
        });
        let data = self.add_watch(&watcher, path, mask, None)?;
        Ok((CodeWatch { watcher }, data))
    }

    /// Stops a code watch.
    pub fn remove_code_watch(&self, handle: CodeWatch) {
        tracing::debug!(watcher = %handle.watcher.id(), "removing code watch");
        handle.watcher.destroy();
    }

    // ---- delivery ----

    /// Runs `callback` once everything pending has been delivered.
    pub fn flush<F>(&self, callback: F) -> CoreResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.scheduler.flush(callback)
    }

    /// Delivers everything pending right now.
    pub fn flush_now(&self) {
        self.inner.scheduler.flush_now();
    }

    /// Computes one pass without delivering it, recording what happened to
    /// each visited watch into `test_info`.
    pub fn triggered_watches(&self, immediate: bool, test_info: &mut Vec<TestInfo>) -> Vec<Trigger> {
        self.inner.scheduler.triggered_watches(immediate, Some(test_info))
    }
}

impl fmt::Debug for DataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStore")
            .field("id", &self.inner.id)
            .field("stores", &self.store_names())
            .finish()
    }
}

impl StoreInner {
    fn read(&self, name: &str, keys: &[String], mask: &Mask, defaults: Option<&Value>) -> Option<Value> {
        let state = self.state.lock();
        let entry = state.stores.get(name)?;
        mask.project(get_path(&entry.data, keys), defaults)
    }

    fn project(
        &self,
        name: &str,
        keys: &[String],
        mask: &Mask,
        defaults: Option<&Value>,
    ) -> CoreResult<(Option<Value>, Vec<Diagnostic>)> {
        let state = self.state.lock();
        let entry = state
            .stores
            .get(name)
            .ok_or_else(|| CoreError::unknown_store(name))?;
        let full_path = || format!("{name}/{}", path_str(keys));
        let mut diagnostics = Vec::new();

        if self.config.validate_masks && !mask.is_full() {
            if let Some(schema) = entry.options.schema.as_deref() {
                if let Err(err) = validate_projection(schema, keys, mask, ProjectionCheck::Exists) {
                    diagnostics.push(
                        Diagnostic::new("store.get_data", full_path(), DiagnosticReason::ProjectionMismatch)
                            .with_detail(Value::String(err.to_string())),
                    );
                }
            }
        }

        let data = mask.project(get_path(&entry.data, keys), defaults);

        if mask.is_full() && self.config.check_unmasked_reads {
            let count = data.as_ref().map_or(0, field_count);
            if count > self.config.max_unmasked_fields {
                diagnostics.push(
                    Diagnostic::new("store.get_data", full_path(), DiagnosticReason::LargeUnmaskedRead)
                        .with_detail(json!({ "field_count": count })),
                );
            }
        }
        Ok((data, diagnostics))
    }
}

fn live_keys(stores: &IndexMap<String, StoreEntry>, path: &[String]) -> Vec<String> {
    let Some((name, keys)) = path.split_first() else {
        return Vec::new();
    };
    let Some(entry) = stores.get(name) else {
        return Vec::new();
    };
    match get_path(&entry.data, keys) {
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        Some(Value::Array(items)) => (0..items.len()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    }
}

impl WatchSource for StoreInner {
    fn collect_triggered(
        &self,
        immediate: bool,
        test_info: Option<&mut Vec<TestInfo>>,
    ) -> Vec<TriggeredWatch> {
        let mut state = self.state.lock();
        let mut trees = self.watches.lock();
        let triggered = {
            let stores = &state.stores;
            let keys_at = |path: &[String]| live_keys(stores, path);
            let mut ctx = WalkContext {
                keys_at: &keys_at,
                triggered: Vec::new(),
                test_info,
            };
            let tree = if immediate {
                &mut trees.immediate
            } else {
                &mut trees.batched
            };
            tree.walk(&state.change_tree, &mut Vec::new(), &mut ctx);
            ctx.triggered
        };
        if !immediate {
            state.change_tree.clear();
        }
        triggered
    }

    fn read_projection(
        &self,
        path: &[String],
        mask: &Mask,
        defaults: Option<&Value>,
    ) -> Option<Value> {
        let (name, keys) = path.split_first()?;
        self.read(name, keys, mask, defaults)
    }

    fn projection_timed(&self, path: &[String], elapsed: Duration) {
        let Some(limit) = self.config.slow_projection_warning else {
            return;
        };
        if elapsed > limit {
            let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            Diagnostic::new("watch.trigger", path_str(path), DiagnosticReason::SlowProjection)
                .with_detail(json!({ "elapsed_ms": elapsed_ms }))
                .emit(self.diagnostics.as_deref());
        }
    }
}
