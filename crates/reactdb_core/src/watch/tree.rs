//! Trie of watches keyed by path segment.

use super::watcher::Watch;
use crate::change_tree::ChangeTree;
use indexmap::IndexMap;
use reactdb_schema::is_key_set_segment;
use std::sync::Arc;

/// What happened to a watch during a trigger computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    /// A key-set watch was skipped because nothing at its level was forced.
    EarlyUnchanged,
    /// A wildcard-path watch, which always counts as changed.
    MultiData,
    /// The projection was recomputed; `true` if it differed from the cache.
    Compared(bool),
}

/// A record of one watch visited by a trigger computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestInfo {
    /// Slash-joined path the watch was registered at.
    pub watch_path: String,
    /// What happened to it.
    pub outcome: TestOutcome,
}

/// A watch matched by a walk, with the concrete path it matched at.
pub(crate) struct TriggeredWatch {
    pub(crate) watch: Arc<Watch>,
    pub(crate) path: Vec<String>,
}

pub(crate) struct WalkContext<'a> {
    /// Returns the keys currently present at a path of the live document.
    pub(crate) keys_at: &'a dyn Fn(&[String]) -> Vec<String>,
    pub(crate) triggered: Vec<TriggeredWatch>,
    pub(crate) test_info: Option<&'a mut Vec<TestInfo>>,
}

impl WalkContext<'_> {
    fn record(&mut self, watch: &Watch, outcome: TestOutcome) {
        if let Some(info) = self.test_info.as_deref_mut() {
            info.push(TestInfo {
                watch_path: watch.path_str.clone(),
                outcome,
            });
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct WatchTree {
    watches: Vec<Arc<Watch>>,
    children: IndexMap<String, WatchTree>,
}

impl WatchTree {
    pub(crate) fn add(&mut self, path: &[String], watch: Arc<Watch>) {
        let mut node = self;
        for key in path {
            node = node.children.entry(key.clone()).or_default();
        }
        node.watches.push(watch);
    }

    /// Drops invalidated watches here and returns how many remain.
    pub(crate) fn count_live(&mut self) -> usize {
        self.watches.retain(|w| w.is_live());
        self.watches.len()
    }

    /// Returns true if a live watch sits at `path` or any of its ancestors.
    pub(crate) fn has_watches_on_path<S: AsRef<str>>(&mut self, path: &[S]) -> bool {
        let mut node = self;
        if node.count_live() > 0 {
            return true;
        }
        for key in path {
            node = match node.children.get_mut(key.as_ref()) {
                Some(child) => child,
                None => return false,
            };
            if node.count_live() > 0 {
                return true;
            }
        }
        false
    }

    /// Returns true if a live watch sits anywhere in this subtree.
    pub(crate) fn has_any(&mut self) -> bool {
        self.count_live() > 0 || self.children.values_mut().any(WatchTree::has_any)
    }

    /// Returns the node at `path`, if any watch was ever registered below it.
    pub(crate) fn node_mut<S: AsRef<str>>(&mut self, path: &[S]) -> Option<&mut WatchTree> {
        let mut node = self;
        for key in path {
            node = node.children.get_mut(key.as_ref())?;
        }
        Some(node)
    }

    /// Walks this tree against `change` in lockstep, collecting matched watches.
    ///
    /// Returns false when nothing live remains in this subtree, so the
    /// caller can drop the branch.
    pub(crate) fn walk(
        &mut self,
        change: &ChangeTree,
        path: &mut Vec<String>,
        ctx: &mut WalkContext<'_>,
    ) -> bool {
        if change.is_empty() {
            return true;
        }

        self.watches.retain(|w| w.is_live());
        for watch in &self.watches {
            // key-set watches only care about entries being added or removed
            if !watch.multi_data && watch.mask.is_ids() && !change.has_forced_child() {
                ctx.record(watch, TestOutcome::EarlyUnchanged);
                continue;
            }
            ctx.triggered.push(TriggeredWatch {
                watch: watch.clone(),
                path: path.clone(),
            });
        }

        let mut has_active_branches = false;
        let keys: Vec<String> = self.children.keys().cloned().collect();
        for key in keys {
            let Some(child) = self.children.get_mut(&key) else {
                continue;
            };
            let mut keep = true;
            if is_key_set_segment(&key) {
                let fan_out: Vec<(String, &ChangeTree)> = if change.is_forced() {
                    (ctx.keys_at)(path.as_slice())
                        .into_iter()
                        .map(|k| (k, change))
                        .collect()
                } else {
                    change.children().map(|(k, c)| (k.clone(), c)).collect()
                };
                for (sub_key, sub_change) in fan_out {
                    path.push(sub_key);
                    let active = child.walk(sub_change, path, ctx);
                    path.pop();
                    if !active {
                        keep = false;
                        break;
                    }
                }
            } else {
                let sub_change = if change.is_forced() {
                    Some(change)
                } else {
                    change.get(&key)
                };
                if let Some(sub_change) = sub_change {
                    path.push(key.clone());
                    keep = child.walk(sub_change, path, ctx);
                    path.pop();
                }
            }

            if keep {
                has_active_branches = true;
            } else {
                self.children.shift_remove(&key);
            }
        }

        has_active_branches || !self.watches.is_empty()
    }
}
