//! Turning walked watches into ordered trigger batches.

use super::tree::{TestInfo, TestOutcome, TriggeredWatch};
use super::watcher::{Change, Watcher};
use crate::types::WatcherId;
use reactdb_schema::Mask;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A document owner whose watches the scheduler can trigger.
pub(crate) trait WatchSource: Send + Sync {
    /// Walks the pending change tree against the immediate or batched watch
    /// tree. The batched walk also clears the change tree.
    fn collect_triggered(
        &self,
        immediate: bool,
        test_info: Option<&mut Vec<TestInfo>>,
    ) -> Vec<TriggeredWatch>;

    /// Projects the live document at `path`.
    fn read_projection(&self, path: &[String], mask: &Mask, defaults: Option<&Value>)
        -> Option<Value>;

    /// Told how long recomputing the projection of a watch took.
    fn projection_timed(&self, path: &[String], elapsed: Duration);
}

/// Everything one watcher is told in one pass.
#[derive(Debug, Clone)]
pub struct Trigger {
    /// The watcher to notify.
    pub watcher: Watcher,
    /// The watcher's priority.
    pub priority: i32,
    /// Depth of the shallowest changed path.
    pub min_depth: usize,
    /// Changed projections, shallow paths first, one per path.
    pub changes: Vec<Change>,
}

/// Collects the triggers for one pass over `sources`.
pub(crate) fn get_triggered_watches(
    sources: &[Arc<dyn WatchSource>],
    immediate: bool,
    mut test_info: Option<&mut Vec<TestInfo>>,
) -> Vec<Trigger> {
    let mut candidates = Vec::new();
    for source in sources {
        let found = source.collect_triggered(immediate, test_info.as_deref_mut());
        candidates.extend(found.into_iter().map(|t| (source, t)));
    }

    let mut triggers: Vec<Trigger> = Vec::new();
    let mut by_watcher: HashMap<WatcherId, (usize, HashSet<String>)> = HashMap::new();
    let mut change_count = 0usize;

    for (source, TriggeredWatch { watch, path }) in candidates {
        let start = Instant::now();
        let data = source.read_projection(&path, &watch.mask, watch.defaults.as_ref());

        let (changed, outcome) = if watch.multi_data {
            (true, TestOutcome::MultiData)
        } else {
            // forced change nodes over-report; only a real difference counts
            let changed = watch.update_cached(&data);
            (changed, TestOutcome::Compared(changed))
        };
        if let Some(info) = test_info.as_deref_mut() {
            info.push(TestInfo {
                watch_path: watch.path_str.clone(),
                outcome,
            });
        }
        source.projection_timed(&watch.path, start.elapsed());

        if !changed {
            continue;
        }
        let Some(watcher) = watch.watcher() else {
            tracing::debug!(path = %watch.path_str, "skipping invalidated watch");
            continue;
        };
        if watcher.is_destroyed() {
            continue;
        }

        let (index, seen) = by_watcher.entry(watcher.id()).or_insert_with(|| {
            triggers.push(Trigger {
                priority: watcher.priority(),
                min_depth: path.len(),
                watcher: watcher.clone(),
                changes: Vec::new(),
            });
            (triggers.len() - 1, HashSet::new())
        });

        let change = Change::new(path, watch.mask.clone(), data);
        if seen.insert(change.path_str.clone()) {
            let trigger = &mut triggers[*index];
            trigger.min_depth = trigger.min_depth.min(change.depth);
            trigger.changes.push(change);
            change_count += 1;
        }
    }

    if change_count == 0 {
        return Vec::new();
    }
    tracing::debug!(count = change_count, immediate, "triggering watches");

    // creation order breaks ties so outer consumers hear before inner ones
    triggers.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.watcher.id().cmp(&b.watcher.id()))
    });
    for trigger in &mut triggers {
        trigger.changes.sort_by_key(|c| c.depth);
    }
    triggers
}

/// Calls each watcher's callback with its batch.
pub(crate) fn deliver(triggers: Vec<Trigger>) {
    for trigger in triggers {
        // an earlier callback in this pass may have torn the watcher down
        if trigger.changes.is_empty() || trigger.watcher.is_destroyed() {
            continue;
        }
        trigger.watcher.trigger(&trigger.changes);
    }
}
