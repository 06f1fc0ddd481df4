//! Watch and trigger engine.
//!
//! Consumers read slices of a document through a [`Watcher`]. Each read
//! registers a watch at its path; changes recorded by the merge engine are
//! intersected with those watches and delivered in ordered batches:
//!
//! - **Immediate** watchers (negative priority or explicit flag) are notified
//!   synchronously, from inside the change that caused it
//! - **Batched** watchers are notified once per tick by the [`WatchScheduler`]
//!
//! A watcher's callback sees a fixed batch. Changes made from inside a
//! callback are delivered in a later pass.

mod scheduler;
mod tree;
mod trigger;
mod watcher;

pub use scheduler::{FlushCallback, ManualTicker, TickScheduler, TickTask, WatchScheduler};
pub use tree::{TestInfo, TestOutcome};
pub use trigger::Trigger;
pub use watcher::{Change, TriggerCallback, Watcher};

pub(crate) use tree::{TriggeredWatch, WalkContext, WatchTree};
pub(crate) use trigger::WatchSource;
pub(crate) use watcher::Watch;
