//! Batching of watch delivery across ticks.
//!
//! Every change marks its document owner pending. Immediate watchers are
//! notified right away; batched watchers are notified once per tick, on a
//! callback handed to the host's [`TickScheduler`]. Changes made while a
//! batch is being delivered surface in the next tick.

use super::tree::TestInfo;
use super::trigger::{deliver, get_triggered_watches, Trigger, WatchSource};
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

/// A unit of work scheduled for the next tick.
pub type TickTask = Box<dyn FnOnce() + Send>;

/// Callback run once the pending batch has been delivered.
pub type FlushCallback = Box<dyn FnOnce() + Send>;

/// Host primitive that runs a task at the next tick boundary.
pub trait TickScheduler: Send + Sync {
    /// Runs `task` once, later, outside the current call stack.
    fn schedule_once(&self, task: TickTask);
}

/// A [`TickScheduler`] that queues tasks until they are run explicitly.
#[derive(Default)]
pub struct ManualTicker {
    tasks: Mutex<VecDeque<TickTask>>,
}

impl ManualTicker {
    /// Creates a ticker with nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of queued tasks.
    pub fn pending_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Runs the oldest queued task. Returns false if nothing was queued.
    pub fn step(&self) -> bool {
        let task = self.tasks.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs queued tasks until none are left, including tasks queued while
    /// running. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.step() {
            ran += 1;
        }
        ran
    }
}

impl TickScheduler for ManualTicker {
    fn schedule_once(&self, task: TickTask) {
        self.tasks.lock().push_back(task);
    }
}

impl fmt::Debug for ManualTicker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualTicker")
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[derive(Default)]
struct SchedulerState {
    pending: Vec<(u64, Weak<dyn WatchSource>)>,
    tick_scheduled: bool,
    epoch: u64,
    flush_callback: Option<FlushCallback>,
}

/// Coalesces pending changes and drives the two delivery passes.
///
/// One scheduler may be shared by several stores, in which case a tick
/// delivers the changes of all of them in one ordered pass.
pub struct WatchScheduler {
    ticker: Arc<dyn TickScheduler>,
    state: Mutex<SchedulerState>,
    self_ref: Weak<WatchScheduler>,
}

impl WatchScheduler {
    /// Creates a scheduler on top of `ticker`.
    pub fn new(ticker: Arc<dyn TickScheduler>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            ticker,
            state: Mutex::new(SchedulerState::default()),
            self_ref: self_ref.clone(),
        })
    }

    /// Returns true if changes are waiting for the batched pass.
    pub fn has_pending(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    /// Returns true if a tick callback is outstanding.
    pub fn is_tick_scheduled(&self) -> bool {
        self.state.lock().tick_scheduled
    }

    pub(crate) fn add_to_pending(&self, id: u64, source: Weak<dyn WatchSource>) {
        let mut state = self.state.lock();
        if !state.pending.iter().any(|(pending_id, _)| *pending_id == id) {
            state.pending.push((id, source));
        }
    }

    /// Runs the immediate pass and makes sure a tick is scheduled.
    ///
    /// With nothing pending, completes an outstanding flush request instead.
    pub fn trigger_next_frame(&self) {
        let sources = {
            let state = self.state.lock();
            upgrade_all(&state.pending)
        };
        if sources.is_empty() {
            let callback = self.state.lock().flush_callback.take();
            if let Some(callback) = callback {
                callback();
            }
            return;
        }

        deliver(get_triggered_watches(&sources, true, None));

        let epoch = {
            let mut state = self.state.lock();
            if state.tick_scheduled {
                return;
            }
            state.tick_scheduled = true;
            state.epoch
        };
        let scheduler = self.self_ref.clone();
        self.ticker.schedule_once(Box::new(move || {
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.run_tick(epoch);
            }
        }));
    }

    /// Runs `callback` once everything pending has been delivered.
    ///
    /// Only one flush request may be outstanding at a time.
    pub fn flush<F>(&self, callback: F) -> CoreResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if state.flush_callback.is_some() {
                return Err(CoreError::FlushInProgress);
            }
            if !state.pending.is_empty() {
                state.flush_callback = Some(Box::new(callback));
                drop(state);
                self.trigger_next_frame();
                return Ok(());
            }
        }
        callback();
        Ok(())
    }

    /// Delivers everything pending right now.
    ///
    /// An outstanding tick becomes a no-op, and an outstanding flush request
    /// completes.
    pub fn flush_now(&self) {
        let (pending, callback) = {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.tick_scheduled = false;
            (std::mem::take(&mut state.pending), state.flush_callback.take())
        };
        let sources = upgrade_all(&pending);
        if !sources.is_empty() {
            deliver(get_triggered_watches(&sources, true, None));
            deliver(get_triggered_watches(&sources, false, None));
        }
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Computes one pass without delivering it.
    ///
    /// A batched pass consumes the pending changes exactly like a tick.
    pub fn triggered_watches(
        &self,
        immediate: bool,
        test_info: Option<&mut Vec<TestInfo>>,
    ) -> Vec<Trigger> {
        let pending = {
            let mut state = self.state.lock();
            if immediate {
                upgrade_all(&state.pending)
            } else {
                upgrade_all(&std::mem::take(&mut state.pending))
            }
        };
        get_triggered_watches(&pending, immediate, test_info)
    }

    fn run_tick(&self, epoch: u64) {
        let (pending, callback) = {
            let mut state = self.state.lock();
            if state.epoch != epoch || !state.tick_scheduled {
                return;
            }
            state.tick_scheduled = false;
            (std::mem::take(&mut state.pending), state.flush_callback.take())
        };
        deliver(get_triggered_watches(&upgrade_all(&pending), false, None));
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl fmt::Debug for WatchScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WatchScheduler")
            .field("pending", &state.pending.len())
            .field("tick_scheduled", &state.tick_scheduled)
            .finish()
    }
}

fn upgrade_all(pending: &[(u64, Weak<dyn WatchSource>)]) -> Vec<Arc<dyn WatchSource>> {
    pending.iter().filter_map(|(_, source)| source.upgrade()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn manual_ticker_runs_in_order() {
        let ticker = ManualTicker::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            ticker.schedule_once(Box::new(move || order.lock().push(i)));
        }
        assert_eq!(ticker.pending_count(), 3);
        assert!(ticker.step());
        assert_eq!(ticker.run_pending(), 2);
        assert!(!ticker.step());
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn flush_without_pending_runs_immediately() {
        let ticker = Arc::new(ManualTicker::new());
        let scheduler = WatchScheduler::new(ticker.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        scheduler
            .flush(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ticker.pending_count(), 0);
        assert!(!scheduler.has_pending());
        assert!(!scheduler.is_tick_scheduled());
    }
}
