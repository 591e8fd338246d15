//! Deferred task scheduler
//!
//! This module handles:
//! - A min-heap of pending tasks ordered by run time
//! - Cancellation handles so superseded tasks never fire
//! - A fixed-interval poll that runs every task whose time has come
//!
//! Actions run outside the scheduler lock, so an action may schedule
//! further tasks.

use crate::SchedulerError;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Zero-argument action fired when a task is due
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Handle used to cancel a scheduled task before it fires
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevents the task from running; a no-op if it already ran
    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }
}

/// Description of a task to schedule
///
/// Both a run time (`at` or `after`) and an action are required; the
/// scheduler rejects incomplete tasks with
/// [`SchedulerError::InvalidScheduledTask`].
#[derive(Default)]
pub struct ScheduledTask {
    pub at: Option<Instant>,
    pub after: Option<Duration>,
    pub run: Option<Action>,
}

impl ScheduledTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the task at an absolute instant
    pub fn at(mut self, at: Instant) -> Self {
        self.at = Some(at);
        self
    }

    /// Runs the task once `delay` has elapsed from the time it is added
    pub fn after(mut self, delay: Duration) -> Self {
        self.after = Some(delay);
        self
    }

    pub fn run<F>(mut self, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.run = Some(Box::new(action));
        self
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("at", &self.at)
            .field("after", &self.after)
            .field("run", &self.run.as_ref().map(|_| "<action>"))
            .finish()
    }
}

struct Pending {
    run_time: Instant,
    seq: u64,
    handle: TaskHandle,
    action: Action,
}

// Reversed so the BinaryHeap pops the earliest run time first;
// seq breaks ties in insertion order
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .run_time
            .cmp(&self.run_time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.run_time == other.run_time && self.seq == other.seq
    }
}

impl Eq for Pending {}

/// Deferred task scheduler shared by the engine and its timers
///
/// Cloning is cheap and every clone sees the same task list.
#[derive(Clone)]
pub struct Scheduler {
    pending: Arc<Mutex<BinaryHeap<Pending>>>,
    next_seq: Arc<AtomicU64>,
    poll_interval: Duration,
}

impl Scheduler {
    /// Creates a scheduler that polls every `poll_interval`
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(BinaryHeap::new())),
            next_seq: Arc::new(AtomicU64::new(0)),
            poll_interval,
        }
    }

    /// Adds a task to the pending list
    ///
    /// # Arguments
    ///
    /// * `task` - Run time and action; `at` wins over `after` if both are set
    ///
    /// # Returns
    ///
    /// * `Ok(TaskHandle)` - Handle that cancels the task
    /// * `Err(SchedulerError)` - The run time or the action is missing
    pub fn add_item(&self, task: ScheduledTask) -> Result<TaskHandle, SchedulerError> {
        let run_time = match (task.at, task.after) {
            (Some(at), _) => at,
            (None, Some(delay)) => Instant::now() + delay,
            (None, None) => return Err(SchedulerError::InvalidScheduledTask("run time")),
        };
        let action = task
            .run
            .ok_or(SchedulerError::InvalidScheduledTask("action"))?;

        let handle = TaskHandle::new();
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.lock().push(Pending {
            run_time,
            seq,
            handle: handle.clone(),
            action,
        });

        tracing::trace!(
            "Scheduled task #{} in {:?}",
            seq,
            run_time.saturating_duration_since(Instant::now())
        );
        Ok(handle)
    }

    /// Runs every task due at `now`
    ///
    /// Due tasks are removed under the lock and executed after it is
    /// released. Cancelled tasks are discarded without running.
    ///
    /// # Returns
    ///
    /// Number of actions executed
    pub fn run_due(&self, now: Instant) -> usize {
        let due = {
            let mut pending = self.lock();
            let mut due = Vec::new();
            while pending.peek().map_or(false, |p| p.run_time <= now) {
                if let Some(task) = pending.pop() {
                    due.push(task);
                }
            }
            due
        };

        let mut ran = 0;
        for task in due {
            if task.handle.is_cancelled() {
                continue;
            }
            (task.action)();
            ran += 1;
        }
        ran
    }

    /// Number of tasks not yet fired, including cancelled ones
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every pending task
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Spawns the polling loop on the current runtime
    ///
    /// The returned handle is aborted to stop polling.
    pub fn spawn(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                scheduler.run_due(Instant::now());
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BinaryHeap<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.len())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}
