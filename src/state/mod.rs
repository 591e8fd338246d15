//! State module for the crawl frontier
//!
//! This module holds the collections the engine serializes behind a single
//! lock: the frontier, the in-flight set, the completion history, per-origin
//! backoff delays, the recrawl registry and pending deferred re-queues.
//!
//! # Components
//!
//! - `Frontier`: Ordered backlog of URLs not yet dispatched
//! - `ActiveSet`: URLs with an in-flight fetch
//! - `History`: Completed fetches, used for rolling-window rate accounting
//! - `BackoffRegistry`: Per-origin retry delays after HTTP 429 responses
//! - `RecrawlRegistry`: URLs re-enqueued on every recrawl cycle
//! - `QueueSnapshot`: Persisted frontier and in-flight URLs

mod active;
mod backoff;
mod frontier;
mod history;
mod recrawl;
mod snapshot;

pub use active::{ActiveEntry, ActiveRecord, ActiveSet};
pub use backoff::{BackoffRegistry, RetryAfter};
pub use frontier::Frontier;
pub use history::{History, HistoryEntry};
pub use recrawl::RecrawlRegistry;
pub use snapshot::QueueSnapshot;

use crate::crawler::TaskHandle;
use std::collections::HashMap;
use std::fmt;

/// Admission loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineStatus {
    #[default]
    Stopped,
    Running,
}

impl EngineStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Why a URL is waiting outside the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueReason {
    /// Per-origin rolling window was full at admission time
    Cooldown,

    /// The origin answered with HTTP 429
    Backoff,
}

impl fmt::Display for RequeueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cooldown => write!(f, "cooldown"),
            Self::Backoff => write!(f, "backoff"),
        }
    }
}

/// A pending deferred re-queue for one URL
#[derive(Debug)]
pub struct Deferred {
    pub handle: TaskHandle,
    pub reason: RequeueReason,

    /// Identifies the scheduled task; a fired task whose ticket no longer
    /// matches was superseded and is ignored
    pub ticket: u64,
}

/// Everything the engine mutates under its single lock
#[derive(Debug, Default)]
pub struct CrawlState {
    pub status: EngineStatus,

    /// Set by an explicit stop; the idle watchdog leaves a halted engine alone
    pub halted: bool,

    pub frontier: Frontier,
    pub active: ActiveSet,
    pub history: History,
    pub backoff: BackoffRegistry,
    pub recrawl: RecrawlRegistry,

    /// At most one pending re-queue per URL; a newer one replaces the older
    pub deferred: HashMap<String, Deferred>,

    /// Monotonic count of reconciled fetches
    pub total_crawled: u64,

    next_ticket: u64,
}

impl CrawlState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a ticket for a deferred re-queue
    pub fn next_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    /// Registers a deferred re-queue for `url`, cancelling any earlier one
    ///
    /// # Returns
    ///
    /// `true` if an earlier pending re-queue was superseded
    pub fn defer(&mut self, url: &str, deferred: Deferred) -> bool {
        match self.deferred.insert(url.to_string(), deferred) {
            Some(previous) => {
                previous.handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Removes the pending re-queue for `url` if `ticket` is still current
    pub fn take_deferred(&mut self, url: &str, ticket: u64) -> Option<Deferred> {
        match self.deferred.get(url) {
            Some(d) if d.ticket == ticket => self.deferred.remove(url),
            _ => None,
        }
    }

    /// Number of URLs waiting out a per-origin cooldown
    pub fn cooldown_count(&self) -> usize {
        self.deferred
            .values()
            .filter(|d| d.reason == RequeueReason::Cooldown)
            .count()
    }

    /// Number of URLs waiting out a 429 backoff
    pub fn backoff_count(&self) -> usize {
        self.deferred
            .values()
            .filter(|d| d.reason == RequeueReason::Backoff)
            .count()
    }
}
