use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// A URL whose fetch is in flight
#[derive(Debug)]
pub struct ActiveEntry {
    pub url: String,
    pub origin: String,
    pub iid: String,

    /// Monotonic admission time, used for rolling-window accounting
    pub requested_at: Instant,

    /// Wall-clock admission time, persisted in queue snapshots
    pub requested_wall: DateTime<Utc>,

    /// Handle to the spawned fetch task
    pub fetch: Option<AbortHandle>,
}

impl ActiveEntry {
    /// Converts this entry into its persisted form
    pub fn to_record(&self) -> ActiveRecord {
        ActiveRecord {
            url: self.url.clone(),
            origin: self.origin.clone(),
            requested_at: self.requested_wall,
        }
    }
}

/// Persisted form of an [`ActiveEntry`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRecord {
    pub url: String,
    pub origin: String,
    pub requested_at: DateTime<Utc>,
}

/// The set of in-flight fetches
#[derive(Debug, Default)]
pub struct ActiveSet {
    entries: Vec<ActiveEntry>,
}

impl ActiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ActiveEntry) {
        self.entries.push(entry);
    }

    /// Removes the first entry for `url`
    pub fn remove(&mut self, url: &str) -> Option<ActiveEntry> {
        let idx = self.entries.iter().position(|e| e.url == url)?;
        Some(self.entries.remove(idx))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.iter().any(|e| e.url == url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counts in-flight fetches, optionally restricted to one origin
    ///
    /// In-flight entries always count toward the rolling window, whatever
    /// their age.
    pub fn count(&self, origin: Option<&str>) -> usize {
        match origin {
            Some(origin) => self.entries.iter().filter(|e| e.origin == origin).count(),
            None => self.entries.len(),
        }
    }

    /// Earliest admission time among in-flight fetches for `origin`
    pub fn oldest(&self, origin: &str) -> Option<Instant> {
        self.entries
            .iter()
            .filter(|e| e.origin == origin)
            .map(|e| e.requested_at)
            .min()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveEntry> {
        self.entries.iter()
    }

    /// Aborts every in-flight fetch task
    pub fn abort_all(&self) {
        for entry in &self.entries {
            if let Some(handle) = &entry.fetch {
                handle.abort();
            }
        }
    }
}
