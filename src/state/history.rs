use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// A completed fetch retained for rate accounting
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub url: String,
    pub origin: String,
    pub requested_at: Instant,
    pub success: bool,
    pub rate_limited: bool,
}

/// Bounded log of completed fetches, oldest first
///
/// The bound is only enforced by [`History::trim`], which the engine runs on
/// a periodic sweep, so the log may transiently exceed its limit.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_back(entry);
    }

    /// Drops the oldest entries until at most `limit` remain
    ///
    /// # Returns
    ///
    /// Number of entries removed
    pub fn trim(&mut self, limit: usize) -> usize {
        let excess = self.entries.len().saturating_sub(limit);
        self.entries.drain(..excess);
        excess
    }

    /// Counts entries requested less than `window` before `now`
    ///
    /// # Arguments
    ///
    /// * `origin` - Restrict the count to one origin, or `None` for all
    /// * `now` - Reference time
    /// * `window` - Rolling window length
    pub fn count_within(&self, origin: Option<&str>, now: Instant, window: Duration) -> usize {
        self.within(origin, now, window).count()
    }

    /// Earliest request time inside the window for `origin`
    pub fn oldest_within(&self, origin: &str, now: Instant, window: Duration) -> Option<Instant> {
        self.within(Some(origin), now, window)
            .map(|e| e.requested_at)
            .min()
    }

    fn within<'a>(
        &'a self,
        origin: Option<&'a str>,
        now: Instant,
        window: Duration,
    ) -> impl Iterator<Item = &'a HistoryEntry> + 'a {
        self.entries.iter().filter(move |e| {
            origin.map_or(true, |o| e.origin == o)
                && now.saturating_duration_since(e.requested_at) < window
        })
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.entries.iter().any(|e| e.url == url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}
