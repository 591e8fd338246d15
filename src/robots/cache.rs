//! In-memory robots.txt entries with a fixed time to live

use crate::robots::ParsedRobots;
use chrono::{DateTime, Duration, Utc};

/// How long a fetched robots.txt stays valid
pub const ROBOTS_TTL_HOURS: i64 = 24;

/// A robots.txt file and the time it was retrieved
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub robots: ParsedRobots,
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    pub fn new(robots: ParsedRobots, fetched_at: DateTime<Utc>) -> Self {
        Self { robots, fetched_at }
    }

    /// First instant at which the entry must be fetched again
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.fetched_at + Duration::hours(ROBOTS_TTL_HOURS)
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }
}
