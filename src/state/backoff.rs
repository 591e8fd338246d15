use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Numeric Retry-After values at or above this are Unix timestamps, not delays
const ABSOLUTE_THRESHOLD: u64 = 10_000;

/// Delay applied to the first rate-limited response without a hint
const INITIAL_BACKOFF_SECS: u64 = 2;

/// Interpretation of an HTTP `Retry-After` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAfter {
    /// Relative delay in seconds
    Seconds(u64),

    /// Absolute point in time
    At(DateTime<Utc>),
}

impl RetryAfter {
    /// Parses a raw `Retry-After` header value
    ///
    /// A decimal integer below 10000 is a delay in seconds; a larger integer
    /// is a Unix timestamp in seconds. Anything else is tried as an HTTP-date
    /// (RFC 2822) and then as RFC 3339.
    ///
    /// # Returns
    ///
    /// `None` if the value is empty or cannot be interpreted
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if raw.bytes().all(|b| b.is_ascii_digit()) {
            let value: u64 = raw.parse().ok()?;
            if value < ABSOLUTE_THRESHOLD {
                return Some(Self::Seconds(value));
            }
            let secs = i64::try_from(value).ok()?;
            return DateTime::from_timestamp(secs, 0).map(Self::At);
        }

        DateTime::parse_from_rfc2822(raw)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .ok()
            .map(|dt| Self::At(dt.with_timezone(&Utc)))
    }

    /// Converts the hint into whole seconds from `now`, clamped at zero
    pub fn delay_secs(&self, now: DateTime<Utc>) -> u64 {
        match self {
            Self::Seconds(secs) => *secs,
            Self::At(at) => {
                let millis = (*at - now).num_milliseconds();
                // round half away from zero, then clamp
                let secs = (millis as f64 / 1000.0).round();
                if secs <= 0.0 {
                    0
                } else {
                    secs as u64
                }
            }
        }
    }
}

/// Per-origin retry delays for remotely rate-limited origins
///
/// An origin is absent until it returns a rate-limited response. Without a
/// server hint the delay starts at 2s and doubles on every consecutive
/// rate-limited response; the entry is cleared on the origin's first
/// response that is not rate limited.
#[derive(Debug, Clone, Default)]
pub struct BackoffRegistry {
    delays: HashMap<String, u64>,
}

impl BackoffRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a rate-limited response and returns the delay to wait
    ///
    /// # Arguments
    ///
    /// * `origin` - Origin key of the rate-limited URL
    /// * `retry_after` - Raw `Retry-After` header, if the server sent one
    /// * `now` - Current wall-clock time, for absolute hints
    ///
    /// # Returns
    ///
    /// The delay before the URL may re-enter the frontier
    pub fn register(
        &mut self,
        origin: &str,
        retry_after: Option<&str>,
        now: DateTime<Utc>,
    ) -> Duration {
        let hint = retry_after.and_then(RetryAfter::parse);
        let secs = match hint {
            Some(hint) => hint.delay_secs(now),
            None => match self.delays.get(origin) {
                Some(&current) if current > 0 => current.saturating_mul(2),
                _ => INITIAL_BACKOFF_SECS,
            },
        };

        self.delays.insert(origin.to_string(), secs);
        Duration::from_secs(secs)
    }

    /// Clears any penalty for `origin`
    ///
    /// # Returns
    ///
    /// `true` if the origin had a penalty
    pub fn clear(&mut self, origin: &str) -> bool {
        self.delays.remove(origin).is_some()
    }

    /// Current penalty for `origin`, if any
    pub fn delay(&self, origin: &str) -> Option<Duration> {
        self.delays.get(origin).map(|&secs| Duration::from_secs(secs))
    }

    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}
