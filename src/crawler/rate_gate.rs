//! Rolling-window admission checks
//!
//! Pure computation over the history and the in-flight set. A request counts
//! toward the window if it completed with a request time less than
//! `throttle.time` ago, or if it is still in flight.

use crate::config::ThrottleConfig;
use crate::state::{ActiveSet, History};
use tokio::time::Instant;

/// Outcome of the rate checks for one candidate URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Both windows have room
    Open,

    /// The origin's window is full until `reopens_at`
    OriginLimited { reopens_at: Instant },

    /// The global window is full
    GlobalLimited,
}

/// Counts recent and in-flight requests, optionally for one origin
pub fn recent_requests(
    history: &History,
    active: &ActiveSet,
    origin: Option<&str>,
    now: Instant,
    throttle: &ThrottleConfig,
) -> usize {
    history.count_within(origin, now, throttle.window()) + active.count(origin)
}

/// Number of admissions the global window still allows
pub fn remaining_budget(
    history: &History,
    active: &ActiveSet,
    now: Instant,
    throttle: &ThrottleConfig,
) -> usize {
    throttle
        .max_requests
        .saturating_sub(recent_requests(history, active, None, now, throttle))
}

/// Decides whether a URL on `origin` may be admitted at `now`
///
/// The per-origin window is checked before the global one. A URL without an
/// origin is only subject to the global window.
///
/// # Arguments
///
/// * `history` - Completed requests
/// * `active` - In-flight requests
/// * `origin` - Origin key of the candidate URL, if it has one
/// * `now` - Admission time
/// * `throttle` - Window length and limits
pub fn evaluate(
    history: &History,
    active: &ActiveSet,
    origin: Option<&str>,
    now: Instant,
    throttle: &ThrottleConfig,
) -> Gate {
    let window = throttle.window();

    if let Some(origin) = origin {
        let count = recent_requests(history, active, Some(origin), now, throttle);
        if count >= throttle.per_base_url {
            let oldest = [
                history.oldest_within(origin, now, window),
                active.oldest(origin),
            ]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(now);
            return Gate::OriginLimited {
                reopens_at: oldest + window,
            };
        }
    }

    if recent_requests(history, active, None, now, throttle) >= throttle.max_requests {
        return Gate::GlobalLimited;
    }

    Gate::Open
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ActiveEntry, HistoryEntry};
    use chrono::Utc;
    use std::time::Duration;

    fn throttle(max_requests: usize, per_base_url: usize, time: u64) -> ThrottleConfig {
        ThrottleConfig {
            max_requests,
            per_base_url,
            time,
        }
    }

    fn done(url: &str, origin: &str, at: Instant) -> HistoryEntry {
        HistoryEntry {
            url: url.to_string(),
            origin: origin.to_string(),
            requested_at: at,
            success: true,
            rate_limited: false,
        }
    }

    fn in_flight(url: &str, origin: &str, at: Instant) -> ActiveEntry {
        ActiveEntry {
            url: url.to_string(),
            origin: origin.to_string(),
            iid: String::new(),
            requested_at: at,
            requested_wall: Utc::now(),
            fetch: None,
        }
    }

    #[test]
    fn test_open_when_empty() {
        let now = Instant::now();
        let gate = evaluate(
            &History::new(),
            &ActiveSet::new(),
            Some("https://a.com"),
            now,
            &throttle(50, 3, 20_000),
        );
        assert_eq!(gate, Gate::Open);
    }

    #[test]
    fn test_origin_limited_reopens_after_oldest() {
        let now = Instant::now();
        let mut history = History::new();
        history.push(done("https://a.com/1", "https://a.com", now));
        let mut active = ActiveSet::new();
        active.push(in_flight(
            "https://a.com/2",
            "https://a.com",
            now + Duration::from_secs(1),
        ));

        let check = now + Duration::from_secs(2);
        let gate = evaluate(
            &history,
            &active,
            Some("https://a.com"),
            check,
            &throttle(50, 2, 60_000),
        );
        assert_eq!(
            gate,
            Gate::OriginLimited {
                reopens_at: now + Duration::from_secs(60)
            }
        );

        // Another origin is unaffected
        let other = evaluate(
            &history,
            &active,
            Some("https://b.com"),
            check,
            &throttle(50, 2, 60_000),
        );
        assert_eq!(other, Gate::Open);
    }

    #[test]
    fn test_expired_history_does_not_count() {
        let now = Instant::now();
        let mut history = History::new();
        history.push(done("https://a.com/1", "https://a.com", now));

        let later = now + Duration::from_secs(61);
        let gate = evaluate(
            &history,
            &ActiveSet::new(),
            Some("https://a.com"),
            later,
            &throttle(50, 1, 60_000),
        );
        assert_eq!(gate, Gate::Open);
    }

    #[test]
    fn test_active_counts_regardless_of_age() {
        let now = Instant::now();
        let mut active = ActiveSet::new();
        active.push(in_flight("https://a.com/1", "https://a.com", now));

        let much_later = now + Duration::from_secs(3600);
        let gate = evaluate(
            &History::new(),
            &active,
            Some("https://a.com"),
            much_later,
            &throttle(50, 1, 1_000),
        );
        assert!(matches!(gate, Gate::OriginLimited { .. }));
    }

    #[test]
    fn test_global_limit() {
        let now = Instant::now();
        let mut history = History::new();
        history.push(done("https://a.com/1", "https://a.com", now));
        history.push(done("https://b.com/1", "https://b.com", now));

        let th = throttle(2, 5, 20_000);
        let gate = evaluate(&history, &ActiveSet::new(), Some("https://c.com"), now, &th);
        assert_eq!(gate, Gate::GlobalLimited);
        assert_eq!(remaining_budget(&history, &ActiveSet::new(), now, &th), 0);
    }

    #[test]
    fn test_origin_checked_before_global() {
        let now = Instant::now();
        let mut history = History::new();
        history.push(done("https://a.com/1", "https://a.com", now));

        let gate = evaluate(
            &history,
            &ActiveSet::new(),
            Some("https://a.com"),
            now,
            &throttle(1, 1, 20_000),
        );
        assert!(matches!(gate, Gate::OriginLimited { .. }));
    }

    #[test]
    fn test_missing_origin_only_checks_global() {
        let now = Instant::now();
        let gate = evaluate(
            &History::new(),
            &ActiveSet::new(),
            None,
            now,
            &throttle(50, 1, 20_000),
        );
        assert_eq!(gate, Gate::Open);
    }
}
