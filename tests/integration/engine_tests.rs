//! Integration tests for the admission engine
//!
//! These tests drive the engine by hand: fetches are answered through a
//! manual fetcher, completions are read off the engine's channel, and the
//! clock is paused so cooldowns, backoffs and resumes fire exactly when
//! time is advanced.

use async_trait::async_trait;
use netwatch::config::{parse_config, Config};
use netwatch::crawler::{
    CrawlTarget, Engine, EngineChannels, FetchedPage, Fetcher, ProcessedResult, WATCHDOG_INTERVAL,
};
use netwatch::robots::{AllowAll, RobotsPolicy};
use netwatch::state::EngineStatus;
use netwatch::AdmissionError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{advance, Instant};

/// How a manual fetch is answered
enum Reply {
    Page,
    RateLimited(Option<&'static str>),
    ServerError,
}

/// Fetcher whose requests stay in flight until the test answers them
#[derive(Default)]
struct ManualFetcher {
    waiting: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
}

impl ManualFetcher {
    /// Answers the in-flight fetch of `url`
    async fn respond(&self, url: &str, reply: Reply) {
        for _ in 0..100 {
            let sender = self.waiting.lock().unwrap().remove(url);
            if let Some(sender) = sender {
                let _ = sender.send(reply);
                return;
            }
            // The fetch task may not have been polled yet
            tokio::task::yield_now().await;
        }
        panic!("No fetch in flight for {}", url);
    }
}

#[async_trait]
impl Fetcher for ManualFetcher {
    async fn fetch(&self, target: &CrawlTarget) -> ProcessedResult {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().unwrap().insert(target.url.clone(), tx);

        match rx.await {
            Ok(Reply::Page) => ProcessedResult::success(
                target,
                FetchedPage {
                    final_url: target.url.clone(),
                    status: 200,
                    content_type: Some("text/html".to_string()),
                    body: b"<html><title>ok</title></html>".to_vec(),
                },
            ),
            Ok(Reply::RateLimited(hint)) => {
                ProcessedResult::rate_limited(target, hint.map(str::to_string))
            }
            Ok(Reply::ServerError) | Err(_) => {
                ProcessedResult::failure(target, Some(500), "Internal Server Error")
            }
        }
    }
}

/// Robots policy that disallows every `/private/` path
struct DenyPrivate;

#[async_trait]
impl RobotsPolicy for DenyPrivate {
    async fn is_allowed(&self, _origin: &str, url: &str) -> bool {
        !url.contains("/private/")
    }
}

struct Harness {
    engine: Engine,
    channels: EngineChannels,
    fetcher: Arc<ManualFetcher>,
}

impl Harness {
    fn new(crawler: &str, throttle: &str) -> Self {
        Self::with_robots(crawler, throttle, Arc::new(AllowAll))
    }

    fn with_robots(crawler: &str, throttle: &str, robots: Arc<dyn RobotsPolicy>) -> Self {
        let fetcher = Arc::new(ManualFetcher::default());
        let config = test_config(crawler, throttle);
        let (engine, channels) = Engine::new(config, fetcher.clone(), robots);
        Self {
            engine,
            channels,
            fetcher,
        }
    }

    /// Answers the fetch of `url` and reconciles its result
    async fn complete(&mut self, url: &str, reply: Reply) -> ProcessedResult {
        self.fetcher.respond(url, reply).await;
        let result = self
            .channels
            .completions
            .recv()
            .await
            .expect("Engine dropped its completion sender");
        assert_eq!(result.url, url);
        self.engine.handle_completion(&result).await;
        result
    }

    /// Fires every scheduled task due now and applies the commands they post
    async fn fire_due(&mut self) -> usize {
        let fired = self.engine.scheduler().run_due(Instant::now());
        while let Ok(command) = self.channels.commands.try_recv() {
            self.engine.handle_command(command).await;
        }
        fired
    }
}

/// Creates a test configuration with extra `[crawler]` and `[crawler.throttle]` keys
fn test_config(crawler: &str, throttle: &str) -> Config {
    let content = format!(
        r#"
[crawler]
{}

[crawler.throttle]
{}

[user-agent]
crawler-name = "TestCrawler"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[output]
database-path = "./test.db"
"#,
        crawler, throttle
    );
    parse_config(&content).expect("Test config should parse")
}

#[tokio::test(start_paused = true)]
async fn test_fill_respects_parallel_cap_and_backfills() {
    let mut h = Harness::new("max-parallel-requests = 2", "");
    h.engine
        .enqueue_many_back(["https://a.com/", "https://b.com/", "https://c.com/"])
        .await;

    assert_eq!(h.engine.start(None).await, 2);
    assert_eq!(h.engine.active_urls().await, vec!["https://a.com/", "https://b.com/"]);
    assert_eq!(h.engine.frontier_urls().await, vec!["https://c.com/"]);

    // A full active set admits nothing more
    assert_eq!(h.engine.start(None).await, 0);

    h.complete("https://a.com/", Reply::Page).await;

    let stats = h.engine.stats().await;
    assert_eq!(h.engine.active_urls().await, vec!["https://b.com/", "https://c.com/"]);
    assert_eq!(stats.frontier, 0);
    assert_eq!(stats.history, 1);
    assert_eq!(stats.total_crawled, 1);
    assert_eq!(stats.status, EngineStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn test_same_origin_cools_down_for_one_window() {
    let mut h = Harness::new("", "per-base-url = 1\ntime = 60000");
    h.engine
        .enqueue_many_back(["https://x.com/1", "https://x.com/2"])
        .await;

    assert_eq!(h.engine.admit_next().await, Ok(()));
    assert_eq!(
        h.engine.admit_next().await,
        Err(AdmissionError::OriginRateLimited {
            url: "https://x.com/2".to_string(),
            origin: "https://x.com".to_string(),
            cooldown: Duration::from_secs(60),
        })
    );
    assert_eq!(h.engine.stats().await.cooldown, 1);
    assert!(h.engine.frontier_urls().await.is_empty());

    h.complete("https://x.com/1", Reply::Page).await;

    advance(Duration::from_secs(59)).await;
    h.fire_due().await;
    assert!(h.engine.frontier_urls().await.is_empty());

    advance(Duration::from_secs(1)).await;
    h.fire_due().await;
    assert_eq!(h.engine.frontier_urls().await, vec!["https://x.com/2"]);
    assert_eq!(h.engine.stats().await.cooldown, 0);

    // The first request has left the window
    assert_eq!(h.engine.admit_next().await, Ok(()));
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_seconds_sets_backoff() {
    let mut h = Harness::new("", "");
    h.engine.enqueue_back("https://x.com/feed").await;
    assert_eq!(h.engine.start(None).await, 1);

    let result = h
        .complete("https://x.com/feed", Reply::RateLimited(Some("5")))
        .await;
    assert!(result.rate_limited);
    assert_eq!(result.retry_after.as_deref(), Some("5"));

    assert_eq!(
        h.engine.backoff_delay("https://x.com").await,
        Some(Duration::from_secs(5))
    );
    assert_eq!(h.engine.stats().await.backoff, 1);
    assert_eq!(h.engine.status().await, EngineStatus::Stopped);

    advance(Duration::from_millis(4900)).await;
    h.fire_due().await;
    assert!(h.engine.frontier_urls().await.is_empty());

    advance(Duration::from_millis(100)).await;
    h.fire_due().await;
    assert_eq!(h.engine.frontier_urls().await, vec!["https://x.com/feed"]);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_then_clears() {
    let mut h = Harness::new("", "per-base-url = 10");
    let url = "https://x.com/feed";
    h.engine.enqueue_back(url).await;

    for expected in [2, 4, 8] {
        assert_eq!(h.engine.admit_next().await, Ok(()));
        h.complete(url, Reply::RateLimited(None)).await;

        let delay = Duration::from_secs(expected);
        assert_eq!(h.engine.backoff_delay("https://x.com").await, Some(delay));

        advance(delay).await;
        h.fire_due().await;
        assert_eq!(h.engine.frontier_urls().await, vec![url]);
    }

    assert_eq!(h.engine.admit_next().await, Ok(()));
    h.complete(url, Reply::Page).await;
    assert_eq!(h.engine.backoff_delay("https://x.com").await, None);
}

#[tokio::test(start_paused = true)]
async fn test_global_limit_stops_then_resumes() {
    let mut h = Harness::new(
        "max-parallel-requests = 2",
        "max-requests = 2\nper-base-url = 1\ntime = 60000",
    );
    h.engine
        .enqueue_many_back(["https://a.com/", "https://b.com/", "https://c.com/"])
        .await;
    assert_eq!(h.engine.start(None).await, 2);

    // Backfilling after A finds the global window full
    h.complete("https://a.com/", Reply::Page).await;
    assert_eq!(h.engine.status().await, EngineStatus::Stopped);
    assert_eq!(h.engine.frontier_urls().await, vec!["https://c.com/"]);
    assert_eq!(h.engine.active_urls().await, vec!["https://b.com/"]);

    h.complete("https://b.com/", Reply::ServerError).await;
    assert_eq!(h.engine.stats().await.active, 0);

    advance(Duration::from_secs(60)).await;
    h.fire_due().await;

    assert_eq!(h.engine.status().await, EngineStatus::Running);
    assert_eq!(h.engine.active_urls().await, vec!["https://c.com/"]);
}

#[tokio::test(start_paused = true)]
async fn test_global_limit_returns_url_to_front() {
    let h = Harness::new(
        "max-parallel-requests = 1",
        "max-requests = 1\ntime = 60000",
    );
    h.engine
        .enqueue_many_back(["https://a.com/", "https://b.com/"])
        .await;
    assert_eq!(h.engine.admit_next().await, Ok(()));

    let err = h.engine.admit_next().await.unwrap_err();
    assert!(matches!(err, AdmissionError::GlobalRateLimited { limit: 1, .. }));
    assert_eq!(h.engine.frontier_urls().await, vec!["https://b.com/"]);
}

#[tokio::test(start_paused = true)]
async fn test_robots_disallowed_url_is_dropped() {
    let h = Harness::with_robots("", "", Arc::new(DenyPrivate));
    h.engine
        .enqueue_many_back(["https://example.com/private/page", "https://example.com/public"])
        .await;

    assert_eq!(h.engine.start(None).await, 1);
    assert_eq!(h.engine.active_urls().await, vec!["https://example.com/public"]);
    assert!(h.engine.frontier_urls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_url_is_not_admitted_twice() {
    let h = Harness::new("", "");
    h.engine.enqueue_back("https://a.com/").await;
    assert_eq!(h.engine.admit_next().await, Ok(()));

    assert!(h.engine.enqueue_back("https://a.com/").await);
    assert_eq!(
        h.engine.admit_next().await,
        Err(AdmissionError::DuplicateActive {
            url: "https://a.com/".to_string()
        })
    );
    assert!(h.engine.frontier_urls().await.is_empty());
    assert_eq!(h.engine.active_urls().await, vec!["https://a.com/"]);
}

#[tokio::test(start_paused = true)]
async fn test_history_sweep_bounds_history() {
    let mut h = Harness::new("history-length = 2", "");
    let urls = ["https://a.com/", "https://b.com/", "https://c.com/"];
    h.engine.enqueue_many_back(urls).await;

    for url in urls {
        assert_eq!(h.engine.admit_next().await, Ok(()));
        h.complete(url, Reply::Page).await;
    }
    assert_eq!(h.engine.stats().await.history, 3);

    assert_eq!(h.engine.sweep_history().await, 1);
    assert_eq!(h.engine.stats().await.history, 2);
    assert!(!h.engine.was_recently_crawled("https://a.com/").await);
    assert!(h.engine.was_recently_crawled("https://c.com/").await);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_resumes_idle_engine() {
    let Harness {
        engine, channels, ..
    } = Harness::new("", "");
    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(channels, None).await })
    };

    // Work queued while idle, with nobody calling start
    engine.enqueue_back("https://a.com/").await;
    assert_eq!(engine.status().await, EngineStatus::Stopped);

    tokio::time::sleep(WATCHDOG_INTERVAL + Duration::from_millis(50)).await;

    assert_eq!(engine.active_urls().await, vec!["https://a.com/"]);
    assert_eq!(engine.status().await, EngineStatus::Running);

    // Shutdown aborts the fetch but keeps it listed for the snapshot
    engine.shutdown().await;
    runner.await.expect("Engine loop panicked");
    assert_eq!(engine.active_urls().await, vec!["https://a.com/"]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_keeps_engine_halted() {
    let mut h = Harness::new("max-parallel-requests = 1", "");
    h.engine
        .enqueue_many_back(["https://a.com/", "https://b.com/"])
        .await;
    assert_eq!(h.engine.start(None).await, 1);

    h.engine.stop().await;
    h.complete("https://a.com/", Reply::Page).await;

    // No backfill and no watchdog restart while halted
    assert_eq!(h.engine.frontier_urls().await, vec!["https://b.com/"]);
    assert_eq!(h.engine.run_watchdog().await, 0);

    assert_eq!(h.engine.start(None).await, 1);
    assert_eq!(h.engine.active_urls().await, vec!["https://b.com/"]);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_backoff_does_not_fire() {
    let mut h = Harness::new("", "");
    let url = "https://x.com/feed";
    h.engine.enqueue_back(url).await;

    assert_eq!(h.engine.admit_next().await, Ok(()));
    h.complete(url, Reply::RateLimited(None)).await;

    // Re-admitted by hand before the 2s backoff fires
    h.engine.enqueue_front([url]).await;
    assert_eq!(h.engine.admit_next().await, Ok(()));
    h.complete(url, Reply::RateLimited(None)).await;
    assert_eq!(h.engine.stats().await.backoff, 1);

    advance(Duration::from_secs(2)).await;
    h.fire_due().await;
    assert!(h.engine.frontier_urls().await.is_empty());

    advance(Duration::from_secs(2)).await;
    h.fire_due().await;
    assert_eq!(h.engine.frontier_urls().await, vec![url]);
    assert_eq!(h.engine.stats().await.backoff, 0);
}

#[tokio::test(start_paused = true)]
async fn test_readmission_cancels_pending_backoff() {
    let mut h = Harness::new("", "");
    let url = "https://x.com/feed";
    h.engine.enqueue_back(url).await;

    assert_eq!(h.engine.admit_next().await, Ok(()));
    h.complete(url, Reply::RateLimited(None)).await;
    assert_eq!(h.engine.stats().await.backoff, 1);

    // Picked up again before the 2s backoff elapses, and this time it succeeds
    h.engine.enqueue_front([url]).await;
    assert_eq!(h.engine.admit_next().await, Ok(()));
    assert_eq!(h.engine.stats().await.backoff, 0);
    h.complete(url, Reply::Page).await;

    advance(Duration::from_secs(3)).await;
    h.fire_due().await;
    assert!(h.engine.frontier_urls().await.is_empty());
    assert_eq!(h.engine.backoff_delay("https://x.com").await, None);
}

#[tokio::test(start_paused = true)]
async fn test_recrawl_cycle_requeues_at_front() {
    let h = Harness::new("", "");
    h.engine.enqueue_back("https://b.com/").await;
    assert!(h.engine.mark_for_recrawl("https://a.com/feed").await);
    assert!(!h.engine.mark_for_recrawl("https://a.com/feed").await);

    assert_eq!(h.engine.run_recrawl().await, 1);
    assert_eq!(
        h.engine.frontier_urls().await,
        vec!["https://a.com/feed", "https://b.com/"]
    );

    // Pages are marked again each time they are processed
    assert_eq!(h.engine.stats().await.recrawl, 0);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_round_trip() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("queue.json");

    let h = Harness::new("", "per-base-url = 1\ntime = 60000");
    h.engine
        .enqueue_many_back([
            "https://x.com/1",
            "https://x.com/2",
            "https://b.com/",
            "https://c.com/",
        ])
        .await;
    assert_eq!(h.engine.start(Some(2)).await, 2);

    let snapshot = h.engine.save_snapshot(&path).await.expect("Failed to save");
    assert_eq!(snapshot.frontier, vec!["https://x.com/2", "https://c.com/"]);
    assert_eq!(
        snapshot.active_urls(),
        vec!["https://x.com/1", "https://b.com/"]
    );

    let fresh = Harness::new("", "");
    assert_eq!(fresh.engine.load_snapshot(&path).await.expect("Failed to load"), 4);
    assert_eq!(
        fresh.engine.frontier_urls().await,
        vec!["https://x.com/1", "https://b.com/", "https://x.com/2", "https://c.com/"]
    );
}
