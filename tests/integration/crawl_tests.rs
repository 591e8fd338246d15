//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test the
//! fetcher, robots.txt handling and the full crawl cycle end-to-end.

use chrono::Utc;
use netwatch::config::{parse_config, Config};
use netwatch::crawler::{CrawlTarget, Engine, Fetcher, HttpFetcher};
use netwatch::pipeline::{HandlerRegistry, JsonLinesPublisher, Pipeline};
use netwatch::robots::{CachingRobotsPolicy, RobotsPolicy};
use netwatch::rules::RuleMatcher;
use netwatch::storage::{SqliteStorage, Storage};
use netwatch::origin_key;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration rooted in `dir`
fn create_test_config(dir: &Path, extra: &str) -> Config {
    let content = format!(
        r#"
{extra}

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[output]
database-path = "{db}"
data-dir = "{data}"
queue-file = "{queue}"
publish-path = "{publish}"
"#,
        extra = extra,
        db = dir.join("crawl.db").display(),
        data = dir.join("data").display(),
        queue = dir.join("queue.json").display(),
        publish = dir.join("published.jsonl").display(),
    );
    parse_config(&content).expect("Test config should parse")
}

fn target(url: &str) -> CrawlTarget {
    CrawlTarget {
        url: url.to_string(),
        origin: origin_key(url).expect("Test URL has an origin").to_string(),
        iid: "test".to_string(),
        requested_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_fetch_html_page() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><title>Home</title></html>", "text/html"),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let fetcher = HttpFetcher::new(&create_test_config(dir.path(), "")).expect("Client builds");

    let url = format!("{}/", mock_server.uri());
    let result = fetcher.fetch(&target(&url)).await;

    assert!(result.success);
    assert_eq!(result.status, Some(200));
    let page = result.page.expect("Successful fetch has a page");
    assert_eq!(page.media_type().as_deref(), Some("text/html"));
    assert!(page.text().contains("<title>Home</title>"));
}

#[tokio::test]
async fn test_fetch_reports_rate_limit() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let fetcher = HttpFetcher::new(&create_test_config(dir.path(), "")).expect("Client builds");

    let result = fetcher
        .fetch(&target(&format!("{}/busy", mock_server.uri())))
        .await;

    assert!(!result.success);
    assert!(result.rate_limited);
    assert_eq!(result.retry_after.as_deref(), Some("7"));
    assert_eq!(result.status, Some(429));
}

#[tokio::test]
async fn test_fetch_server_error_is_plain_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let fetcher = HttpFetcher::new(&create_test_config(dir.path(), "")).expect("Client builds");

    let result = fetcher
        .fetch(&target(&format!("{}/down", mock_server.uri())))
        .await;

    assert!(!result.success);
    assert!(!result.rate_limited);
    assert_eq!(result.status, Some(503));
    assert!(result.page.is_none());
}

#[tokio::test]
async fn test_fetch_enforces_size_cap() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(4096)))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = create_test_config(dir.path(), "[crawler]\nmax-response-bytes = 1024");
    let fetcher = HttpFetcher::new(&config).expect("Client builds");

    let result = fetcher
        .fetch(&target(&format!("{}/big", mock_server.uri())))
        .await;

    assert!(!result.success);
    assert!(result.page.is_none());
    assert!(result.error.unwrap_or_default().contains("1024"));
}

#[tokio::test]
async fn test_fetch_rejects_external_redirect() {
    let other = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("elsewhere"))
        .mount(&other)
        .await;

    let landing = format!("{}/landing", other.uri());
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/away"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", landing.as_str()))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/moved"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new-home"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new-home"))
        .respond_with(ResponseTemplate::new(200).set_body_string("home"))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let fetcher = HttpFetcher::new(&create_test_config(dir.path(), "")).expect("Client builds");

    let external = fetcher
        .fetch(&target(&format!("{}/away", mock_server.uri())))
        .await;
    assert!(!external.success);
    assert!(external.page.is_none());

    let internal = fetcher
        .fetch(&target(&format!("{}/moved", mock_server.uri())))
        .await;
    assert!(internal.success);
    let page = internal.page.expect("Redirect was followed");
    assert_eq!(page.final_url, format!("{}/new-home", mock_server.uri()));
}

#[tokio::test]
async fn test_robots_policy_fetches_once_and_persists() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private/\n"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let storage: Arc<dyn Storage> =
        Arc::new(SqliteStorage::new(&dir.path().join("crawl.db")).expect("Storage opens"));
    let config = create_test_config(dir.path(), "");
    let fetcher = HttpFetcher::new(&config).expect("Client builds");
    let policy = CachingRobotsPolicy::new(fetcher.client().clone(), storage.clone(), "TestBot");

    let origin = mock_server.uri();
    assert!(!policy.is_allowed(&origin, &format!("{}/private/page", origin)).await);
    assert!(policy.is_allowed(&origin, &format!("{}/public", origin)).await);
    assert_eq!(policy.cached_origins().await, 1);

    let stored = storage
        .get_robots(&origin)
        .expect("Storage lookup works")
        .expect("robots.txt was stored");
    assert!(stored.content.contains("Disallow: /private/"));
}

#[tokio::test]
async fn test_full_crawl_stores_and_publishes() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    // Home page links to one article and one external site
    let home = r#"<html><head><title>Home</title></head><body>
        <a href="/article/1">Story</a>
        <a href="https://elsewhere.example/">Elsewhere</a>
        </body></html>"#;
    let article = r#"<html><head><title>Story</title></head><body>
        <h1>Big News</h1><article>Something happened.</article>
        </body></html>"#;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(home, "text/html"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/article/1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(article, "text/html"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let extra = format!(
        r#"
initial-urls = ["{base}/"]

[[rule]]
pattern = '^{pattern}/article/\d+$'

[rule.structured-content.title]
selector = "h1"

[rule.structured-content.body]
selector = "article"
"#,
        base = base_url,
        pattern = regex::escape(&base_url),
    );
    let config = create_test_config(dir.path(), &extra);

    let db_path = Path::new(&config.output.database_path);
    let storage: Arc<dyn Storage> =
        Arc::new(SqliteStorage::new(db_path).expect("Storage opens"));
    let fetcher = HttpFetcher::new(&config).expect("Client builds");
    let robots = CachingRobotsPolicy::new(fetcher.client().clone(), storage.clone(), "TestBot");
    let publisher = Arc::new(JsonLinesPublisher::new(&config.output.publish_path));
    let registry = HandlerRegistry::with_defaults(&config, storage.clone(), publisher);
    let rules = RuleMatcher::new(&config.rules).expect("Rules compile");
    let pipeline = Arc::new(Pipeline::new(rules, &registry).expect("Pipeline builds"));

    let publish_path = config.output.publish_path.clone();
    let initial_urls = config.initial_urls.clone();
    let (engine, channels) = Engine::new(config, Arc::new(fetcher), Arc::new(robots));

    engine.enqueue_many_back(initial_urls).await;
    assert_eq!(engine.start(None).await, 1);

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(channels, Some(pipeline)).await })
    };

    // The article is queued after the home page finishes and picked up by
    // the idle watchdog
    let mut published = String::new();
    for _ in 0..100 {
        published = std::fs::read_to_string(&publish_path).unwrap_or_default();
        if storage.page_count().expect("Count works") >= 2 && !published.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    engine.shutdown().await;
    runner.await.expect("Engine loop panicked");

    let home_page = storage
        .get_page_by_url(&format!("{}/", base_url))
        .expect("Lookup works")
        .expect("Home page was stored");
    assert_eq!(home_page.title.as_deref(), Some("Home"));

    let links = storage.get_links(home_page.id).expect("Links load");
    assert_eq!(links, vec![format!("{}/article/1", base_url)]);

    let lines: Vec<&str> = published.lines().collect();
    assert_eq!(lines.len(), 1);
    let message: serde_json::Value = serde_json::from_str(lines[0]).expect("Valid JSON line");
    assert_eq!(message["url"], format!("{}/article/1", base_url));
    assert_eq!(message["title"][0], "Big News");
    assert_eq!(message["body"][0], "Something happened.");
    assert!(message["id"].as_str().map_or(false, |id| !id.is_empty()));

    assert_eq!(engine.stats().await.total_crawled, 2);
}
