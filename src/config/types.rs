use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for NetWatch
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,

    /// URLs enqueued when the crawler starts
    #[serde(rename = "initial-urls", default)]
    pub initial_urls: Vec<String>,

    /// Site rules, matched against each fetched URL
    #[serde(rename = "rule", default)]
    pub rules: Vec<RuleConfig>,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Maximum number of in-flight fetches
    pub max_parallel_requests: usize,

    /// Number of completed requests retained for rate accounting
    pub history_length: usize,

    /// Period of the recrawl cycle (milliseconds)
    pub recrawl_interval: u64,

    pub follow_redirects: bool,

    /// Reject redirect chains that leave the original origin
    pub internal_redirects_only: bool,

    /// Skip discovered links that are already stored
    pub check_database: bool,

    /// Per-request timeout (milliseconds)
    pub request_timeout: u64,

    /// Hard cap on response body size
    pub max_response_bytes: u64,

    /// Reload the queue snapshot on startup
    pub load_queue_file: bool,

    pub throttle: ThrottleConfig,
}

impl CrawlerConfig {
    pub fn recrawl_period(&self) -> Duration {
        Duration::from_millis(self.recrawl_interval)
    }

    pub fn request_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.request_timeout)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_parallel_requests: 5,
            history_length: 500,
            recrawl_interval: 300_000,
            follow_redirects: true,
            internal_redirects_only: true,
            check_database: true,
            request_timeout: 10_000,
            max_response_bytes: 5 * 1024 * 1024,
            load_queue_file: false,
            throttle: ThrottleConfig::default(),
        }
    }
}

/// Rolling-window rate limits
///
/// At most `max_requests` requests overall and `per_base_url` requests per
/// origin may start within any `time` milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ThrottleConfig {
    pub max_requests: usize,
    pub per_base_url: usize,

    /// Window length (milliseconds)
    pub time: u64,
}

impl ThrottleConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.time)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_requests: 50,
            per_base_url: 3,
            time: 20_000,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserAgentConfig {
    /// Name of the crawler, also the robots.txt product token
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the header value: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output locations
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory downloaded files are written to
    #[serde(rename = "data-dir", default = "default_data_dir")]
    pub data_dir: String,

    /// Queue snapshot written on shutdown
    #[serde(rename = "queue-file", default = "default_queue_file")]
    pub queue_file: String,

    /// JSON lines file published articles are appended to
    #[serde(rename = "publish-path", default = "default_publish_path")]
    pub publish_path: String,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_queue_file() -> String {
    "./queue.json".to_string()
}

fn default_publish_path() -> String {
    "./published.jsonl".to_string()
}

/// A site rule as written in the configuration file
///
/// Sub-tables left out fall back to the default rule as a whole; see
/// [`crate::rules::RuleMatcher::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RuleConfig {
    /// Regular expression matched against the full URL
    pub pattern: String,

    /// Mark matching pages for the recrawl cycle
    #[serde(default)]
    pub recrawl: Option<bool>,

    #[serde(rename = "link-discovery", default)]
    pub link_discovery: Option<LinkDiscoveryConfig>,

    #[serde(default)]
    pub media: Option<MediaConfig>,

    #[serde(rename = "structured-content", default)]
    pub structured_content: Option<BTreeMap<String, StructuredField>>,

    /// Explicit post-processing chain, overriding the content-type default
    #[serde(rename = "post-process", default)]
    pub post_process: Option<Vec<String>>,
}

/// Link extraction settings of a rule
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LinkDiscoveryConfig {
    pub enabled: bool,

    /// Add discovered links to the frontier
    pub crawl_discovered: bool,

    /// Keep only links on the page's own origin
    pub internal_only: bool,

    /// Only look inside `selectors` instead of every `a[href]`
    pub targeted: bool,
    pub selectors: Vec<String>,

    /// Keep only links matching this regular expression
    pub pattern: Option<String>,
}

/// Media extraction settings of a rule
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MediaConfig {
    pub enabled: bool,

    /// Put discovered media at the head of the frontier
    pub crawl: bool,

    pub targeted: bool,
    pub selectors: Vec<String>,
}

/// One named field of structured content
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StructuredField {
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
    pub selector: String,
}

/// How a structured content field is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Collapsed text content
    #[default]
    String,

    /// Outer HTML of the first match
    Html,
}
