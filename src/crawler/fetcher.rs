//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - Redirect policy (off, any origin, or same origin only)
//! - Streaming bodies under a hard size cap
//! - Turning every outcome, including HTTP 429, into a `ProcessedResult`

use crate::config::Config;
use crate::url::same_origin;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;

/// Maximum redirect hops followed for one request
pub const MAX_REDIRECTS: usize = 5;

/// A URL admitted into the active set, handed to the fetcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTarget {
    pub url: String,
    pub origin: String,

    /// Instance id, unique per admission
    pub iid: String,

    pub requested_at: DateTime<Utc>,
}

/// Response data of a successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// URL after redirects
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedPage {
    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Lowercased media type without parameters, e.g. `text/html`
    pub fn media_type(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .filter(|ct| !ct.is_empty())
    }
}

/// Outcome of one admitted fetch
///
/// Exactly one is produced per admission, whether the fetch succeeded or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedResult {
    pub url: String,
    pub origin: String,
    pub iid: String,
    pub requested_at: DateTime<Utc>,
    pub success: bool,

    /// The server answered HTTP 429
    pub rate_limited: bool,

    /// Raw `Retry-After` header of a 429 response
    pub retry_after: Option<String>,

    pub status: Option<u16>,
    pub error: Option<String>,
    pub page: Option<FetchedPage>,
}

impl ProcessedResult {
    fn from_target(target: &CrawlTarget) -> Self {
        Self {
            url: target.url.clone(),
            origin: target.origin.clone(),
            iid: target.iid.clone(),
            requested_at: target.requested_at,
            success: false,
            rate_limited: false,
            retry_after: None,
            status: None,
            error: None,
            page: None,
        }
    }

    pub fn success(target: &CrawlTarget, page: FetchedPage) -> Self {
        Self {
            success: true,
            status: Some(page.status),
            page: Some(page),
            ..Self::from_target(target)
        }
    }

    pub fn failure(target: &CrawlTarget, status: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
            ..Self::from_target(target)
        }
    }

    pub fn rate_limited(target: &CrawlTarget, retry_after: Option<String>) -> Self {
        Self {
            rate_limited: true,
            retry_after,
            status: Some(StatusCode::TOO_MANY_REQUESTS.as_u16()),
            error: Some("Rate limited".to_string()),
            ..Self::from_target(target)
        }
    }
}

/// Performs the network I/O for admitted targets
///
/// Implementations must never fail out of band: every error becomes a
/// `ProcessedResult` with `success = false`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, target: &CrawlTarget) -> ProcessedResult;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The crawler configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &Config) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.header_value())
        .timeout(config.crawler.request_timeout_duration())
        .connect_timeout(Duration::from_secs(10))
        .redirect(redirect_policy(
            config.crawler.follow_redirects,
            config.crawler.internal_redirects_only,
        ))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Redirect policy for the crawler's client
///
/// With `internal_only`, a hop to any origin other than the one the chain
/// started on aborts the request.
fn redirect_policy(follow: bool, internal_only: bool) -> Policy {
    if !follow {
        return Policy::none();
    }

    Policy::custom(move |attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error(format!("more than {} redirects", MAX_REDIRECTS));
        }

        if internal_only {
            let next = attempt.url().as_str().to_string();
            let same = attempt
                .previous()
                .first()
                .map_or(true, |start| same_origin(start.as_str(), &next));
            if !same {
                return attempt.error(format!("redirect to external origin {}", next));
            }
        }

        attempt.follow()
    })
}

/// Fetcher backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_response_bytes: u64,
}

impl HttpFetcher {
    /// Creates a fetcher configured from the crawler settings
    pub fn new(config: &Config) -> crate::Result<Self> {
        Ok(Self {
            client: build_http_client(config)?,
            max_response_bytes: config.crawler.max_response_bytes,
        })
    }

    /// The underlying client, shared with robots.txt retrieval
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn get(&self, target: &CrawlTarget) -> Result<FetchedPage, FetchFailure> {
        let mut response = self
            .client
            .get(&target.url)
            .send()
            .await
            .map_err(FetchFailure::from_reqwest)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(FetchFailure::RateLimited(retry_after));
        }

        if !status.is_success() {
            return Err(FetchFailure::Status(
                status.as_u16(),
                format!("HTTP {}", status),
            ));
        }

        if let Some(declared) = response.content_length() {
            if declared > self.max_response_bytes {
                return Err(FetchFailure::Status(
                    status.as_u16(),
                    format!(
                        "Response of {} bytes exceeds the {} byte limit",
                        declared, self.max_response_bytes
                    ),
                ));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(FetchFailure::from_reqwest)? {
            if (body.len() + chunk.len()) as u64 > self.max_response_bytes {
                return Err(FetchFailure::Status(
                    status.as_u16(),
                    format!(
                        "Response exceeds the {} byte limit",
                        self.max_response_bytes
                    ),
                ));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchedPage {
            final_url,
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

/// Internal classification of a failed request
enum FetchFailure {
    RateLimited(Option<String>),
    Status(u16, String),
    Network(String),
}

impl FetchFailure {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Network("Request timeout".to_string())
        } else if e.is_connect() {
            Self::Network("Connection refused".to_string())
        } else if e.is_redirect() {
            Self::Network(format!("Redirect rejected: {}", e))
        } else {
            Self::Network(e.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, target: &CrawlTarget) -> ProcessedResult {
        tracing::info!("[REQ] [IID: {}] Making request to {}", target.iid, target.url);

        match self.get(target).await {
            Ok(page) => {
                tracing::debug!(
                    "[REQ] [IID: {}] {} -> {} ({} bytes)",
                    target.iid,
                    target.url,
                    page.status,
                    page.body.len()
                );
                ProcessedResult::success(target, page)
            }
            Err(FetchFailure::RateLimited(retry_after)) => {
                tracing::warn!(
                    "[REQ] [IID: {}] Rate limited by {} (Retry-After: {:?})",
                    target.iid,
                    target.origin,
                    retry_after
                );
                ProcessedResult::rate_limited(target, retry_after)
            }
            Err(FetchFailure::Status(status, message)) => {
                tracing::warn!("[REQ] [IID: {}] {}: {}", target.iid, target.url, message);
                ProcessedResult::failure(target, Some(status), message)
            }
            Err(FetchFailure::Network(message)) => {
                tracing::warn!("[REQ] [IID: {}] {}: {}", target.iid, target.url, message);
                ProcessedResult::failure(target, None, message)
            }
        }
    }
}
