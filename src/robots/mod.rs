//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching robots.txt files.
//! The engine consults a [`RobotsPolicy`] once per admission attempt.

mod cache;
mod parser;
mod policy;

pub use cache::{CachedRobots, ROBOTS_TTL_HOURS};
pub use parser::ParsedRobots;
pub use policy::CachingRobotsPolicy;

use async_trait::async_trait;
use reqwest::Client;

/// Decides whether a URL may be fetched
#[async_trait]
pub trait RobotsPolicy: Send + Sync {
    /// Checks `url` against the robots.txt of `origin`
    async fn is_allowed(&self, origin: &str, url: &str) -> bool;
}

/// Policy that allows every URL
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl RobotsPolicy for AllowAll {
    async fn is_allowed(&self, _origin: &str, _url: &str) -> bool {
        true
    }
}

/// Fetches robots.txt for an origin
///
/// # Arguments
///
/// * `client` - The crawler's HTTP client
/// * `origin` - Origin key such as `https://example.com`
///
/// # Returns
///
/// The parsed file; a non-2xx answer or a network failure yields
/// [`ParsedRobots::allow_all`]
pub async fn fetch_robots(client: &Client, origin: &str) -> ParsedRobots {
    let url = format!("{}/robots.txt", origin.trim_end_matches('/'));

    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("Failed to fetch {}: {}", url, e);
            return ParsedRobots::allow_all();
        }
    };

    if !response.status().is_success() {
        tracing::debug!("No robots.txt at {} ({})", url, response.status());
        return ParsedRobots::allow_all();
    }

    match response.text().await {
        Ok(body) => ParsedRobots::from_content(&body),
        Err(e) => {
            tracing::debug!("Failed to read {}: {}", url, e);
            ParsedRobots::allow_all()
        }
    }
}
