use crate::robots::{fetch_robots, CachedRobots, ParsedRobots, RobotsPolicy};
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Robots policy with an in-memory cache in front of the `robots_txt` table
///
/// Lookups go memory, then storage, then network. Entries older than
/// [`crate::robots::ROBOTS_TTL_HOURS`] are fetched again.
pub struct CachingRobotsPolicy {
    client: Client,
    storage: Arc<dyn Storage>,
    product_token: String,
    cache: Mutex<HashMap<String, CachedRobots>>,
}

impl CachingRobotsPolicy {
    /// Creates a policy
    ///
    /// # Arguments
    ///
    /// * `client` - HTTP client used to fetch robots.txt
    /// * `storage` - Persistent robots.txt store
    /// * `product_token` - Name matched against `User-agent` lines
    pub fn new(
        client: Client,
        storage: Arc<dyn Storage>,
        product_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            storage,
            product_token: product_token.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Number of origins held in memory
    pub async fn cached_origins(&self) -> usize {
        self.cache.lock().await.len()
    }

    async fn robots_for(&self, origin: &str) -> CachedRobots {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.get(origin).filter(|c| c.is_fresh()) {
            return cached.clone();
        }

        match self.storage.get_robots(origin) {
            Ok(Some(stored)) => {
                let cached = CachedRobots::new(
                    ParsedRobots::from_content(&stored.content),
                    stored.fetched_at,
                );
                if cached.is_fresh() {
                    cache.insert(origin.to_string(), cached.clone());
                    return cached;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to load robots.txt for {}: {}", origin, e),
        }

        let cached = CachedRobots::new(fetch_robots(&self.client, origin).await, Utc::now());
        tracing::debug!(
            "Fetched robots.txt for {} ({} bytes)",
            origin,
            cached.robots.content().len()
        );

        if let Err(e) = self
            .storage
            .save_robots(origin, cached.robots.content(), cached.fetched_at)
        {
            tracing::warn!("Failed to store robots.txt for {}: {}", origin, e);
        }

        cache.insert(origin.to_string(), cached.clone());
        cached
    }
}

#[async_trait]
impl RobotsPolicy for CachingRobotsPolicy {
    async fn is_allowed(&self, origin: &str, url: &str) -> bool {
        self.robots_for(origin)
            .await
            .robots
            .is_allowed(url, &self.product_token)
    }
}
