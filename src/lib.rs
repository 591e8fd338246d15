//! NetWatch: a polite, rule-driven web crawler
//!
//! This crate implements a crawler whose core is a crawl frontier and
//! admission-control engine. The engine decides which URL is fetched next
//! under a global concurrency cap, global and per-origin rolling-window rate
//! limits, and exponential backoff on HTTP 429 responses. Fetched pages are
//! handed to a rule-driven post-processing pipeline that discovers links,
//! stores pages and publishes extracted content.

pub mod config;
pub mod crawler;
pub mod pipeline;
pub mod robots;
pub mod rules;
pub mod state;
pub mod storage;
pub mod url;

use std::time::Duration;
use thiserror::Error;

/// Main error type for NetWatch operations
#[derive(Debug, Error)]
pub enum NetwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Reasons a frontier URL could not be promoted into the active set
///
/// Every admission attempt ends in exactly one of these outcomes when it
/// fails. `OriginRateLimited` and `GlobalRateLimited` are recoverable: the
/// URL (or the whole admission loop) is rescheduled. `BadUrl`,
/// `RobotsDisallowed` and `DuplicateActive` drop the frontier slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("Frontier is empty")]
    FrontierEmpty,

    #[error("{url} is already being fetched")]
    DuplicateActive { url: String },

    #[error("{origin} was requested too often recently, {url} cools down for {cooldown:?}")]
    OriginRateLimited {
        url: String,
        origin: String,
        cooldown: Duration,
    },

    #[error("Hit the maximum of {limit} requests per {window:?}, {url} returned to the frontier")]
    GlobalRateLimited {
        url: String,
        limit: usize,
        window: Duration,
    },

    #[error("{url} does not start with an http(s) origin")]
    BadUrl { url: String },

    #[error("robots.txt disallows {url}")]
    RobotsDisallowed { url: String },
}

impl AdmissionError {
    /// Returns true if the URL (or admission loop) is rescheduled rather than lost
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::OriginRateLimited { .. } | Self::GlobalRateLimited { .. }
        )
    }

    /// Returns true if the URL was permanently removed from the frontier
    pub fn drops_url(&self) -> bool {
        matches!(
            self,
            Self::DuplicateActive { .. } | Self::BadUrl { .. } | Self::RobotsDisallowed { .. }
        )
    }

    /// Returns true if the failure only concerns the current item, so a fill
    /// loop should move on to the next frontier entry
    pub fn is_per_item(&self) -> bool {
        !matches!(self, Self::FrontierEmpty | Self::GlobalRateLimited { .. })
    }
}

/// Errors raised by the deferred task scheduler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("A scheduled task needs a run time and an action, missing {0}")]
    InvalidScheduledTask(&'static str),
}

/// Result type alias for NetWatch operations
pub type Result<T> = std::result::Result<T, NetwatchError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Engine, EngineStats, Fetcher, HttpFetcher, ProcessedResult};
pub use state::EngineStatus;
pub use url::origin_key;
