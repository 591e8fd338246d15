//! Crawler module: the admission engine and what it drives
//!
//! This module contains the core crawling logic, including:
//! - The admission-control engine and its event loop
//! - Rolling-window rate checks
//! - The deferred task scheduler
//! - HTTP fetching and HTML parsing

mod coordinator;
mod fetcher;
mod parser;
pub mod rate_gate;
mod scheduler;

pub use coordinator::{
    Command, Engine, EngineChannels, EngineStats, HISTORY_SWEEP_INTERVAL, WATCHDOG_INTERVAL,
};
pub use fetcher::{
    build_http_client, CrawlTarget, FetchedPage, Fetcher, HttpFetcher, ProcessedResult,
    MAX_REDIRECTS,
};
pub use parser::{parse_html, ParsedPage, MAX_TITLE_CHARS};
pub use scheduler::{Action, ScheduledTask, Scheduler, TaskHandle, DEFAULT_POLL_INTERVAL};
