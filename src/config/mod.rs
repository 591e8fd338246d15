//! Configuration module for NetWatch
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use netwatch::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("netwatch.toml")).unwrap();
//! println!("At most {} parallel requests", config.crawler.max_parallel_requests);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, FieldKind, LinkDiscoveryConfig, MediaConfig, OutputConfig, RuleConfig,
    StructuredField, ThrottleConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
