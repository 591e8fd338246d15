//! Crawl rules
//!
//! A rule decides what happens to a fetched page: which links are discovered
//! and crawled, which media are collected, which structured fields are
//! extracted, whether the page recurs on the recrawl cycle, and which
//! post-processing steps run. Rules come from `[[rule]]` tables and are
//! compiled once at startup.

mod defaults;
mod matcher;

pub use defaults::{default_rule, default_steps, HTML_STEPS, IMAGE_STEPS};
pub use matcher::RuleMatcher;

use crate::config::{FieldKind, LinkDiscoveryConfig, MediaConfig, RuleConfig, StructuredField};
use crate::ConfigError;
use regex::Regex;
use scraper::Selector;

/// Compiled link discovery settings
#[derive(Debug, Clone)]
pub struct LinkDiscovery {
    pub enabled: bool,
    pub crawl_discovered: bool,
    pub internal_only: bool,
    pub targeted: bool,
    pub selectors: Vec<Selector>,
    pub pattern: Option<Regex>,
}

/// Compiled media extraction settings
#[derive(Debug, Clone)]
pub struct Media {
    pub enabled: bool,
    pub crawl: bool,
    pub targeted: bool,
    pub selectors: Vec<Selector>,
}

/// A compiled structured content field
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub name: String,
    pub kind: FieldKind,
    pub selector: Selector,
}

/// A rule merged over the defaults, ready to apply to a page
#[derive(Debug, Clone)]
pub struct ResolvedRule {
    /// Pattern of the rule this was built from, `None` for the default rule
    pub pattern: Option<String>,
    pub recrawl: bool,
    pub link_discovery: LinkDiscovery,
    pub media: Media,
    pub structured_content: Vec<FieldRule>,

    /// Explicit step chain; the content-type default applies when absent
    pub post_process: Option<Vec<String>>,
}

impl ResolvedRule {
    /// Merges `rule` over `default` and compiles the result
    ///
    /// The merge is shallow: a sub-table present in `rule` replaces the
    /// default's sub-table as a whole.
    pub fn merge(rule: &RuleConfig, default: &RuleConfig) -> Result<Self, ConfigError> {
        let link_discovery = rule
            .link_discovery
            .as_ref()
            .or(default.link_discovery.as_ref())
            .cloned()
            .unwrap_or_default();
        let media = rule
            .media
            .as_ref()
            .or(default.media.as_ref())
            .cloned()
            .unwrap_or_default();
        let fields = rule
            .structured_content
            .as_ref()
            .or(default.structured_content.as_ref())
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            pattern: Some(rule.pattern.clone()),
            recrawl: rule.recrawl.or(default.recrawl).unwrap_or(false),
            link_discovery: compile_link_discovery(&link_discovery)?,
            media: compile_media(&media)?,
            structured_content: fields
                .iter()
                .map(|(name, field)| compile_field(name, field))
                .collect::<Result<_, _>>()?,
            post_process: rule
                .post_process
                .clone()
                .or_else(|| default.post_process.clone()),
        })
    }

    /// Compiles the default rule on its own
    pub fn from_default(default: &RuleConfig) -> Result<Self, ConfigError> {
        let mut resolved = Self::merge(default, default)?;
        resolved.pattern = None;
        Ok(resolved)
    }
}

fn compile_link_discovery(config: &LinkDiscoveryConfig) -> Result<LinkDiscovery, ConfigError> {
    if config.enabled && config.targeted && config.selectors.is_empty() {
        return Err(ConfigError::Validation(
            "link targeting enabled, but no selectors specified".to_string(),
        ));
    }

    let pattern = config
        .pattern
        .as_deref()
        .map(|p| {
            Regex::new(p).map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", p, e)))
        })
        .transpose()?;

    Ok(LinkDiscovery {
        enabled: config.enabled,
        crawl_discovered: config.crawl_discovered,
        internal_only: config.internal_only,
        targeted: config.targeted,
        selectors: compile_selectors(&config.selectors)?,
        pattern,
    })
}

fn compile_media(config: &MediaConfig) -> Result<Media, ConfigError> {
    Ok(Media {
        enabled: config.enabled,
        crawl: config.crawl,
        targeted: config.targeted,
        selectors: compile_selectors(&config.selectors)?,
    })
}

fn compile_field(name: &str, field: &StructuredField) -> Result<FieldRule, ConfigError> {
    Ok(FieldRule {
        name: name.to_string(),
        kind: field.kind,
        selector: compile_selector(&field.selector)?,
    })
}

fn compile_selectors(selectors: &[String]) -> Result<Vec<Selector>, ConfigError> {
    selectors.iter().map(|s| compile_selector(s)).collect()
}

/// Parses one CSS selector
pub fn compile_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector)
        .map_err(|e| ConfigError::InvalidPattern(format!("CSS selector '{}': {:?}", selector, e)))
}
