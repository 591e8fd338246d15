use crate::config::{LinkDiscoveryConfig, MediaConfig, RuleConfig};

/// Step chain for HTML pages, also the fallback for unknown content types
pub const HTML_STEPS: &[&str] = &["parse/html", "store/html", "publish/article"];

/// Step chain for images
pub const IMAGE_STEPS: &[&str] = &["store/file"];

/// The rule applied to pages no `[[rule]]` matches
///
/// Discovers and crawls every internal link, records images without
/// fetching them, and never recrawls.
pub fn default_rule() -> RuleConfig {
    RuleConfig {
        pattern: String::new(),
        recrawl: Some(false),
        link_discovery: Some(LinkDiscoveryConfig {
            enabled: true,
            crawl_discovered: true,
            internal_only: true,
            targeted: false,
            selectors: Vec::new(),
            pattern: None,
        }),
        media: Some(MediaConfig {
            enabled: true,
            crawl: false,
            targeted: false,
            selectors: Vec::new(),
        }),
        structured_content: None,
        post_process: None,
    }
}

/// Default step chain for a normalized media type
///
/// # Arguments
///
/// * `media_type` - Lowercased content type without parameters, if known
pub fn default_steps(media_type: Option<&str>) -> &'static [&'static str] {
    match media_type {
        Some(mt) if mt.starts_with("image/") => IMAGE_STEPS,
        _ => HTML_STEPS,
    }
}
