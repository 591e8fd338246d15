use crate::config::types::{Config, CrawlerConfig, OutputConfig, RuleConfig, UserAgentConfig};
use crate::pipeline::STEP_IDS;
use crate::ConfigError;
use regex::Regex;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_initial_urls(&config.initial_urls)?;
    for rule in &config.rules {
        validate_rule(rule)?;
    }
    Ok(())
}

/// Validates crawler and throttle limits
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_parallel_requests < 1 || config.max_parallel_requests > 100 {
        return Err(ConfigError::Validation(format!(
            "max-parallel-requests must be between 1 and 100, got {}",
            config.max_parallel_requests
        )));
    }

    let throttle = &config.throttle;
    if throttle.max_requests < config.max_parallel_requests {
        return Err(ConfigError::Validation(format!(
            "throttle max-requests ({}) must be >= max-parallel-requests ({})",
            throttle.max_requests, config.max_parallel_requests
        )));
    }

    if throttle.per_base_url < 1 {
        return Err(ConfigError::Validation(
            "throttle per-base-url must be >= 1".to_string(),
        ));
    }

    if throttle.time < 100 {
        return Err(ConfigError::Validation(format!(
            "throttle time must be >= 100ms, got {}ms",
            throttle.time
        )));
    }

    if config.history_length < 1 {
        return Err(ConfigError::Validation(
            "history-length must be >= 1".to_string(),
        ));
    }

    if config.recrawl_interval < 1000 {
        return Err(ConfigError::Validation(format!(
            "recrawl-interval must be >= 1000ms, got {}ms",
            config.recrawl_interval
        )));
    }

    if config.request_timeout == 0 || config.max_response_bytes == 0 {
        return Err(ConfigError::Validation(
            "request-timeout and max-response-bytes must be positive".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Crawler name doubles as the robots.txt product token
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("database-path", &config.database_path),
        ("data-dir", &config.data_dir),
        ("queue-file", &config.queue_file),
        ("publish-path", &config.publish_path),
    ] {
        if value.is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
        }
    }
    Ok(())
}

/// Initial URLs must parse and use http or https
fn validate_initial_urls(urls: &[String]) -> Result<(), ConfigError> {
    for raw in urls {
        let url = Url::parse(raw)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid initial URL '{}': {}", raw, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Initial URL '{}' must use http or https",
                raw
            )));
        }
    }
    Ok(())
}

/// Validates a site rule's patterns, selectors and step ids
fn validate_rule(rule: &RuleConfig) -> Result<(), ConfigError> {
    validate_regex(&rule.pattern)?;

    if let Some(discovery) = &rule.link_discovery {
        if let Some(pattern) = &discovery.pattern {
            validate_regex(pattern)?;
        }
        if discovery.enabled && discovery.targeted && discovery.selectors.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Rule '{}' enables targeted link discovery without selectors",
                rule.pattern
            )));
        }
        for selector in &discovery.selectors {
            validate_selector(selector)?;
        }
    }

    if let Some(media) = &rule.media {
        for selector in &media.selectors {
            validate_selector(selector)?;
        }
    }

    if let Some(fields) = &rule.structured_content {
        for field in fields.values() {
            validate_selector(&field.selector)?;
        }
    }

    if let Some(steps) = &rule.post_process {
        for step in steps {
            if !STEP_IDS.contains(&step.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Unknown post-process step '{}' in rule '{}'",
                    step, rule.pattern
                )));
            }
        }
    }

    Ok(())
}

fn validate_regex(pattern: &str) -> Result<(), ConfigError> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", pattern, e)))
}

fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidPattern(format!("CSS selector '{}': {:?}", selector, e)))
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact-email cannot be empty".to_string(),
        ));
    }

    let (local, domain) = match email.split_once('@') {
        Some(parts) => parts,
        None => {
            return Err(ConfigError::Validation(format!(
                "Invalid email format: '{}'",
                email
            )))
        }
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
