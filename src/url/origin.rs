use regex::Regex;
use std::sync::OnceLock;

fn origin_regex() -> Option<&'static Regex> {
    static ORIGIN: OnceLock<Option<Regex>> = OnceLock::new();
    ORIGIN
        .get_or_init(|| Regex::new(r"^https?://[^#?/]+").ok())
        .as_ref()
}

/// Extracts the origin key of a URL
///
/// The origin key is the literal `scheme://host[:port]` prefix of the URL
/// string. It is derived textually, so the engine never canonicalizes URLs:
/// `https://Example.com/a` and `https://example.com/a` are different origins.
///
/// # Arguments
///
/// * `url` - The URL string to inspect
///
/// # Returns
///
/// * `Some(&str)` - The origin prefix, borrowed from `url`
/// * `None` - If the URL does not start with `http://` or `https://`
///
/// # Examples
///
/// ```
/// use netwatch::url::origin_key;
///
/// assert_eq!(origin_key("https://example.com:8080/a?b"), Some("https://example.com:8080"));
/// assert_eq!(origin_key("ftp://example.com/"), None);
/// ```
pub fn origin_key(url: &str) -> Option<&str> {
    origin_regex()?.find(url).map(|m| m.as_str())
}

/// Returns true if both URLs share the same origin key
pub fn same_origin(a: &str, b: &str) -> bool {
    match (origin_key(a), origin_key(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
