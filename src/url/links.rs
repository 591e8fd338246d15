use super::origin_key;

/// Strips the fragment (everything from the first `#`) from a link
pub fn strip_fragment(link: &str) -> &str {
    match link.find('#') {
        Some(idx) => &link[..idx],
        None => link,
    }
}

/// Resolves a discovered page link against the origin it was found on
///
/// Only root-relative links (`/path`) are rewritten; absolute links are
/// returned as-is and anything else (`page.html`, `mailto:`) is left for the
/// caller's http filter to reject.
///
/// # Arguments
///
/// * `origin` - Origin key of the page the link was found on
/// * `link` - The raw `href` value, fragment already stripped
pub fn resolve_link(origin: &str, link: &str) -> String {
    if link.starts_with('/') && !link.starts_with("//") {
        format!("{}{}", origin, link)
    } else {
        link.to_string()
    }
}

/// Resolves a discovered media source against the origin it was found on
///
/// Protocol-relative sources (`//cdn.example.com/x.png`) become `http:` URLs;
/// root-relative sources are prefixed with the page origin.
pub fn resolve_media(origin: &str, src: &str) -> String {
    if let Some(rest) = src.strip_prefix("//") {
        format!("http://{}", rest)
    } else if src.starts_with('/') {
        format!("{}{}", origin, src)
    } else {
        src.to_string()
    }
}

/// Returns true if a resolved link should be kept under the link filter
///
/// # Arguments
///
/// * `origin` - Origin key of the page the link was found on
/// * `link` - The resolved link
/// * `internal_only` - Keep only links on `origin`
pub fn passes_scope(origin: &str, link: &str, internal_only: bool) -> bool {
    if internal_only {
        origin_key(link) == Some(origin)
    } else {
        origin_key(link).is_some()
    }
}
