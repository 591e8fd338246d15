//! HTML parser for extracting links, media and structured content
//!
//! This module handles parsing HTML content to extract:
//! - Raw link targets (`a[href]` or a rule's targeted selectors)
//! - Media sources (`img[src]` or targeted selectors)
//! - Structured content fields, as collapsed text or outer HTML
//! - The page title
//!
//! Everything here is synchronous; the parsed document never outlives the
//! call, so callers can hold the result across `.await` points.

use crate::config::FieldKind;
use crate::rules::ResolvedRule;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Maximum length of a stored page title, in characters
pub const MAX_TITLE_CHARS: usize = 256;

/// Raw data extracted from one HTML page
///
/// Links and media sources are returned exactly as written in the
/// document; resolution and filtering happen during post-processing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPage {
    pub title: Option<String>,
    pub hrefs: Vec<String>,
    pub media: Vec<String>,
    pub fields: BTreeMap<String, Vec<String>>,
}

/// Parses HTML content and extracts what `rule` asks for
///
/// # Arguments
///
/// * `html` - The HTML content to parse
/// * `rule` - The resolved rule for the page
///
/// # Returns
///
/// The extracted data; disabled sections are left empty
pub fn parse_html(html: &str, rule: &ResolvedRule) -> ParsedPage {
    let document = Html::parse_document(html);

    let hrefs = if rule.link_discovery.enabled {
        if rule.link_discovery.targeted {
            extract_attr(&document, &rule.link_discovery.selectors, "href")
        } else {
            builtin(&document, anchor_selector(), "href")
        }
    } else {
        Vec::new()
    };

    let media = if rule.media.enabled {
        if rule.media.targeted && !rule.media.selectors.is_empty() {
            extract_attr(&document, &rule.media.selectors, "src")
        } else {
            builtin(&document, image_selector(), "src")
        }
    } else {
        Vec::new()
    };

    let fields = rule
        .structured_content
        .iter()
        .map(|field| {
            (
                field.name.clone(),
                extract_field(&document, &field.selector, field.kind),
            )
        })
        .collect();

    ParsedPage {
        title: extract_title(&document),
        hrefs,
        media,
        fields,
    }
}

/// Extracts the page title, cut to [`MAX_TITLE_CHARS`]
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| {
            element
                .text()
                .collect::<String>()
                .trim()
                .chars()
                .take(MAX_TITLE_CHARS)
                .collect::<String>()
        })
        .filter(|s| !s.is_empty())
}

/// Collects `attr` from every element matched by `selectors`, in order
fn extract_attr(document: &Html, selectors: &[Selector], attr: &str) -> Vec<String> {
    let mut values = Vec::new();
    for selector in selectors {
        for element in document.select(selector) {
            if let Some(value) = element.value().attr(attr) {
                let value = value.trim();
                if !value.is_empty() {
                    values.push(value.to_string());
                }
            }
        }
    }
    values
}

fn builtin(document: &Html, selector: Option<&Selector>, attr: &str) -> Vec<String> {
    selector
        .map(|sel| extract_attr(document, std::slice::from_ref(sel), attr))
        .unwrap_or_default()
}

/// Renders every element matched by `selector`
fn extract_field(document: &Html, selector: &Selector, kind: FieldKind) -> Vec<String> {
    document
        .select(selector)
        .map(|element| match kind {
            FieldKind::Html => element.html(),
            FieldKind::String => collapse_text(&element),
        })
        .collect()
}

/// Text content, trimmed, with line breaks, tabs and double spaces removed
fn collapse_text(element: &ElementRef<'_>) -> String {
    let text = element.text().collect::<String>();
    match whitespace_regex() {
        Some(re) => re.replace_all(text.trim(), "").into_owned(),
        None => text.trim().to_string(),
    }
}

fn whitespace_regex() -> Option<&'static Regex> {
    static WS: OnceLock<Option<Regex>> = OnceLock::new();
    WS.get_or_init(|| Regex::new(r"\n|\r|\t|\s{2}").ok()).as_ref()
}

fn anchor_selector() -> Option<&'static Selector> {
    static ANCHOR: OnceLock<Option<Selector>> = OnceLock::new();
    ANCHOR.get_or_init(|| Selector::parse("a[href]").ok()).as_ref()
}

fn image_selector() -> Option<&'static Selector> {
    static IMAGE: OnceLock<Option<Selector>> = OnceLock::new();
    IMAGE.get_or_init(|| Selector::parse("img[src]").ok()).as_ref()
}
