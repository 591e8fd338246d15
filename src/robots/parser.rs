use robotstxt::DefaultMatcher;

/// A robots.txt body, matched with Google's robots.txt rules
///
/// Empty content allows everything; it stands for a missing or
/// unreachable file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedRobots {
    content: String,
}

impl ParsedRobots {
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Raw body, as persisted in the `robots_txt` table
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Whether `product_token` may fetch `url`
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL; only its path and query are matched
    /// * `product_token` - Crawler name matched against `User-agent` lines
    pub fn is_allowed(&self, url: &str, product_token: &str) -> bool {
        if self.content.trim().is_empty() {
            return true;
        }

        DefaultMatcher::default().one_agent_allowed_by_robots(&self.content, product_token, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEWS_ROBOTS: &str = "\
User-agent: *
Disallow: /private/
Allow: /private/press/

User-agent: TestCrawler
Disallow: /drafts/
";

    #[test]
    fn test_missing_file_allows_everything() {
        let robots = ParsedRobots::allow_all();
        assert_eq!(robots.content(), "");
        assert!(robots.is_allowed("https://news.example.com/private/page", "TestCrawler"));
    }

    #[test]
    fn test_wildcard_group() {
        let robots = ParsedRobots::from_content(NEWS_ROBOTS);
        assert!(!robots.is_allowed("https://news.example.com/private/page", "OtherBot"));
        assert!(robots.is_allowed("https://news.example.com/private/press/release", "OtherBot"));
        assert!(robots.is_allowed("https://news.example.com/story/1", "OtherBot"));
    }

    #[test]
    fn test_named_group_replaces_wildcard() {
        let robots = ParsedRobots::from_content(NEWS_ROBOTS);
        assert!(!robots.is_allowed("https://news.example.com/drafts/1", "TestCrawler"));
        assert!(robots.is_allowed("https://news.example.com/private/page", "TestCrawler"));
    }

    #[test]
    fn test_garbage_and_blank_bodies_allow() {
        for body in ["{{ not robots }}", " \n\t"] {
            let robots = ParsedRobots::from_content(body);
            assert!(robots.is_allowed("https://a.com/anything", "TestCrawler"));
        }
    }

    #[test]
    fn test_disallow_root() {
        let robots = ParsedRobots::from_content("User-agent: *\nDisallow: /");
        assert!(!robots.is_allowed("https://a.com/", "TestCrawler"));
    }
}
