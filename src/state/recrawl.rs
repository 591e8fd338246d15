use std::collections::BTreeSet;

/// URLs due to be re-injected at the frontier head on the next recrawl cycle
#[derive(Debug, Clone, Default)]
pub struct RecrawlRegistry {
    urls: BTreeSet<String>,
}

impl RecrawlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `url` for recrawl
    ///
    /// # Returns
    ///
    /// `true` if the URL was not already marked
    pub fn mark(&mut self, url: impl Into<String>) -> bool {
        self.urls.insert(url.into())
    }

    /// Removes and returns every marked URL
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.urls).into_iter().collect()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
