use std::collections::VecDeque;

/// Ordered backlog of URLs that are not yet being fetched
///
/// `enqueue_back` is FIFO and idempotent. `enqueue_front` is a single atomic
/// prepend that also removes stale copies of the prepended URLs further back,
/// so re-inserted retries take priority over everything already queued.
#[derive(Debug, Clone, Default)]
pub struct Frontier {
    queue: VecDeque<String>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `url` to the tail unless it is already queued
    ///
    /// # Returns
    ///
    /// `true` if the URL was added
    pub fn enqueue_back(&mut self, url: impl Into<String>) -> bool {
        let url = url.into();
        if self.contains(&url) {
            return false;
        }
        self.queue.push_back(url);
        true
    }

    /// Appends every URL not already queued, preserving input order
    ///
    /// # Returns
    ///
    /// Number of URLs added
    pub fn enqueue_many_back<I, S>(&mut self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for url in urls {
            if self.enqueue_back(url) {
                added += 1;
            }
        }
        added
    }

    /// Prepends `urls` as one block, dropping any other copy of them
    ///
    /// Duplicates inside `urls` keep their first occurrence.
    pub fn enqueue_front<I, S>(&mut self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut head: Vec<String> = Vec::new();
        for url in urls {
            let url = url.into();
            if !head.contains(&url) {
                head.push(url);
            }
        }
        if head.is_empty() {
            return;
        }

        self.queue.retain(|queued| !head.contains(queued));
        for url in head.into_iter().rev() {
            self.queue.push_front(url);
        }
    }

    /// Removes and returns the head of the frontier
    pub fn pop_front(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.queue.iter().any(|queued| queued == url)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Iterates over queued URLs from head to tail
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }
}
