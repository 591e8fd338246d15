//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::storage::{FileDownload, FileRecord, NewPage, PageRecord, StoredRobots};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Page not found: {0}")]
    PageNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Implementations are shared between concurrently running post-processing
/// steps and the robots policy, so every operation takes `&self` and the
/// backend serializes access internally.
pub trait Storage: Send + Sync {
    // ===== Pages =====

    /// Inserts a processed page
    ///
    /// # Returns
    ///
    /// The new row id
    fn insert_page(&self, page: &NewPage) -> StorageResult<i64>;

    /// Gets the most recently retrieved row for a URL
    ///
    /// Inspection helper; the crawl itself only needs [`Storage::last_crawled`].
    fn get_page_by_url(&self, url: &str) -> StorageResult<Option<PageRecord>>;

    /// When `url` was last stored, if ever
    fn last_crawled(&self, url: &str) -> StorageResult<Option<DateTime<Utc>>>;

    /// Number of stored page rows
    fn page_count(&self) -> StorageResult<u64>;

    // ===== Links and Files =====

    /// Records links discovered on a page
    ///
    /// # Returns
    ///
    /// Number of rows inserted
    fn insert_links(&self, page_id: i64, urls: &[String]) -> StorageResult<usize>;

    /// Lists the links recorded for a page (inspection helper)
    fn get_links(&self, page_id: i64) -> StorageResult<Vec<String>>;

    /// Records media discovered on a page, not yet downloaded
    fn insert_files(&self, page_id: i64, urls: &[String]) -> StorageResult<usize>;

    /// Completes the file row for a downloaded URL, inserting one if none exists
    fn record_file_download(&self, download: &FileDownload) -> StorageResult<()>;

    /// Gets the most recent file row for a URL (inspection helper)
    fn get_file_by_url(&self, url: &str) -> StorageResult<Option<FileRecord>>;

    // ===== Robots =====

    fn get_robots(&self, origin: &str) -> StorageResult<Option<StoredRobots>>;

    /// Stores or replaces robots.txt content for an origin
    fn save_robots(
        &self,
        origin: &str,
        content: &str,
        fetched_at: DateTime<Utc>,
    ) -> StorageResult<()>;
}
