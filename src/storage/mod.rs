//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Processed pages with their structured content
//! - Discovered links and media, and downloaded files
//! - robots.txt content per origin

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use chrono::{DateTime, Utc};
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(NetwatchError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> crate::Result<SqliteStorage> {
    SqliteStorage::new(path)
}

/// A page about to be stored
#[derive(Debug, Clone)]
pub struct NewPage {
    pub iid: String,
    pub url: String,
    pub title: Option<String>,

    /// Structured content serialized as JSON
    pub structured_content: String,
    pub retrieved: DateTime<Utc>,
}

/// Represents a page in the database
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub id: i64,
    pub iid: Option<String>,
    pub url: String,
    pub title: Option<String>,
    pub structured_content: Option<String>,
    pub retrieved: Option<DateTime<Utc>>,
}

/// A file written to the data directory
#[derive(Debug, Clone)]
pub struct FileDownload {
    pub url: String,
    pub location: String,
    pub filetype: Option<String>,

    /// Hex SHA-256 of the body
    pub hash: String,
    pub retrieved: DateTime<Utc>,
}

/// Represents a discovered or downloaded file in the database
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: i64,
    pub crawled_page_id: Option<i64>,
    pub url: String,
    pub location: Option<String>,
    pub filetype: Option<String>,
    pub hash: Option<String>,
    pub retrieved: Option<DateTime<Utc>>,
}

/// robots.txt content as stored
#[derive(Debug, Clone)]
pub struct StoredRobots {
    pub content: String,
    pub fetched_at: DateTime<Utc>,
}

/// Parses an RFC 3339 column value
pub(crate) fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
