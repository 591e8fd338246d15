//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the NetWatch database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per processed page
CREATE TABLE IF NOT EXISTS crawled_pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    iid TEXT,
    url TEXT NOT NULL,
    title TEXT,
    structured_content TEXT,
    retrieved TEXT,
    saved TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_crawled_pages_url ON crawled_pages(url);

-- Media discovered on pages, completed when downloaded
CREATE TABLE IF NOT EXISTS crawled_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawled_page_id INTEGER REFERENCES crawled_pages(id),
    url TEXT,
    retrieved TEXT,
    filetype TEXT,
    location TEXT,
    hash TEXT
);

CREATE INDEX IF NOT EXISTS idx_crawled_files_url ON crawled_files(url);

-- Links discovered on pages
CREATE TABLE IF NOT EXISTS crawled_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawled_page_id INTEGER NOT NULL REFERENCES crawled_pages(id),
    url TEXT NOT NULL,
    text TEXT
);

CREATE INDEX IF NOT EXISTS idx_crawled_links_page ON crawled_links(crawled_page_id);

-- Raw robots.txt per origin; empty content allows everything
CREATE TABLE IF NOT EXISTS robots_txt (
    origin TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    fetched_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// Every statement is idempotent, so this runs on each open.
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
