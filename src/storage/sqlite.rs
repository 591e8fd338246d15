//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    parse_timestamp, FileDownload, FileRecord, NewPage, PageRecord, StoredRobots,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite storage backend
///
/// The connection sits behind a mutex so one storage handle can be shared
/// by every post-processing step.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(NetwatchError)` - Failed to open database
    pub fn new(path: &Path) -> crate::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

impl Storage for SqliteStorage {
    // ===== Pages =====

    fn insert_page(&self, page: &NewPage) -> StorageResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO crawled_pages (iid, url, title, structured_content, retrieved)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                page.iid,
                page.url,
                page.title,
                page.structured_content,
                page.retrieved.to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_page_by_url(&self, url: &str) -> StorageResult<Option<PageRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, iid, url, title, structured_content, retrieved
             FROM crawled_pages WHERE url = ?1 ORDER BY id DESC LIMIT 1",
        )?;

        let page = stmt
            .query_row(params![url], |row| {
                Ok(PageRecord {
                    id: row.get(0)?,
                    iid: row.get(1)?,
                    url: row.get(2)?,
                    title: row.get(3)?,
                    structured_content: row.get(4)?,
                    retrieved: parse_timestamp(row.get(5)?),
                })
            })
            .optional()?;

        Ok(page)
    }

    fn last_crawled(&self, url: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let retrieved: Option<Option<String>> = conn
            .query_row(
                "SELECT retrieved FROM crawled_pages WHERE url = ?1 ORDER BY id DESC LIMIT 1",
                params![url],
                |row| row.get(0),
            )
            .optional()?;

        match retrieved {
            // A row with an unreadable timestamp still counts as crawled
            Some(value) => Ok(Some(
                parse_timestamp(value).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            )),
            None => Ok(None),
        }
    }

    fn page_count(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM crawled_pages", [], |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }

    // ===== Links and Files =====

    fn insert_links(&self, page_id: i64, urls: &[String]) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO crawled_links (crawled_page_id, url) VALUES (?1, ?2)")?;
            for url in urls {
                stmt.execute(params![page_id, url])?;
            }
        }
        tx.commit()?;
        Ok(urls.len())
    }

    fn get_links(&self, page_id: i64) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT url FROM crawled_links WHERE crawled_page_id = ?1 ORDER BY id")?;
        let links = stmt
            .query_map(params![page_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(links)
    }

    fn insert_files(&self, page_id: i64, urls: &[String]) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO crawled_files (crawled_page_id, url) VALUES (?1, ?2)")?;
            for url in urls {
                stmt.execute(params![page_id, url])?;
            }
        }
        tx.commit()?;
        Ok(urls.len())
    }

    fn record_file_download(&self, download: &FileDownload) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE crawled_files
             SET location = ?1, filetype = ?2, retrieved = ?3, hash = ?4
             WHERE url = ?5",
            params![
                download.location,
                download.filetype,
                download.retrieved.to_rfc3339(),
                download.hash,
                download.url
            ],
        )?;

        if updated == 0 {
            conn.execute(
                "INSERT INTO crawled_files (url, location, filetype, retrieved, hash)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    download.url,
                    download.location,
                    download.filetype,
                    download.retrieved.to_rfc3339(),
                    download.hash
                ],
            )?;
        }

        Ok(())
    }

    fn get_file_by_url(&self, url: &str) -> StorageResult<Option<FileRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, crawled_page_id, url, location, filetype, hash, retrieved
             FROM crawled_files WHERE url = ?1 ORDER BY id DESC LIMIT 1",
        )?;

        let file = stmt
            .query_row(params![url], |row| {
                Ok(FileRecord {
                    id: row.get(0)?,
                    crawled_page_id: row.get(1)?,
                    url: row.get(2)?,
                    location: row.get(3)?,
                    filetype: row.get(4)?,
                    hash: row.get(5)?,
                    retrieved: parse_timestamp(row.get(6)?),
                })
            })
            .optional()?;

        Ok(file)
    }

    // ===== Robots =====

    fn get_robots(&self, origin: &str) -> StorageResult<Option<StoredRobots>> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT content, fetched_at FROM robots_txt WHERE origin = ?1",
                params![origin],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(content, fetched_at)| {
            parse_timestamp(Some(fetched_at.clone()))
                .map(|fetched_at| StoredRobots {
                    content,
                    fetched_at,
                })
                .ok_or_else(|| {
                    StorageError::Serialization(format!(
                        "Bad robots.txt timestamp for {}: {}",
                        origin, fetched_at
                    ))
                })
        })
        .transpose()
    }

    fn save_robots(
        &self,
        origin: &str,
        content: &str,
        fetched_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO robots_txt (origin, content, fetched_at) VALUES (?1, ?2, ?3)",
            params![origin, content, fetched_at.to_rfc3339()],
        )?;
        Ok(())
    }
}
