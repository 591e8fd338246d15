use super::ActiveRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Durable queue state written on shutdown and reloaded on resume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub frontier: Vec<String>,

    #[serde(default)]
    pub active: Vec<ActiveRecord>,
}

impl QueueSnapshot {
    /// Writes the snapshot as JSON, creating parent directories as needed
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Reads a snapshot written by [`QueueSnapshot::save`]
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// URLs that were in flight, in admission order
    pub fn active_urls(&self) -> Vec<String> {
        self.active.iter().map(|a| a.url.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("queue.json");

        let snapshot = QueueSnapshot {
            frontier: vec!["https://a.com/1".to_string(), "https://a.com/2".to_string()],
            active: vec![ActiveRecord {
                url: "https://b.com/1".to_string(),
                origin: "https://b.com".to_string(),
                requested_at: Utc::now(),
            }],
        };
        snapshot.save(&path).unwrap();

        let loaded = QueueSnapshot::load(&path).unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.active_urls(), vec!["https://b.com/1"]);
    }

    #[test]
    fn test_load_missing_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, r#"{"frontier": ["https://a.com/"]}"#).unwrap();

        let loaded = QueueSnapshot::load(&path).unwrap();
        assert_eq!(loaded.frontier, vec!["https://a.com/"]);
        assert!(loaded.active.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(QueueSnapshot::load(&dir.path().join("absent.json")).is_err());
    }
}
