//! `store/file`: writes fetched bodies to the data directory

use crate::crawler::Engine;
use crate::pipeline::{PipelineContext, PostProcessor};
use crate::storage::{FileDownload, Storage};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Longest file extension kept from a URL
const MAX_EXTENSION_LEN: usize = 8;

pub struct FileStore {
    storage: Arc<dyn Storage>,
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(storage: Arc<dyn Storage>, data_dir: PathBuf) -> Self {
        Self { storage, data_dir }
    }

    /// `<hash>-<millis>.<ext>`, or without the extension if the URL has none
    fn file_name(hash: &str, millis: i64, url: &str) -> String {
        match extension(url) {
            Some(ext) => format!("{}-{}.{}", hash, millis, ext),
            None => format!("{}-{}", hash, millis),
        }
    }
}

/// File extension of the URL path, ignoring query and fragment
fn extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next()?;
    let ext = Path::new(last).extension()?.to_str()?;

    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[async_trait]
impl PostProcessor for FileStore {
    fn id(&self) -> &'static str {
        "store/file"
    }

    async fn handle(
        &self,
        mut ctx: PipelineContext,
        _engine: &Engine,
    ) -> crate::Result<PipelineContext> {
        let Some(page) = ctx.result.page.as_ref().filter(|p| !p.body.is_empty()) else {
            tracing::warn!("[PP:GFILE] No body to store for {}", ctx.result.url);
            return Ok(ctx);
        };

        let hash = hex::encode(Sha256::digest(&page.body));
        let retrieved = Utc::now();
        let name = Self::file_name(&hash, retrieved.timestamp_millis(), &ctx.result.url);
        let location = self.data_dir.join(name);

        tokio::fs::create_dir_all(&self.data_dir).await?;
        tokio::fs::write(&location, &page.body).await?;

        self.storage.record_file_download(&FileDownload {
            url: ctx.result.url.clone(),
            location: location.to_string_lossy().into_owned(),
            filetype: page.content_type.clone(),
            hash: hash.clone(),
            retrieved,
        })?;

        tracing::info!(
            "[PP:GFILE] [IID: {}] Saved {} to {}",
            ctx.result.iid,
            ctx.result.url,
            location.display()
        );

        ctx.accumulated.body_hash = Some(hash);
        Ok(ctx)
    }
}
