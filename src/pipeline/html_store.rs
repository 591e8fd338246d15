//! `store/html`: persists a parsed page with its links and media

use crate::crawler::Engine;
use crate::pipeline::{PipelineContext, PostProcessor};
use crate::storage::{NewPage, Storage};
use async_trait::async_trait;
use std::sync::Arc;

pub struct HtmlStore {
    storage: Arc<dyn Storage>,
}

impl HtmlStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl PostProcessor for HtmlStore {
    fn id(&self) -> &'static str {
        "store/html"
    }

    async fn handle(
        &self,
        mut ctx: PipelineContext,
        _engine: &Engine,
    ) -> crate::Result<PipelineContext> {
        if ctx.result.page.is_none() {
            return Ok(ctx);
        }

        let page = NewPage {
            iid: ctx.result.iid.clone(),
            url: ctx.result.url.clone(),
            title: ctx.accumulated.title.clone(),
            structured_content: serde_json::to_string(&ctx.accumulated.structured_content)?,
            retrieved: ctx.result.requested_at,
        };

        let page_id = self.storage.insert_page(&page)?;
        ctx.accumulated.crawled_page_id = Some(page_id);
        tracing::info!(
            "[PP:HTMLStore] [IID: {}] [URL: {}] Inserted page {}",
            page.iid,
            page.url,
            page_id
        );

        if !ctx.accumulated.links.is_empty() {
            self.storage.insert_links(page_id, &ctx.accumulated.links)?;
        }

        if ctx.rule.media.enabled && !ctx.accumulated.images.is_empty() {
            let inserted = self.storage.insert_files(page_id, &ctx.accumulated.images)?;
            tracing::debug!("[PP:HTMLStore] [IID: {}] Recorded {} media files", page.iid, inserted);
        }

        Ok(ctx)
    }
}
