//! `parse/html`: link discovery, media collection and structured content

use crate::crawler::{parse_html, Engine};
use crate::pipeline::{PipelineContext, PostProcessor};
use crate::storage::Storage;
use crate::url::{origin_key, passes_scope, resolve_link, resolve_media, strip_fragment};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Parses HTML pages and feeds discovered URLs back into the engine
pub struct HtmlParser {
    storage: Arc<dyn Storage>,
    check_database: bool,
}

impl HtmlParser {
    /// # Arguments
    ///
    /// * `storage` - Looked up for already stored links when `check_database` is set
    /// * `check_database` - Drop links that already have a `crawled_pages` row
    pub fn new(storage: Arc<dyn Storage>, check_database: bool) -> Self {
        Self {
            storage,
            check_database,
        }
    }

    /// Resolves, scopes, pattern-filters and deduplicates raw hrefs
    fn candidate_links(origin: &str, hrefs: &[String], ctx: &PipelineContext) -> Vec<String> {
        let discovery = &ctx.rule.link_discovery;
        let mut seen = HashSet::new();

        hrefs
            .iter()
            .map(|href| resolve_link(origin, strip_fragment(href)))
            .filter(|link| !link.is_empty())
            .filter(|link| passes_scope(origin, link, discovery.internal_only))
            .filter(|link| discovery.pattern.as_ref().map_or(true, |p| p.is_match(link)))
            .filter(|link| seen.insert(link.clone()))
            .collect()
    }

    /// Drops links crawled recently or already stored
    async fn unseen_links(&self, links: Vec<String>, engine: &Engine) -> Vec<String> {
        let mut fresh = Vec::with_capacity(links.len());
        for link in links {
            if engine.was_recently_crawled(&link).await {
                continue;
            }

            if self.check_database {
                match self.storage.last_crawled(&link) {
                    Ok(Some(retrieved)) => {
                        tracing::debug!(
                            "[PP:LINKS] Not adding {}, last crawled at {}",
                            link,
                            retrieved
                        );
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!("[PP:LINKS] Database lookup for {} failed: {}", link, e)
                    }
                }
            }

            fresh.push(link);
        }
        fresh
    }
}

#[async_trait]
impl PostProcessor for HtmlParser {
    fn id(&self) -> &'static str {
        "parse/html"
    }

    async fn handle(
        &self,
        mut ctx: PipelineContext,
        engine: &Engine,
    ) -> crate::Result<PipelineContext> {
        let Some(page) = ctx.result.page.as_ref() else {
            return Ok(ctx);
        };

        let parsed = parse_html(&page.text(), &ctx.rule);
        let origin = ctx.result.origin.clone();
        let url = ctx.result.url.clone();

        let candidates = Self::candidate_links(&origin, &parsed.hrefs, &ctx);
        let links = self.unseen_links(candidates, engine).await;
        tracing::info!("[PP:HTML] Found {} links on {}", links.len(), url);

        if ctx.rule.link_discovery.crawl_discovered && !links.is_empty() {
            let added = engine.enqueue_many_back(links.clone()).await;
            tracing::debug!("[PP:HTML] Queued {} of {} links from {}", added, links.len(), url);
        }

        if ctx.rule.recrawl {
            engine.mark_for_recrawl(&url).await;
        }

        let mut seen = HashSet::new();
        let images: Vec<String> = parsed
            .media
            .iter()
            .map(|src| resolve_media(&origin, src))
            .filter(|src| origin_key(src).is_some())
            .filter(|src| seen.insert(src.clone()))
            .collect();

        if ctx.rule.media.crawl && !images.is_empty() {
            tracing::info!(
                "[PP:MEDIA] Adding {} images to the start of the frontier",
                images.len()
            );
            engine.enqueue_front(images.clone()).await;
        }

        ctx.accumulated.title = parsed.title;
        ctx.accumulated.links = links;
        ctx.accumulated.images = images;
        ctx.accumulated.structured_content = parsed.fields;

        Ok(ctx)
    }
}
