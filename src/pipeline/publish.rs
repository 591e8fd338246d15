//! `publish/article`: ships extracted articles to a publisher
//!
//! A page is published when its structured content has both a `title` and a
//! `body` field. The message is the structured content plus `url` and `id`
//! (the admission's instance id).

use crate::crawler::Engine;
use crate::pipeline::{PipelineContext, PostProcessor};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Destination for published articles
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: &Value) -> crate::Result<()>;
}

/// Appends one JSON document per line to a file
pub struct JsonLinesPublisher {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesPublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl Publisher for JsonLinesPublisher {
    async fn publish(&self, message: &Value) -> crate::Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

pub struct PublishHandler {
    publisher: Arc<dyn Publisher>,
}

impl PublishHandler {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    /// Builds the message, or `None` when the page is not an article
    fn message(ctx: &PipelineContext) -> Option<Value> {
        let content = &ctx.accumulated.structured_content;
        let has = |field: &str| content.get(field).map_or(false, |v| !v.is_empty());
        if !has("title") || !has("body") || ctx.result.url.is_empty() {
            return None;
        }

        let mut message: Map<String, Value> = content
            .iter()
            .map(|(name, values)| (name.clone(), Value::from(values.clone())))
            .collect();
        message.insert("url".to_string(), Value::from(ctx.result.url.clone()));
        message.insert("id".to_string(), Value::from(ctx.result.iid.clone()));
        Some(Value::Object(message))
    }
}

#[async_trait]
impl PostProcessor for PublishHandler {
    fn id(&self) -> &'static str {
        "publish/article"
    }

    async fn handle(
        &self,
        ctx: PipelineContext,
        _engine: &Engine,
    ) -> crate::Result<PipelineContext> {
        if let Some(message) = Self::message(&ctx) {
            tracing::info!(
                "[PP:Publish] [IID: {}] [URL: {}] Publishing article",
                ctx.result.iid,
                ctx.result.url
            );
            self.publisher.publish(&message).await?;
        }
        Ok(ctx)
    }
}
