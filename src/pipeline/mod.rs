//! Post-processing pipeline
//!
//! Every reconciled fetch result is handed to an ordered chain of steps. A
//! chain comes from the matched rule's `post-process` list, or from the
//! default chain for the response's content type. Steps are looked up by id
//! in a [`HandlerRegistry`] once, when the pipeline is built.
//!
//! Steps may call back into the engine (enqueueing links, marking pages for
//! recrawl). Dispatch happens after the engine released its state lock, so
//! those calls never deadlock.

mod file_store;
mod html_parser;
mod html_store;
mod publish;

pub use file_store::FileStore;
pub use html_parser::HtmlParser;
pub use html_store::HtmlStore;
pub use publish::{JsonLinesPublisher, PublishHandler, Publisher};

use crate::config::Config;
use crate::crawler::{Engine, ProcessedResult};
use crate::rules::{default_steps, ResolvedRule, RuleMatcher, HTML_STEPS, IMAGE_STEPS};
use crate::storage::Storage;
use crate::ConfigError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

/// Ids of every step the crate ships
pub const STEP_IDS: &[&str] = &["parse/html", "store/html", "store/file", "publish/article"];

/// Values collected by earlier steps for later ones
#[derive(Debug, Clone, Default)]
pub struct Accumulated {
    pub title: Option<String>,

    /// Discovered links that passed every filter
    pub links: Vec<String>,
    pub images: Vec<String>,
    pub structured_content: BTreeMap<String, Vec<String>>,

    /// Row id assigned by `store/html`
    pub crawled_page_id: Option<i64>,

    /// Hex SHA-256 of the body, set by `store/file`
    pub body_hash: Option<String>,
}

/// What one step receives and returns
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub result: ProcessedResult,
    pub rule: Arc<ResolvedRule>,
    pub accumulated: Accumulated,
}

impl PipelineContext {
    pub fn new(result: ProcessedResult, rule: Arc<ResolvedRule>) -> Self {
        Self {
            result,
            rule,
            accumulated: Accumulated::default(),
        }
    }
}

/// One post-processing step
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Stable id used in `post-process` lists
    fn id(&self) -> &'static str;

    /// Runs the step
    ///
    /// # Returns
    ///
    /// * `Ok(PipelineContext)` - Context handed to the next step
    /// * `Err(NetwatchError)` - Aborts the rest of the chain
    async fn handle(&self, ctx: PipelineContext, engine: &Engine) -> crate::Result<PipelineContext>;
}

/// Maps step ids to handler instances
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn PostProcessor>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every shipped step wired to `storage` and `publisher`
    pub fn with_defaults(
        config: &Config,
        storage: Arc<dyn Storage>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(HtmlParser::new(storage.clone(), config.crawler.check_database));
        registry.register(HtmlStore::new(storage.clone()));
        registry.register(FileStore::new(
            storage,
            PathBuf::from(&config.output.data_dir),
        ));
        registry.register(PublishHandler::new(publisher));
        registry
    }

    /// Adds a handler, replacing any earlier one with the same id
    pub fn register<P: PostProcessor + 'static>(&mut self, handler: P) {
        self.handlers.insert(handler.id(), Arc::new(handler));
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn PostProcessor>> {
        self.handlers.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn chain<'a, I>(&self, ids: I, owner: &str) -> Result<Vec<Arc<dyn PostProcessor>>, ConfigError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        ids.into_iter()
            .map(|id| {
                self.get(id).ok_or_else(|| {
                    ConfigError::Validation(format!(
                        "No post-process handler '{}' for {}",
                        id, owner
                    ))
                })
            })
            .collect()
    }
}

type Chain = Vec<Arc<dyn PostProcessor>>;

/// Rule-driven dispatcher of fetch results
pub struct Pipeline {
    rules: RuleMatcher,
    rule_chains: HashMap<String, Chain>,
    html_chain: Chain,
    image_chain: Chain,
}

impl Pipeline {
    /// Resolves every chain against `registry`
    ///
    /// # Returns
    ///
    /// * `Ok(Pipeline)` - All step ids are registered
    /// * `Err(ConfigError)` - A rule or default chain names an unknown step
    pub fn new(rules: RuleMatcher, registry: &HandlerRegistry) -> Result<Self, ConfigError> {
        let html_chain = registry.chain(HTML_STEPS.iter().copied(), "text/html")?;
        let image_chain = registry.chain(IMAGE_STEPS.iter().copied(), "image/*")?;

        let mut rule_chains = HashMap::new();
        for rule in rules.all() {
            if let (Some(pattern), Some(steps)) = (&rule.pattern, &rule.post_process) {
                if rule_chains.contains_key(pattern) {
                    continue;
                }
                let chain = registry.chain(
                    steps.iter().map(String::as_str),
                    &format!("rule '{}'", pattern),
                )?;
                rule_chains.insert(pattern.clone(), chain);
            }
        }

        Ok(Self {
            rules,
            rule_chains,
            html_chain,
            image_chain,
        })
    }

    pub fn rules(&self) -> &RuleMatcher {
        &self.rules
    }

    /// Step ids that would run for `result`
    pub fn steps_for(&self, result: &ProcessedResult) -> Vec<&'static str> {
        let rule = self.rules.resolve(&result.url);
        self.chain_for(&rule, result).iter().map(|s| s.id()).collect()
    }

    fn chain_for(&self, rule: &ResolvedRule, result: &ProcessedResult) -> &Chain {
        if let Some(chain) = rule.pattern.as_ref().and_then(|p| self.rule_chains.get(p)) {
            return chain;
        }

        let media_type = result.page.as_ref().and_then(|p| p.media_type());
        if default_steps(media_type.as_deref()) == IMAGE_STEPS {
            &self.image_chain
        } else {
            &self.html_chain
        }
    }

    /// Runs the chain for one result
    ///
    /// The first failing step ends the chain; its error is logged, never
    /// returned.
    pub async fn dispatch(&self, engine: &Engine, result: ProcessedResult) {
        let rule = self.rules.resolve(&result.url);
        let chain = self.chain_for(&rule, &result);
        let iid = result.iid.clone();
        let url = result.url.clone();

        let mut ctx = PipelineContext::new(result, rule.clone());
        for step in chain {
            tracing::debug!("[PP:{}] [IID: {}] [URL: {}] Starting", step.id(), iid, url);
            match step.handle(ctx, engine).await {
                Ok(next) => ctx = next,
                Err(e) => {
                    tracing::error!("[PP:{}] [IID: {}] [URL: {}] {}", step.id(), iid, url, e);
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("rules", &self.rules.len())
            .field("rule_chains", &self.rule_chains.len())
            .finish()
    }
}
