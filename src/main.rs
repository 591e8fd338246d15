//! NetWatch main entry point
//!
//! This is the command-line interface for the NetWatch crawler.

use anyhow::Context;
use clap::Parser;
use netwatch::config::{load_config_with_hash, Config};
use netwatch::crawler::{Engine, HttpFetcher};
use netwatch::pipeline::{HandlerRegistry, JsonLinesPublisher, Pipeline};
use netwatch::robots::CachingRobotsPolicy;
use netwatch::rules::RuleMatcher;
use netwatch::storage::{open_storage, Storage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// NetWatch: a polite, rule-driven web crawler
///
/// NetWatch crawls from a set of initial URLs while respecting robots.txt,
/// global and per-origin rate limits and 429 backoff. Pages are processed by
/// the post-processing steps their crawl rules name.
#[derive(Parser, Debug)]
#[command(name = "netwatch")]
#[command(version)]
#[command(about = "A polite, rule-driven web crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Reload the queue file saved by the previous run
    #[arg(long)]
    resume: bool,

    /// Validate config and show the crawl rules without crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else {
        handle_crawl(config, cli.resume).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG` takes precedence over the flags when set.
fn setup_logging(verbose: u8, quiet: bool) {
    let default = if quiet {
        "error"
    } else {
        match verbose {
            0 => "netwatch=info,warn",
            1 => "netwatch=debug,info",
            2 => "netwatch=trace,debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the parsed configuration and rules
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    let rules = RuleMatcher::new(&config.rules)?;

    println!("=== NetWatch Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Max parallel requests: {}", config.crawler.max_parallel_requests);
    println!(
        "  Throttle: {} requests ({} per origin) every {}ms",
        config.crawler.throttle.max_requests,
        config.crawler.throttle.per_base_url,
        config.crawler.throttle.time
    );
    println!("  History length: {}", config.crawler.history_length);
    println!("  Recrawl interval: {}ms", config.crawler.recrawl_interval);
    println!("  Check database: {}", config.crawler.check_database);

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Data directory: {}", config.output.data_dir);
    println!("  Queue file: {}", config.output.queue_file);
    println!("  Published articles: {}", config.output.publish_path);

    println!("\nRules ({}):", config.rules.len());
    for rule in rules.all() {
        println!(
            "  - {} (links: {}, media: {}, recrawl: {}, fields: {})",
            rule.pattern.as_deref().unwrap_or("<default>"),
            rule.link_discovery.enabled,
            rule.media.enabled,
            rule.recrawl,
            rule.structured_content.len()
        );
        if let Some(steps) = &rule.post_process {
            println!("    steps: {}", steps.join(", "));
        }
    }

    println!("\nInitial URLs ({}):", config.initial_urls.len());
    for url in &config.initial_urls {
        println!("  * {}", url);
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the main crawl operation, running until Ctrl-C
async fn handle_crawl(config: Config, resume: bool) -> anyhow::Result<()> {
    let storage: Arc<dyn Storage> =
        Arc::new(open_storage(Path::new(&config.output.database_path))?);

    let fetcher = HttpFetcher::new(&config)?;
    let robots = CachingRobotsPolicy::new(
        fetcher.client().clone(),
        storage.clone(),
        config.user_agent.crawler_name.clone(),
    );

    let publisher = Arc::new(JsonLinesPublisher::new(&config.output.publish_path));
    let registry = HandlerRegistry::with_defaults(&config, storage, publisher);
    let pipeline = Arc::new(Pipeline::new(RuleMatcher::new(&config.rules)?, &registry)?);

    let queue_file = PathBuf::from(&config.output.queue_file);
    let reload = resume || config.crawler.load_queue_file;
    let initial_urls = config.initial_urls.clone();

    let (engine, channels) = Engine::new(config, Arc::new(fetcher), Arc::new(robots));

    if reload {
        if queue_file.exists() {
            engine.load_snapshot(&queue_file).await?;
        } else {
            tracing::warn!("No queue file at {}, starting fresh", queue_file.display());
        }
    }

    let added = engine.enqueue_many_back(initial_urls).await;
    tracing::info!("Queued {} initial URLs", added);

    let admitted = engine.start(None).await;
    tracing::info!("Crawl started with {} requests in flight", admitted);

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(channels, Some(pipeline)).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Interrupted, shutting down");

    engine.shutdown().await;
    if let Err(e) = runner.await {
        tracing::error!("Engine loop ended abnormally: {}", e);
    }

    engine.save_snapshot(&queue_file).await?;

    let stats = engine.stats().await;
    tracing::info!(
        "Crawled {} URLs ({:.1} requests/minute), {} left queued",
        stats.total_crawled,
        engine.requests_per_minute(stats.total_crawled),
        stats.frontier + stats.active
    );

    Ok(())
}
