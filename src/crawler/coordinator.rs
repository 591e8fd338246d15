//! Crawler coordinator - the admission-control engine
//!
//! This module owns the crawl state and decides, under every configured
//! constraint at once, which URL is fetched next:
//! - A global concurrency cap on in-flight fetches
//! - Global and per-origin rolling-window request limits
//! - Exponential backoff after HTTP 429 responses
//! - Deduplication against in-flight URLs
//! - A periodic recrawl cycle and an idle-recovery watchdog
//!
//! All state lives behind one async mutex, so admissions and completions
//! never interleave. Only the network I/O of a fetch runs outside it.
//! Nothing here blocks waiting for a window to reopen: every "later" goes
//! through the deferred task [`Scheduler`], whose actions post a [`Command`]
//! back to the engine loop.

use crate::config::Config;
use crate::crawler::rate_gate::{self, Gate};
use crate::crawler::{CrawlTarget, Fetcher, ProcessedResult, ScheduledTask, Scheduler};
use crate::pipeline::Pipeline;
use crate::robots::RobotsPolicy;
use crate::state::{
    ActiveEntry, CrawlState, Deferred, EngineStatus, HistoryEntry, QueueSnapshot, RequeueReason,
};
use crate::url::origin_key;
use crate::AdmissionError;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// How often a stopped engine checks whether it should resume
pub const WATCHDOG_INTERVAL: Duration = Duration::from_millis(1000);

/// How often the history is trimmed to `history-length`
pub const HISTORY_SWEEP_INTERVAL: Duration = Duration::from_millis(1000);

/// Messages posted to the engine loop, mostly by scheduled tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A cooldown or backoff expired; put the URL back at the frontier head
    Requeue {
        url: String,
        reason: RequeueReason,
        ticket: u64,
    },

    /// The global window reopened; restart admission if stopped
    Resume,

    /// Re-check an empty frontier while running
    Recheck,
}

/// Receiving ends of the engine's channels, consumed by [`Engine::run`]
pub struct EngineChannels {
    pub completions: mpsc::UnboundedReceiver<ProcessedResult>,
    pub commands: mpsc::UnboundedReceiver<Command>,
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub status: EngineStatus,
    pub frontier: usize,
    pub active: usize,
    pub history: usize,
    pub cooldown: usize,
    pub backoff: usize,
    pub recrawl: usize,
    pub total_crawled: u64,
    pub pending_tasks: usize,
}

struct EngineInner {
    config: Arc<Config>,
    state: Mutex<CrawlState>,
    scheduler: Scheduler,
    fetcher: Arc<dyn Fetcher>,
    robots: Arc<dyn RobotsPolicy>,
    completions: mpsc::UnboundedSender<ProcessedResult>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: watch::Sender<bool>,
    admissions: AtomicU64,
    created_at: Instant,
}

/// The crawl engine
///
/// Cloning is cheap; every clone drives the same state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Creates an engine and the channels its loop consumes
    ///
    /// # Arguments
    ///
    /// * `config` - Crawler configuration
    /// * `fetcher` - Performs the network I/O for admitted URLs
    /// * `robots` - Consulted once per admission attempt
    ///
    /// # Returns
    ///
    /// The engine, stopped with an empty frontier, and the channels to pass
    /// to [`Engine::run`]
    pub fn new(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        robots: Arc<dyn RobotsPolicy>,
    ) -> (Self, EngineChannels) {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let engine = Self {
            inner: Arc::new(EngineInner {
                config: Arc::new(config),
                state: Mutex::new(CrawlState::new()),
                scheduler: Scheduler::default(),
                fetcher,
                robots,
                completions: completions_tx,
                commands: commands_tx,
                shutdown: shutdown_tx,
                admissions: AtomicU64::new(0),
                created_at: Instant::now(),
            }),
        };

        let channels = EngineChannels {
            completions: completions_rx,
            commands: commands_rx,
        };

        (engine, channels)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    // ===== Frontier =====

    /// Appends `url` unless it is already queued
    pub async fn enqueue_back(&self, url: impl Into<String>) -> bool {
        let url = url.into();
        self.inner.state.lock().await.frontier.enqueue_back(url)
    }

    /// Appends every URL not already queued
    ///
    /// # Returns
    ///
    /// Number of URLs added
    pub async fn enqueue_many_back<I, S>(&self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        self.inner.state.lock().await.frontier.enqueue_many_back(urls)
    }

    /// Prepends `urls` as one block, removing their copies elsewhere
    pub async fn enqueue_front<I, S>(&self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        self.inner.state.lock().await.frontier.enqueue_front(urls);
    }

    /// Marks `url` for re-enqueueing on the next recrawl cycle
    pub async fn mark_for_recrawl(&self, url: &str) -> bool {
        self.inner.state.lock().await.recrawl.mark(url)
    }

    // ===== Observability =====

    pub async fn status(&self) -> EngineStatus {
        self.inner.state.lock().await.status
    }

    pub async fn stats(&self) -> EngineStats {
        let state = self.inner.state.lock().await;
        EngineStats {
            status: state.status,
            frontier: state.frontier.len(),
            active: state.active.len(),
            history: state.history.len(),
            cooldown: state.cooldown_count(),
            backoff: state.backoff_count(),
            recrawl: state.recrawl.len(),
            total_crawled: state.total_crawled,
            pending_tasks: self.inner.scheduler.len(),
        }
    }

    /// Current 429 penalty for `origin`
    pub async fn backoff_delay(&self, origin: &str) -> Option<Duration> {
        self.inner.state.lock().await.backoff.delay(origin)
    }

    /// Whether `url` is in the completion history
    pub async fn was_recently_crawled(&self, url: &str) -> bool {
        self.inner.state.lock().await.history.contains_url(url)
    }

    /// Frontier contents, head first
    pub async fn frontier_urls(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        state.frontier.iter().map(str::to_string).collect()
    }

    /// URLs with a fetch in flight, in admission order
    pub async fn active_urls(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        state.active.iter().map(|e| e.url.clone()).collect()
    }

    // ===== Admission =====

    /// Starts admitting URLs
    ///
    /// Admits up to `min(free slots, fill_target or frontier length)` URLs,
    /// skipping per-item failures. Stops early when the frontier runs dry or
    /// the global window is full.
    ///
    /// # Returns
    ///
    /// Number of URLs admitted
    pub async fn start(&self, fill_target: Option<usize>) -> usize {
        let mut state = self.inner.state.lock().await;
        state.halted = false;
        self.start_locked(&mut state, fill_target).await
    }

    /// Stops admitting URLs
    ///
    /// In-flight fetches finish and scheduled re-queues still fire, but no
    /// URL is admitted until [`Engine::start`] is called again.
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        state.status = EngineStatus::Stopped;
        state.halted = true;
        tracing::info!("Admission stopped");
    }

    /// Attempts to promote the frontier head into the active set
    pub async fn admit_next(&self) -> Result<(), AdmissionError> {
        let mut state = self.inner.state.lock().await;
        self.admit_locked(&mut state).await
    }

    async fn start_locked(&self, state: &mut CrawlState, fill_target: Option<usize>) -> usize {
        state.status = EngineStatus::Running;

        let free = self
            .inner
            .config
            .crawler
            .max_parallel_requests
            .saturating_sub(state.active.len());
        let target = free.min(fill_target.unwrap_or(state.frontier.len()));

        let mut admitted = 0;
        while admitted < target {
            match self.admit_locked(state).await {
                Ok(()) => admitted += 1,
                Err(AdmissionError::FrontierEmpty) => {
                    self.post_later(Command::Recheck, self.window());
                    break;
                }
                Err(e) if !e.is_per_item() => {
                    log_admission_failure(&e);
                    break;
                }
                Err(e) => log_admission_failure(&e),
            }
        }

        if state.active.is_empty() && state.status.is_running() {
            // Nothing in flight to complete, so nothing would refill
            state.status = EngineStatus::Stopped;
        }

        tracing::debug!(
            "Admitted {} of {} (active {}, frontier {})",
            admitted,
            target,
            state.active.len(),
            state.frontier.len()
        );
        admitted
    }

    async fn admit_locked(&self, state: &mut CrawlState) -> Result<(), AdmissionError> {
        let url = state
            .frontier
            .pop_front()
            .ok_or(AdmissionError::FrontierEmpty)?;

        if state.active.contains(&url) {
            return Err(AdmissionError::DuplicateActive { url });
        }

        let now = Instant::now();
        let throttle = &self.inner.config.crawler.throttle;
        let origin = origin_key(&url).map(str::to_string);

        match rate_gate::evaluate(&state.history, &state.active, origin.as_deref(), now, throttle) {
            Gate::Open => {}
            Gate::OriginLimited { reopens_at } => {
                self.defer_requeue(state, &url, reopens_at, RequeueReason::Cooldown);
                return Err(AdmissionError::OriginRateLimited {
                    origin: origin.unwrap_or_default(),
                    cooldown: reopens_at.saturating_duration_since(now),
                    url,
                });
            }
            Gate::GlobalLimited => {
                state.frontier.enqueue_front([url.clone()]);
                if state.status.is_running() {
                    state.status = EngineStatus::Stopped;
                    self.post_later(Command::Resume, throttle.window());
                }
                return Err(AdmissionError::GlobalRateLimited {
                    url,
                    limit: throttle.max_requests,
                    window: throttle.window(),
                });
            }
        }

        let Some(origin) = origin else {
            return Err(AdmissionError::BadUrl { url });
        };

        if !self.inner.robots.is_allowed(&origin, &url).await {
            return Err(AdmissionError::RobotsDisallowed { url });
        }

        self.dispatch_fetch(state, url, origin, now);
        Ok(())
    }

    /// Spawns the fetch and records the URL as in flight
    fn dispatch_fetch(&self, state: &mut CrawlState, url: String, origin: String, now: Instant) {
        let requested_wall = Utc::now();
        let seq = self.inner.admissions.fetch_add(1, Ordering::Relaxed);
        let target = CrawlTarget {
            iid: instance_id(&url, requested_wall, seq),
            url,
            origin,
            requested_at: requested_wall,
        };

        let fetcher = self.inner.fetcher.clone();
        let fetch_target = target.clone();
        let fetch = tokio::spawn(async move { fetcher.fetch(&fetch_target).await });
        let abort = fetch.abort_handle();

        // Every admission reports exactly one result, even if the fetch
        // task panics or is aborted
        let completions = self.inner.completions.clone();
        let report_target = target.clone();
        tokio::spawn(async move {
            let result = match fetch.await {
                Ok(result) => result,
                Err(e) => ProcessedResult::failure(
                    &report_target,
                    None,
                    format!("Fetch task ended abnormally: {}", e),
                ),
            };
            if completions.send(result).is_err() {
                tracing::debug!("Engine gone, dropping result for {}", report_target.url);
            }
        });

        // A re-queue still pending for this URL would fetch it a second time
        if let Some(stale) = state.deferred.remove(&target.url) {
            stale.handle.cancel();
            tracing::debug!("Cancelled pending {} re-queue for {}", stale.reason, target.url);
        }

        tracing::debug!("[ADMIT] [IID: {}] {}", target.iid, target.url);
        state.active.push(ActiveEntry {
            url: target.url,
            origin: target.origin,
            iid: target.iid,
            requested_at: now,
            requested_wall,
            fetch: Some(abort),
        });
    }

    // ===== Completion =====

    /// Reconciles one fetch result with the crawl state
    ///
    /// Registers or clears the origin's backoff, moves the URL from the
    /// active set into the history, and backfills one slot while running.
    pub async fn handle_completion(&self, result: &ProcessedResult) {
        let mut state = self.inner.state.lock().await;

        if result.rate_limited {
            let delay = state.backoff.register(
                &result.origin,
                result.retry_after.as_deref(),
                Utc::now(),
            );
            tracing::warn!(
                "[BACKOFF] {} rate limited {}, retrying in {}s",
                result.origin,
                result.url,
                delay.as_secs()
            );
            self.defer_requeue(
                &mut state,
                &result.url,
                Instant::now() + delay,
                RequeueReason::Backoff,
            );
        } else if state.backoff.clear(&result.origin) {
            tracing::debug!("[BACKOFF] Cleared penalty for {}", result.origin);
        }

        let requested_at = match state.active.remove(&result.url) {
            Some(entry) => entry.requested_at,
            None => {
                tracing::warn!("Completed {} was not in the active set", result.url);
                Instant::now()
            }
        };

        state.history.push(HistoryEntry {
            url: result.url.clone(),
            origin: result.origin.clone(),
            requested_at,
            success: result.success,
            rate_limited: result.rate_limited,
        });
        state.total_crawled += 1;

        if state.status.is_running() {
            match self.admit_locked(&mut state).await {
                Ok(()) | Err(AdmissionError::FrontierEmpty) => {}
                Err(e) => log_admission_failure(&e),
            }
        }

        if state.active.is_empty() && state.status.is_running() {
            tracing::info!("Active set drained, engine idle");
            state.status = EngineStatus::Stopped;
        }
    }

    /// Applies a command posted by a scheduled task
    pub async fn handle_command(&self, command: Command) {
        let mut state = self.inner.state.lock().await;
        match command {
            Command::Requeue { url, reason, ticket } => {
                if state.take_deferred(&url, ticket).is_none() {
                    tracing::trace!("Ignoring superseded {} re-queue of {}", reason, url);
                    return;
                }
                tracing::debug!("[{}] Returning {} to the frontier head", reason, url);
                state.frontier.enqueue_front([url]);
            }
            Command::Resume => {
                if !state.status.is_running() && !state.halted {
                    tracing::info!("Global window reopened, resuming");
                    self.start_locked(&mut state, None).await;
                }
            }
            Command::Recheck => {
                if state.status.is_running() && !state.halted {
                    self.start_locked(&mut state, None).await;
                }
            }
        }
    }

    // ===== Periodic work =====

    /// Restarts a stopped engine that has queued work and budget
    pub async fn run_watchdog(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        if state.status.is_running() || state.halted || state.frontier.is_empty() {
            return 0;
        }

        let config = &self.inner.config.crawler;
        if state.active.len() >= config.max_parallel_requests {
            return 0;
        }

        let budget = rate_gate::remaining_budget(
            &state.history,
            &state.active,
            Instant::now(),
            &config.throttle,
        );
        if budget == 0 {
            return 0;
        }

        let fill = state.frontier.len().min(budget);
        tracing::debug!("[WATCHDOG] Idle with {} queued, restarting", state.frontier.len());
        self.start_locked(&mut state, Some(fill)).await
    }

    /// Moves every URL marked for recrawl to the frontier head
    pub async fn run_recrawl(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        let urls = state.recrawl.drain();
        let count = urls.len();
        if count > 0 {
            tracing::info!("[RECRAWL] Re-queueing {} URLs", count);
            state.frontier.enqueue_front(urls);
        }
        count
    }

    /// Trims the history to `history-length`
    pub async fn sweep_history(&self) -> usize {
        let limit = self.inner.config.crawler.history_length;
        self.inner.state.lock().await.history.trim(limit)
    }

    async fn log_stats(&self) {
        let stats = self.stats().await;
        tracing::info!(
            "[STATS] {} crawled ({:.1}/min) | {} active | {} queued | {} cooling | {} backoff | {}",
            stats.total_crawled,
            self.requests_per_minute(stats.total_crawled),
            stats.active,
            stats.frontier,
            stats.cooldown,
            stats.backoff,
            stats.status
        );
    }

    /// Average completed fetches per minute since the engine was created
    pub fn requests_per_minute(&self, total_crawled: u64) -> f64 {
        let minutes = self.inner.created_at.elapsed().as_secs_f64() / 60.0;
        if minutes > 0.0 {
            total_crawled as f64 / minutes
        } else {
            0.0
        }
    }

    // ===== Loop =====

    /// Runs the engine loop until [`Engine::shutdown`]
    ///
    /// Reconciles completions and hands each result to `pipeline` in its
    /// own task, applies scheduled commands, and drives the watchdog,
    /// history sweep, recrawl cycle and stats report.
    pub async fn run(&self, mut channels: EngineChannels, pipeline: Option<Arc<Pipeline>>) {
        let poller = self.inner.scheduler.spawn();
        let mut shutdown = self.inner.shutdown.subscribe();

        let config = &self.inner.config.crawler;
        let now = Instant::now();
        let mut watchdog = interval_at(now + WATCHDOG_INTERVAL, WATCHDOG_INTERVAL);
        let mut sweep = interval_at(now + HISTORY_SWEEP_INTERVAL, HISTORY_SWEEP_INTERVAL);
        let mut recrawl = interval_at(now + config.recrawl_period(), config.recrawl_period());
        let mut stats = interval_at(now + config.throttle.window(), config.throttle.window());
        for ticker in [&mut watchdog, &mut sweep, &mut recrawl, &mut stats] {
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        tracing::info!("Engine loop started");

        while !*shutdown.borrow() {
            tokio::select! {
                // Shutdown first, so aborted fetches stay in the active set
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(result) = channels.completions.recv() => {
                    self.handle_completion(&result).await;
                    if let Some(pipeline) = &pipeline {
                        let pipeline = pipeline.clone();
                        let engine = self.clone();
                        tokio::spawn(async move {
                            pipeline.dispatch(&engine, result).await;
                        });
                    }
                }
                Some(command) = channels.commands.recv() => {
                    self.handle_command(command).await;
                }
                _ = watchdog.tick() => {
                    self.run_watchdog().await;
                }
                _ = sweep.tick() => {
                    let trimmed = self.sweep_history().await;
                    if trimmed > 0 {
                        tracing::trace!("Trimmed {} history entries", trimmed);
                    }
                }
                _ = recrawl.tick() => {
                    self.run_recrawl().await;
                }
                _ = stats.tick() => {
                    self.log_stats().await;
                }
            }
        }

        poller.abort();
        tracing::info!("Engine loop stopped");
    }

    /// Stops admission, ends [`Engine::run`] and aborts in-flight fetches
    ///
    /// Aborted URLs stay in the active set so a snapshot taken afterwards
    /// still lists them.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        state.status = EngineStatus::Stopped;
        state.halted = true;
        state.active.abort_all();
        self.inner.scheduler.clear();
        self.inner.shutdown.send_replace(true);
        tracing::info!("Engine shut down with {} fetches in flight", state.active.len());
    }

    // ===== Snapshots =====

    /// Persists the frontier and in-flight URLs
    ///
    /// URLs waiting out a cooldown or backoff are saved at the head of the
    /// frontier list so they are not lost.
    pub async fn save_snapshot(&self, path: &Path) -> crate::Result<QueueSnapshot> {
        let snapshot = {
            let state = self.inner.state.lock().await;
            let mut frontier: Vec<String> = state
                .deferred
                .keys()
                .filter(|url| !state.frontier.contains(url) && !state.active.contains(url))
                .cloned()
                .collect();
            frontier.sort();
            frontier.extend(state.frontier.iter().map(str::to_string));

            QueueSnapshot {
                frontier,
                active: state.active.iter().map(ActiveEntry::to_record).collect(),
            }
        };

        snapshot.save(path)?;
        tracing::info!(
            "Saved {} queued and {} in-flight URLs to {}",
            snapshot.frontier.len(),
            snapshot.active.len(),
            path.display()
        );
        Ok(snapshot)
    }

    /// Loads a snapshot: in-flight URLs to the frontier head, the rest to the tail
    ///
    /// # Returns
    ///
    /// Number of URLs now queued from the snapshot
    pub async fn load_snapshot(&self, path: &Path) -> crate::Result<usize> {
        let snapshot = QueueSnapshot::load(path)?;
        let mut state = self.inner.state.lock().await;
        let before = state.frontier.len();
        state.frontier.enqueue_front(snapshot.active_urls());
        state.frontier.enqueue_many_back(snapshot.frontier);
        let loaded = state.frontier.len() - before;
        tracing::info!("Loaded {} URLs from {}", loaded, path.display());
        Ok(loaded)
    }

    // ===== Helpers =====

    fn window(&self) -> Duration {
        self.inner.config.crawler.throttle.window()
    }

    /// Schedules a re-queue of `url` at `at`, superseding any pending one
    fn defer_requeue(&self, state: &mut CrawlState, url: &str, at: Instant, reason: RequeueReason) {
        let ticket = state.next_ticket();
        let commands = self.inner.commands.clone();
        let task_url = url.to_string();
        let task = ScheduledTask::new().at(at).run(move || {
            let _ = commands.send(Command::Requeue {
                url: task_url,
                reason,
                ticket,
            });
        });

        match self.inner.scheduler.add_item(task) {
            Ok(handle) => {
                let superseded = state.defer(
                    url,
                    Deferred {
                        handle,
                        reason,
                        ticket,
                    },
                );
                if superseded {
                    tracing::debug!("[{}] Superseded earlier re-queue of {}", reason, url);
                }
            }
            Err(e) => {
                tracing::error!("Could not schedule {} re-queue of {}: {}", reason, url, e);
                state.frontier.enqueue_front([url.to_string()]);
            }
        }
    }

    /// Posts `command` to the engine loop after `delay`
    fn post_later(&self, command: Command, delay: Duration) {
        let commands = self.inner.commands.clone();
        let label = format!("{:?}", command);
        let task = ScheduledTask::new().after(delay).run(move || {
            let _ = commands.send(command);
        });
        if let Err(e) = self.inner.scheduler.add_item(task) {
            tracing::error!("Could not schedule {}: {}", label, e);
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("scheduler", &self.inner.scheduler)
            .finish_non_exhaustive()
    }
}

/// Short hex id for one admission
fn instance_id(url: &str, at: DateTime<Utc>, seq: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(at.to_rfc3339().as_bytes());
    hasher.update(seq.to_le_bytes());
    hasher.update(url.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

fn log_admission_failure(e: &AdmissionError) {
    if e.drops_url() {
        tracing::info!("[ADMIT] Dropping URL: {}", e);
    } else if e.is_recoverable() {
        tracing::debug!("[ADMIT] {}", e);
    } else {
        tracing::trace!("[ADMIT] {}", e);
    }
}
