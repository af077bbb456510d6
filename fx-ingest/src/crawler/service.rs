//! Incremental crawler.
//!
//! Each round walks the configured instruments in order. For one instrument the
//! crawler resolves its checkpoint, fetches the fixed window that starts there,
//! stores what came back and moves the checkpoint to the end of the window.
//!
//! | Fetch result                      | Rows stored | Checkpoint        |
//! |-----------------------------------|-------------|-------------------|
//! | rows                              | yes         | `window_end`      |
//! | empty for every attempt           | no          | `window_end`      |
//! | transport, parse or storage error | maybe       | unchanged         |
//! | window not yet complete           | no          | unchanged         |
//! | task stopped mid-window           | maybe       | unchanged         |
//!
//! Checkpoints only ever move forward: the store refuses a write that is not
//! later than the value it holds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::retry::RetryConfig;
use crate::domain::{Candle, Dataset, Instrument};
use crate::scheduler::{Scheduler, TaskContext};
use crate::source::CandleSource;
use crate::storage::CandleStore;
use crate::worker::WorkerPool;
use crate::{Error, Result};

const MAX_WINDOW_SECS: u64 = 31 * 86_400;

/// Crawler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub enabled: bool,
    /// Scheduler task name.
    pub task_name: String,
    /// Instruments crawled in this order every round.
    pub instruments: Vec<Instrument>,
    /// Candle period code passed to the source.
    pub period: String,
    /// Width of one fetch window in seconds.
    pub window_secs: u64,
    /// Fetch attempts per window before an empty result is accepted.
    pub retry_limit: u32,
    /// Seconds between rounds.
    pub frequency_secs: u64,
    /// Where to start when an instrument has neither a checkpoint nor stored data.
    pub start_from: Option<DateTime<Utc>>,
    pub retry: RetryConfig,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            task_name: "fx-crawler".to_string(),
            instruments: vec![
                Instrument::new("EUR/USD"),
                Instrument::new("USD/JPY"),
                Instrument::new("EUR/JPY"),
            ],
            period: "m1".to_string(),
            window_secs: 300,
            retry_limit: 3,
            frequency_secs: 60,
            start_from: None,
            retry: RetryConfig::default(),
        }
    }
}

impl CrawlerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.task_name.trim().is_empty() {
            return Err(Error::config("crawler task_name is empty"));
        }
        if self.instruments.is_empty() {
            return Err(Error::config("crawler has no instruments configured"));
        }
        if self.window_secs == 0 || self.window_secs > MAX_WINDOW_SECS {
            return Err(Error::config(format!(
                "crawler window_secs must be between 1 and {MAX_WINDOW_SECS}"
            )));
        }
        if self.retry_limit == 0 {
            return Err(Error::config("crawler retry_limit must be at least 1"));
        }
        if self.frequency_secs == 0 {
            return Err(Error::config("crawler frequency_secs must be positive"));
        }
        Ok(())
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs.min(MAX_WINDOW_SECS) as i64)
    }

    fn frequency(&self) -> Duration {
        Duration::from_secs(self.frequency_secs)
    }
}

/// Lifecycle state of a crawler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlerState {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for CrawlerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrawlerState::Idle => write!(f, "idle"),
            CrawlerState::Running => write!(f, "running"),
            CrawlerState::Paused => write!(f, "paused"),
            CrawlerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// What one `crawl_one` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// Rows were stored and the checkpoint advanced.
    Fetched { rows: usize },
    /// Every attempt came back empty; the checkpoint advanced anyway.
    ConfirmedEmpty,
    /// The window may still be filling at the source.
    NotReady,
    /// A recoverable error; the checkpoint is unchanged.
    Failed,
    /// No checkpoint, no stored data and no configured start.
    NoBaseline,
    /// The task was stopped before the window finished; the checkpoint is unchanged.
    Cancelled,
}

/// Checkpoint-driven crawler for one group of instruments.
pub struct IncrementalCrawler {
    config: CrawlerConfig,
    storage: Arc<dyn CandleStore>,
    source: Arc<dyn CandleSource>,
    pool: Arc<WorkerPool>,
    clock: Arc<dyn Clock>,
    paused: AtomicBool,
    state: RwLock<CrawlerState>,
    /// Bumped by every `run`, so a draining older loop cannot overwrite the state of a newer one.
    generation: AtomicU64,
}

impl IncrementalCrawler {
    pub fn new(
        config: CrawlerConfig,
        storage: Arc<dyn CandleStore>,
        source: Arc<dyn CandleSource>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self::with_clock(config, storage, source, pool, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: CrawlerConfig,
        storage: Arc<dyn CandleStore>,
        source: Arc<dyn CandleSource>,
        pool: Arc<WorkerPool>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            storage,
            source,
            pool,
            clock,
            paused: AtomicBool::new(false),
            state: RwLock::new(CrawlerState::Idle),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    pub fn state(&self) -> CrawlerState {
        let state = *self.state.read();
        if state == CrawlerState::Running && self.is_paused() {
            CrawlerState::Paused
        } else {
            state
        }
    }

    fn set_state(&self, state: CrawlerState) {
        *self.state.write() = state;
    }

    fn set_state_if_current(&self, generation: u64, state: CrawlerState) {
        if self.generation.load(Ordering::SeqCst) == generation {
            self.set_state(state);
        }
    }

    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!(task = %self.config.task_name, "Crawler paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!(task = %self.config.task_name, "Crawler resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Schedule the crawl loop. A disabled crawler logs and does nothing.
    pub fn start(self: &Arc<Self>, scheduler: &Scheduler) -> Result<()> {
        if !self.config.enabled {
            info!("Crawler is disabled");
            return Ok(());
        }
        self.config.validate()?;

        let crawler = Arc::clone(self);
        scheduler.schedule(self.config.task_name.clone(), move |ctx| async move {
            crawler.run(ctx).await
        })
    }

    pub fn stop(&self, scheduler: &Scheduler) -> Result<()> {
        scheduler.stop(&self.config.task_name)?;
        self.set_state(CrawlerState::Stopped);
        Ok(())
    }

    /// The periodic loop. Returns `Err(CrawlerFatal)` on an unrecoverable error,
    /// which ends this task only.
    pub async fn run(&self, ctx: TaskContext) -> Result<()> {
        let period = self.config.frequency();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(CrawlerState::Running);
        info!(
            task = ctx.name(),
            instruments = self.config.instruments.len(),
            period_secs = self.config.frequency_secs,
            "Starting crawler"
        );

        loop {
            if ctx.is_cancelled() {
                break;
            }

            if self.is_paused() {
                debug!(task = ctx.name(), "Crawler paused, skipping round");
                if !ctx.sleep(period).await {
                    break;
                }
                continue;
            }

            let started = Instant::now();
            if let Err(e) = self.crawl_round(&ctx).await {
                error!(task = ctx.name(), error = %e, "Crawler hit an unrecoverable error, stopping");
                self.set_state_if_current(generation, CrawlerState::Stopped);
                return Err(match e {
                    Error::CrawlerFatal(_) => e,
                    other => Error::CrawlerFatal(other.to_string()),
                });
            }

            let elapsed = started.elapsed();
            if elapsed > period {
                warn!(
                    task = ctx.name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    period_secs = self.config.frequency_secs,
                    "Crawl round took longer than the configured period"
                );
            } else {
                info!(task = ctx.name(), elapsed_ms = elapsed.as_millis() as u64, "Crawl round finished");
            }

            if !ctx.sleep(period).await {
                break;
            }
        }

        self.set_state_if_current(generation, CrawlerState::Stopped);
        info!(task = ctx.name(), "Crawler stopped");
        Ok(())
    }

    async fn crawl_round(&self, ctx: &TaskContext) -> Result<()> {
        for instrument in &self.config.instruments {
            if ctx.is_cancelled() {
                break;
            }
            let outcome = self
                .crawl_window(instrument, ctx.cancellation_token())
                .await?;
            if outcome == CrawlOutcome::Cancelled {
                break;
            }
        }
        Ok(())
    }

    /// Crawl the next window for one instrument.
    ///
    /// Recoverable failures are logged and reported as [`CrawlOutcome::Failed`];
    /// only unrecoverable ones come back as `Err`.
    pub async fn crawl_one(&self, instrument: &Instrument) -> Result<CrawlOutcome> {
        self.crawl_window(instrument, &CancellationToken::new()).await
    }

    /// [`Self::crawl_one`] that gives up, without moving the checkpoint, once
    /// `cancel` fires. Cancellation is observed during backoff and after every
    /// delegated call.
    async fn crawl_window(
        &self,
        instrument: &Instrument,
        cancel: &CancellationToken,
    ) -> Result<CrawlOutcome> {
        let checkpoint = match self.resolve_checkpoint(instrument).await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => {
                warn!(
                    %instrument,
                    "No checkpoint, no stored data and no start_from; skipping"
                );
                return Ok(CrawlOutcome::NoBaseline);
            }
            Err(e) if e.is_io_failure() => {
                warn!(%instrument, error = %e, "Failed to read checkpoint");
                return Ok(CrawlOutcome::Failed);
            }
            Err(e) => return Err(e),
        };

        let window_start = checkpoint;
        let window_end = checkpoint + self.config.window();
        let now = self.clock.now();
        if window_end > now - self.config.window() {
            debug!(
                %instrument,
                from = %window_start,
                to = %window_end,
                "Window not complete yet"
            );
            return Ok(CrawlOutcome::NotReady);
        }

        let limit = self.config.retry_limit.max(1);
        for attempt in 0..limit {
            let delay = self.config.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Ok(self.cancelled(instrument, window_start, attempt));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Ok(self.cancelled(instrument, window_start, attempt));
            }

            info!(
                %instrument,
                from = %window_start,
                to = %window_end,
                attempt = attempt + 1,
                max_attempts = limit,
                "Crawling window"
            );

            let fetched = self.fetch(instrument, window_start, window_end).await;
            if cancel.is_cancelled() {
                return Ok(self.cancelled(instrument, window_start, attempt + 1));
            }
            let rows = match fetched {
                Ok(rows) => rows,
                Err(e) if e.is_io_failure() => {
                    warn!(
                        %instrument,
                        from = %window_start,
                        to = %window_end,
                        attempt = attempt + 1,
                        error = %e,
                        "Fetch failed, checkpoint left in place"
                    );
                    return Ok(CrawlOutcome::Failed);
                }
                Err(e) => return Err(e),
            };

            if rows.is_empty() {
                info!(
                    %instrument,
                    from = %window_start,
                    to = %window_end,
                    attempt = attempt + 1,
                    "Fetched window is empty"
                );
                continue;
            }

            let count = rows.len();
            if let Err(e) = self.persist(instrument, rows).await {
                if !e.is_io_failure() {
                    return Err(e);
                }
                warn!(%instrument, from = %window_start, error = %e, "Failed to store rows");
                return Ok(CrawlOutcome::Failed);
            }
            if cancel.is_cancelled() {
                return Ok(self.cancelled(instrument, window_start, attempt + 1));
            }
            if let Err(e) = self.advance(instrument, window_end).await {
                if !e.is_io_failure() {
                    return Err(e);
                }
                warn!(%instrument, to = %window_end, error = %e, "Failed to advance checkpoint");
                return Ok(CrawlOutcome::Failed);
            }

            info!(%instrument, rows = count, checkpoint = %window_end, "Stored window");
            return Ok(CrawlOutcome::Fetched { rows: count });
        }

        if cancel.is_cancelled() {
            return Ok(self.cancelled(instrument, window_start, limit));
        }
        if let Err(e) = self.advance(instrument, window_end).await {
            if !e.is_io_failure() {
                return Err(e);
            }
            warn!(%instrument, to = %window_end, error = %e, "Failed to advance checkpoint");
            return Ok(CrawlOutcome::Failed);
        }
        info!(
            %instrument,
            attempts = limit,
            checkpoint = %window_end,
            "Window confirmed empty, checkpoint advanced"
        );
        Ok(CrawlOutcome::ConfirmedEmpty)
    }

    /// Checkpoint, else the newest stored row, else the configured start.
    async fn resolve_checkpoint(&self, instrument: &Instrument) -> Result<Option<DateTime<Utc>>> {
        if let Some(checkpoint) = self
            .storage
            .get_checkpoint(&instrument.checkpoint_key())
            .await?
        {
            return Ok(Some(checkpoint));
        }

        if let Some((_, newest)) = self.storage.get_domain(Dataset::Raw, instrument).await? {
            debug!(%instrument, %newest, "Bootstrapping checkpoint from stored data");
            return Ok(Some(newest));
        }

        Ok(self.config.start_from)
    }

    /// Fetch `[from, to)` on the worker pool.
    async fn fetch(
        &self,
        instrument: &Instrument,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let source = Arc::clone(&self.source);
        let owned_instrument = instrument.clone();
        let period = self.config.period.clone();

        let mut rows = self
            .pool
            .run("fetch_candles", async move {
                source
                    .fetch_candles(&owned_instrument, &period, from, to)
                    .await
            })
            .await?;

        rows.retain(|c| c.timestamp >= from && c.timestamp < to);
        Ok(rows)
    }

    async fn persist(&self, instrument: &Instrument, rows: Vec<Candle>) -> Result<()> {
        let storage = Arc::clone(&self.storage);
        let owned_instrument = instrument.clone();
        self.pool
            .run("put_rows", async move {
                storage
                    .put_rows(Dataset::Raw, &owned_instrument, &rows)
                    .await
            })
            .await
    }

    fn cancelled(&self, instrument: &Instrument, from: DateTime<Utc>, attempt: u32) -> CrawlOutcome {
        info!(
            %instrument,
            from = %from,
            attempts = attempt,
            "Crawler stopped mid-window, checkpoint left in place"
        );
        CrawlOutcome::Cancelled
    }

    /// Move the checkpoint to `to` unless the stored one is already there or later.
    async fn advance(&self, instrument: &Instrument, to: DateTime<Utc>) -> Result<()> {
        let moved = self
            .storage
            .advance_checkpoint(&instrument.checkpoint_key(), to)
            .await?;
        if !moved {
            warn!(%instrument, to = %to, "Stored checkpoint is already at or past this window");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = CrawlerConfig::default();
        assert_eq!(config.task_name, "fx-crawler");
        assert_eq!(config.period, "m1");
        assert_eq!(config.window_secs, 300);
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.frequency_secs, 60);
        assert!(!config.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let no_instruments = CrawlerConfig {
            instruments: Vec::new(),
            ..CrawlerConfig::default()
        };
        assert!(no_instruments.validate().is_err());

        let no_attempts = CrawlerConfig {
            retry_limit: 0,
            ..CrawlerConfig::default()
        };
        assert!(no_attempts.validate().is_err());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CrawlerState::Paused.to_string(), "paused");
    }
}
