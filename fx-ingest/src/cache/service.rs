//! Rolling cache kept up to date from the crawler's checkpoints.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::window::{CacheSlice, RollingWindow};
use crate::{Error, Result};
use crate::domain::{Dataset, Instrument};
use crate::scheduler::{Scheduler, TaskContext};
use crate::storage::CandleStore;
use crate::worker::WorkerPool;

const MAX_LOOKBACK_SECS: u64 = 31 * 86_400;

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub task_name: String,
    pub instruments: Vec<Instrument>,
    /// Rows kept per instrument.
    pub capacity: usize,
    /// How far before the last seen checkpoint each update re-reads, in seconds.
    pub lookback_secs: u64,
    pub update_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            task_name: "data-cache-update".to_string(),
            instruments: vec![
                Instrument::new("EUR/USD"),
                Instrument::new("USD/JPY"),
                Instrument::new("EUR/JPY"),
            ],
            capacity: 100_000,
            lookback_secs: 300,
            update_interval_ms: 2000,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.task_name.trim().is_empty() {
            return Err(Error::config("cache task_name is empty"));
        }
        if self.capacity == 0 {
            return Err(Error::config("cache capacity must be positive"));
        }
        if self.lookback_secs > MAX_LOOKBACK_SECS {
            return Err(Error::config(format!(
                "cache lookback_secs must be at most {MAX_LOOKBACK_SECS}"
            )));
        }
        if self.update_interval_ms == 0 {
            return Err(Error::config("cache update_interval_ms must be positive"));
        }
        Ok(())
    }

    fn lookback(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lookback_secs.min(MAX_LOOKBACK_SECS) as i64)
    }
}

/// Per-instrument rolling windows fed from storage.
pub struct RollingCache {
    config: CacheConfig,
    storage: Arc<dyn CandleStore>,
    pool: Arc<WorkerPool>,
    windows: DashMap<Instrument, RollingWindow>,
}

impl RollingCache {
    pub fn new(config: CacheConfig, storage: Arc<dyn CandleStore>, pool: Arc<WorkerPool>) -> Self {
        let windows = DashMap::new();
        for instrument in &config.instruments {
            windows.insert(instrument.clone(), RollingWindow::new(config.capacity));
        }
        Self {
            config,
            storage,
            pool,
            windows,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Monitored instruments in configuration order.
    pub fn instruments(&self) -> &[Instrument] {
        &self.config.instruments
    }

    pub fn cumulative_count(&self, instrument: &Instrument) -> Option<u64> {
        self.windows.get(instrument).map(|w| w.cumulative_count())
    }

    pub fn last_seen_checkpoint(&self, instrument: &Instrument) -> Option<DateTime<Utc>> {
        self.windows
            .get(instrument)
            .and_then(|w| w.last_seen_checkpoint())
    }

    /// Pull rows for `instrument` if its checkpoint moved since the last update.
    ///
    /// Returns the number of rows appended.
    pub async fn update_one(&self, instrument: &Instrument) -> Result<usize> {
        let storage = Arc::clone(&self.storage);
        let key = instrument.checkpoint_key();
        let checkpoint = self
            .pool
            .run("get_checkpoint", async move { storage.get_checkpoint(&key).await })
            .await?;

        let Some(checkpoint) = checkpoint else {
            debug!(%instrument, "No checkpoint yet");
            return Ok(0);
        };

        let last_seen = self.last_seen_checkpoint(instrument);
        if last_seen == Some(checkpoint) {
            debug!(%instrument, "No new data");
            return Ok(0);
        }

        let from = last_seen.unwrap_or(checkpoint) - self.config.lookback();
        let to = checkpoint;

        let storage = Arc::clone(&self.storage);
        let owned_instrument = instrument.clone();
        let rows = self
            .pool
            .run("get_range", async move {
                storage
                    .get_range(Dataset::Raw, &owned_instrument, from, to)
                    .await
            })
            .await?;

        let mut window = self
            .windows
            .entry(instrument.clone())
            .or_insert_with(|| RollingWindow::new(self.config.capacity));
        let appended = window.append(&rows);
        window.set_last_seen_checkpoint(checkpoint);
        // The next read starts here.
        window.forget_before(checkpoint - self.config.lookback());

        debug!(
            %instrument,
            %from,
            %to,
            read = rows.len(),
            appended,
            cumulative = window.cumulative_count(),
            "Cache updated"
        );
        Ok(appended)
    }

    /// Update every monitored instrument once. Storage failures are logged and
    /// the instrument is retried on the next pass.
    pub async fn update_all(&self) -> Result<()> {
        for instrument in &self.config.instruments {
            match self.update_one(instrument).await {
                Ok(_) => {}
                Err(e) if e.is_io_failure() => {
                    warn!(%instrument, error = %e, "Failed to update cache");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Rows from cumulative position `start` onwards.
    ///
    /// Unknown instruments yield an empty slice.
    pub fn get_next(&self, instrument: &Instrument, start: u64) -> CacheSlice {
        self.windows
            .get(instrument)
            .map(|w| w.get_next(start))
            .unwrap_or_default()
    }

    /// The periodic update loop.
    pub async fn run(&self, ctx: TaskContext) -> Result<()> {
        let interval = Duration::from_millis(self.config.update_interval_ms);
        info!(
            task = ctx.name(),
            instruments = self.config.instruments.len(),
            interval_ms = self.config.update_interval_ms,
            "Starting cache updates"
        );

        loop {
            self.update_all().await?;
            if !ctx.sleep(interval).await {
                break;
            }
        }

        info!(task = ctx.name(), "Cache updates stopped");
        Ok(())
    }

    pub fn start(self: &Arc<Self>, scheduler: &Scheduler) -> Result<()> {
        self.config.validate()?;
        let cache = Arc::clone(self);
        scheduler.schedule(self.config.task_name.clone(), move |ctx| async move {
            cache.run(ctx).await
        })
    }

    pub fn stop(&self, scheduler: &Scheduler) -> Result<()> {
        scheduler.stop(&self.config.task_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_candle;
    use crate::storage::MemoryStore;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(minutes)
    }

    fn cache_with(store: Arc<MemoryStore>, capacity: usize) -> RollingCache {
        RollingCache::new(
            CacheConfig {
                instruments: vec![Instrument::new("EUR/USD")],
                capacity,
                ..CacheConfig::default()
            },
            store,
            Arc::new(WorkerPool::new()),
        )
    }

    async fn crawl(store: &MemoryStore, instrument: &Instrument, from_minute: i64, to_minute: i64) {
        let rows: Vec<_> = (from_minute..to_minute)
            .map(|m| test_candle(t(m), 1.1))
            .collect();
        store.put_rows(Dataset::Raw, instrument, &rows).await.unwrap();
        store
            .set_checkpoint(&instrument.checkpoint_key(), t(to_minute))
            .await
            .unwrap();
    }

    #[test]
    fn test_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.task_name, "data-cache-update");
        assert_eq!(config.capacity, 100_000);
        assert_eq!(config.lookback_secs, 300);
        assert_eq!(config.update_interval_ms, 2000);
        assert_eq!(config.instruments.len(), 3);
        assert!(config.validate().is_ok());

        let empty = CacheConfig {
            capacity: 0,
            ..CacheConfig::default()
        };
        assert!(empty.validate().is_err());
    }

    #[tokio::test]
    async fn test_update_without_checkpoint_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store, 100);
        let eurusd = Instrument::new("EUR/USD");

        assert_eq!(cache.update_one(&eurusd).await.unwrap(), 0);
        assert_eq!(cache.cumulative_count(&eurusd), Some(0));
    }

    #[tokio::test]
    async fn test_update_pulls_delta_once() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone(), 100);
        let eurusd = Instrument::new("EUR/USD");

        crawl(&store, &eurusd, 0, 5).await;
        assert_eq!(cache.update_one(&eurusd).await.unwrap(), 5);
        assert_eq!(cache.update_one(&eurusd).await.unwrap(), 0);

        crawl(&store, &eurusd, 5, 10).await;
        assert_eq!(cache.update_one(&eurusd).await.unwrap(), 5);
        assert_eq!(cache.cumulative_count(&eurusd), Some(10));
        assert_eq!(cache.last_seen_checkpoint(&eurusd), Some(t(10)));

        let slice = cache.get_next(&eurusd, 0);
        assert_eq!(slice.len(), 10);
        assert_eq!(slice.date[9], t(9));
    }

    #[tokio::test]
    async fn test_late_rows_inside_lookback_are_picked_up() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone(), 100);
        let eurusd = Instrument::new("EUR/USD");

        crawl(&store, &eurusd, 0, 5).await;
        cache.update_one(&eurusd).await.unwrap();

        // Rows for minutes 5..10 are stored after the checkpoint already moved to 10.
        store
            .set_checkpoint(&eurusd.checkpoint_key(), t(10))
            .await
            .unwrap();
        cache.update_one(&eurusd).await.unwrap();
        crawl(&store, &eurusd, 5, 12).await;

        cache.update_one(&eurusd).await.unwrap();
        assert_eq!(cache.cumulative_count(&eurusd), Some(12));
    }

    #[tokio::test]
    async fn test_late_row_older_than_newest_is_recovered() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone(), 100);
        let eurusd = Instrument::new("EUR/USD");

        // Minute 3 is missing when the checkpoint first reaches 5.
        let early: Vec<_> = [0, 1, 2, 4].iter().map(|&m| test_candle(t(m), 1.1)).collect();
        store.put_rows(Dataset::Raw, &eurusd, &early).await.unwrap();
        store
            .set_checkpoint(&eurusd.checkpoint_key(), t(5))
            .await
            .unwrap();
        assert_eq!(cache.update_one(&eurusd).await.unwrap(), 4);

        crawl(&store, &eurusd, 3, 6).await;
        assert_eq!(cache.update_one(&eurusd).await.unwrap(), 2);
        assert_eq!(cache.cumulative_count(&eurusd), Some(6));

        let slice = cache.get_next(&eurusd, 4);
        assert_eq!(slice.date, vec![t(3), t(5)]);
    }

    #[tokio::test]
    async fn test_get_next_unknown_instrument() {
        let cache = cache_with(Arc::new(MemoryStore::new()), 10);
        assert!(cache.get_next(&Instrument::new("GBP/USD"), 0).is_empty());
        assert!(cache.cumulative_count(&Instrument::new("GBP/USD")).is_none());
    }

    #[tokio::test]
    async fn test_start_and_stop_task() {
        let scheduler = Scheduler::default();
        let cache = Arc::new(cache_with(Arc::new(MemoryStore::new()), 10));

        cache.start(&scheduler).unwrap();
        assert!(scheduler.contains("data-cache-update"));
        assert!(cache.start(&scheduler).is_err());

        cache.stop(&scheduler).unwrap();
        assert!(!scheduler.contains("data-cache-update"));
    }
}
