//! Service container for dependency injection.
//!
//! The `AppContext` is built once at process start and handed to everything
//! that needs the scheduler, storage or cache. Nothing in the crate keeps
//! process-wide singletons.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::Result;
use crate::cache::RollingCache;
use crate::config::AppConfig;
use crate::crawler::IncrementalCrawler;
use crate::scheduler::{Scheduler, ShutdownReport};
use crate::source::{CandleSource, FxcmRestSource};
use crate::storage::{CandleStore, MemoryStore, SqliteStore};
use crate::worker::WorkerPool;

/// Service container holding all application services.
pub struct AppContext {
    pub config: AppConfig,
    pub storage: Arc<dyn CandleStore>,
    pub worker_pool: Arc<WorkerPool>,
    pub scheduler: Arc<Scheduler>,
    /// Present only when the crawler is enabled.
    pub crawler: Option<Arc<IncrementalCrawler>>,
    pub cache: Arc<RollingCache>,
}

impl AppContext {
    /// Validate `config`, open storage and build every service.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;
        info!("Initializing services");

        let storage: Arc<dyn CandleStore> = if config.storage.is_memory() {
            info!("Using in-memory storage");
            Arc::new(MemoryStore::new())
        } else {
            let pool = crate::database::init_pool_with_size(
                &config.storage.database_url,
                config.storage.max_connections,
            )
            .await?;
            crate::database::run_migrations(&pool).await?;
            Arc::new(SqliteStore::new(pool))
        };

        let source: Option<Arc<dyn CandleSource>> = if config.crawler.enabled {
            Some(Arc::new(FxcmRestSource::new(&config.source)?))
        } else {
            None
        };

        Ok(Self::with_components(config, storage, source))
    }

    /// Build the services around an existing store and source.
    ///
    /// The crawler is only created when it is enabled and a source is given.
    pub fn with_components(
        config: AppConfig,
        storage: Arc<dyn CandleStore>,
        source: Option<Arc<dyn CandleSource>>,
    ) -> Self {
        let worker_pool = Arc::new(WorkerPool::with_config(config.worker_pool.clone()));
        let scheduler = Arc::new(Scheduler::new(config.scheduler.clone()));

        let crawler = source
            .filter(|_| config.crawler.enabled)
            .map(|source| {
                Arc::new(IncrementalCrawler::new(
                    config.crawler.clone(),
                    storage.clone(),
                    source,
                    worker_pool.clone(),
                ))
            });

        let cache = Arc::new(RollingCache::new(
            config.cache.clone(),
            storage.clone(),
            worker_pool.clone(),
        ));

        Self {
            config,
            storage,
            worker_pool,
            scheduler,
            crawler,
            cache,
        }
    }

    /// Schedule the crawler (if enabled) and the cache updater.
    pub fn start(&self) -> Result<()> {
        match &self.crawler {
            Some(crawler) => crawler.start(&self.scheduler)?,
            None => info!("Crawler is disabled"),
        }
        self.cache.start(&self.scheduler)?;
        info!(tasks = ?self.scheduler.task_names(), "Services started");
        Ok(())
    }

    /// Stop all tasks, then the worker pool.
    pub async fn shutdown(&self) -> ShutdownReport {
        let report = self.scheduler.shutdown().await;
        self.worker_pool
            .stop(Duration::from_millis(self.config.scheduler.drain_timeout_ms))
            .await;
        report
    }
}
