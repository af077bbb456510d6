//! Worker pool implementation.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Configuration for a worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent calls.
    pub max_workers: usize,
    /// Per-call timeout in seconds. Zero disables the timeout.
    pub call_timeout_secs: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            call_timeout_secs: 60,
        }
    }
}

/// Counts a call as active until dropped, including on panic.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A bounded pool that runs delegated calls on their own tokio tasks.
///
/// The caller only suspends while waiting for a permit and for the result. A call
/// that has started is never interrupted by the caller being cancelled; it runs
/// to completion (or to its timeout) and releases its permit.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    semaphore: Arc<Semaphore>,
    active_workers: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::with_config(WorkerPoolConfig::default())
    }

    pub fn with_config(config: WorkerPoolConfig) -> Self {
        let config = WorkerPoolConfig {
            max_workers: config.max_workers.max(1),
            ..config
        };
        info!(max_workers = config.max_workers, "Worker pool created");
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_workers)),
            config,
            active_workers: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Run `call` on the pool and wait for its result.
    pub async fn run<F, T>(&self, name: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.cancellation_token.is_cancelled() {
            return Err(Error::WorkerPool(format!("pool is stopped, rejected {name}")));
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::WorkerPool(format!("pool is closed, rejected {name}")))?;

        let active_workers = self.active_workers.clone();
        let call_timeout = Duration::from_secs(self.config.call_timeout_secs);

        let handle = tokio::spawn(async move {
            let _permit = permit;
            let _active = ActiveGuard::enter(active_workers);
            if call_timeout > Duration::ZERO {
                match tokio::time::timeout(call_timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(format!(
                        "{name} exceeded {}s",
                        call_timeout.as_secs()
                    ))),
                }
            } else {
                call.await
            }
        });

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                warn!(call = name, "Delegated call panicked");
                Err(Error::WorkerPool(format!("{name} panicked")))
            }
            Err(e) => Err(Error::WorkerPool(format!("{name} was aborted: {e}"))),
        }
    }

    /// Stop accepting calls and wait up to `drain` for in-flight calls.
    pub async fn stop(&self, drain: Duration) {
        info!("Stopping worker pool");
        self.cancellation_token.cancel();

        let permits = u32::try_from(self.config.max_workers).unwrap_or(u32::MAX);
        match tokio::time::timeout(drain, self.semaphore.acquire_many(permits)).await {
            Ok(_) => debug!("Worker pool drained"),
            Err(_) => warn!(
                in_flight = self.active_count(),
                "Worker pool drain timed out"
            ),
        }
        self.semaphore.close();

        info!("Worker pool stopped");
    }

    /// Number of calls currently executing.
    pub fn active_count(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.call_timeout_secs, 60);
    }

    #[tokio::test]
    async fn test_run_returns_result() {
        let pool = WorkerPool::new();
        let value = pool.run("answer", async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_run_propagates_error() {
        let pool = WorkerPool::new();
        let result: Result<()> = pool
            .run("failing", async { Err(Error::source_error("boom")) })
            .await;
        assert!(matches!(result, Err(Error::Source(_))));
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let pool = WorkerPool::new();
        let result: Result<()> = pool
            .run("panicking", async { panic!("call panicked") })
            .await;
        assert!(matches!(result, Err(Error::WorkerPool(_))));
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let pool = WorkerPool::with_config(WorkerPoolConfig {
            max_workers: 1,
            call_timeout_secs: 1,
        });
        let result: Result<()> = pool
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_rejects_after_stop() {
        let pool = WorkerPool::new();
        pool.stop(Duration::from_millis(100)).await;
        assert!(!pool.is_running());

        let result = pool.run("late", async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::WorkerPool(_))));
    }
}
