//! Scheduler service.
//!
//! Every task runs on its own tokio task with a child of the scheduler's
//! shutdown token. A task that returns (successfully, with an error, or by
//! panicking) removes its own registry entry and reports the exit to [`Scheduler::run`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::WorkQueue;
use super::task::{TaskContext, TaskEntry, TaskStatus};
use crate::{Error, Result};

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Capacity of the shared work queue.
    pub queue_size: usize,
    /// How long shutdown waits for cancelled tasks before aborting them.
    pub drain_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_size: 50,
            drain_timeout_ms: 5000,
        }
    }
}

/// Outcome of [`Scheduler::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that exited on their own after cancellation.
    pub graceful: usize,
    /// Tasks aborted after the drain timeout.
    pub forced: usize,
}

#[derive(Debug)]
enum ExitOutcome {
    Completed,
    Failed(String),
    Panicked,
}

#[derive(Debug)]
struct TaskExit {
    name: String,
    outcome: ExitOutcome,
}

type Registry = Arc<Mutex<HashMap<String, TaskEntry>>>;

type Draining = Mutex<Vec<(String, JoinHandle<()>)>>;

/// Removes the registry entry of a finished task, even if it panicked or was aborted.
struct ExitGuard {
    registry: Registry,
    exits: mpsc::UnboundedSender<TaskExit>,
    name: String,
    id: u64,
    outcome: Option<ExitOutcome>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        {
            let mut registry = self.registry.lock();
            if registry.get(&self.name).is_some_and(|entry| entry.id == self.id) {
                registry.remove(&self.name);
            }
        }
        let outcome = self.outcome.take().unwrap_or(ExitOutcome::Panicked);
        // The receiver is gone once the scheduler is dropped.
        let _ = self.exits.send(TaskExit {
            name: std::mem::take(&mut self.name),
            outcome,
        });
    }
}

/// Registry and lifecycle owner for named long-lived tasks.
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Registry,
    /// Tasks removed by `stop` that may still be running.
    draining: Draining,
    queue: WorkQueue,
    next_id: AtomicU64,
    shutdown_token: CancellationToken,
    is_shut_down: AtomicBool,
    exit_tx: mpsc::UnboundedSender<TaskExit>,
    exit_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TaskExit>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            queue: WorkQueue::new(config.queue_size),
            config,
            registry: Arc::new(Mutex::new(HashMap::new())),
            draining: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            shutdown_token: CancellationToken::new(),
            is_shut_down: AtomicBool::new(false),
            exit_tx,
            exit_rx: tokio::sync::Mutex::new(exit_rx),
        }
    }

    /// Start a named task.
    ///
    /// `factory` receives the task's [`TaskContext`] and returns the future to run.
    /// The future is spawned and starts at the next scheduling opportunity.
    /// Fails with [`Error::DuplicateTask`] if a task with this name is registered,
    /// in which case the future is never polled.
    pub fn schedule<F, Fut>(&self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        if self.is_shut_down.load(Ordering::SeqCst) {
            return Err(Error::Other(format!(
                "scheduler is shut down, cannot schedule '{name}'"
            )));
        }
        if self.registry.lock().contains_key(&name) {
            return Err(Error::DuplicateTask(name));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown_token.child_token();
        let ctx = TaskContext::new(name.clone(), token.clone(), self.queue.clone());
        let task = factory(ctx);

        let mut registry = self.registry.lock();
        // The factory ran without the lock held.
        if registry.contains_key(&name) {
            return Err(Error::DuplicateTask(name));
        }

        let mut guard = ExitGuard {
            registry: self.registry.clone(),
            exits: self.exit_tx.clone(),
            name: name.clone(),
            id,
            outcome: None,
        };
        let status_registry = self.registry.clone();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            if let Some(entry) = status_registry.lock().get_mut(&task_name)
                && entry.id == id
                && entry.status == TaskStatus::Pending
            {
                entry.status = TaskStatus::Running;
            }
            debug!(task = %task_name, "Task started");

            guard.outcome = Some(match task.await {
                Ok(()) => ExitOutcome::Completed,
                Err(e) => ExitOutcome::Failed(e.to_string()),
            });
        });

        registry.insert(
            name.clone(),
            TaskEntry {
                id,
                status: TaskStatus::Pending,
                cancellation_token: token,
                handle: Some(handle),
            },
        );
        info!(task = %name, "Task scheduled");
        Ok(())
    }

    /// Request cancellation of a task and remove it from the registry.
    ///
    /// Cancellation is cooperative: the task observes it at its next suspension
    /// point. Fails with [`Error::UnknownTask`] if no such task is registered.
    pub fn stop(&self, name: &str) -> Result<()> {
        let mut entry = self
            .registry
            .lock()
            .remove(name)
            .ok_or_else(|| Error::UnknownTask(name.to_string()))?;
        entry.cancel();
        if let Some(handle) = entry.handle.take() {
            let mut draining = self.draining.lock();
            draining.retain(|(_, handle)| !handle.is_finished());
            draining.push((name.to_string(), handle));
        }
        info!(task = %name, "Task stop requested");
        Ok(())
    }

    /// The shared bounded work queue.
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.lock().contains_key(name)
    }

    pub fn status(&self, name: &str) -> Option<TaskStatus> {
        self.registry.lock().get(name).map(|entry| entry.status)
    }

    /// Names of all registered tasks, sorted.
    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }

    /// Token cancelled when the scheduler shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.is_shut_down.load(Ordering::SeqCst)
    }

    /// Block until shutdown, logging task exits as they happen.
    pub async fn run(&self) -> Result<()> {
        let mut exits = self.exit_rx.lock().await;
        info!("Scheduler running");

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    debug!("Scheduler run loop received shutdown");
                    break;
                }
                Some(exit) = exits.recv() => log_exit(&exit),
            }
        }

        while let Ok(exit) = exits.try_recv() {
            log_exit(&exit);
        }
        info!("Scheduler stopped");
        Ok(())
    }

    /// Cancel every task, wait for them to drain, then abort stragglers.
    ///
    /// Tasks already removed by [`Scheduler::stop`] but still running are drained
    /// the same way.
    ///
    /// Calling this more than once is a no-op after the first call.
    pub async fn shutdown(&self) -> ShutdownReport {
        if self.is_shut_down.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already shut down");
            return ShutdownReport::default();
        }

        info!(tasks = self.len(), "Shutting down scheduler");
        self.shutdown_token.cancel();

        let mut handles: Vec<(String, JoinHandle<()>)> = {
            let mut registry = self.registry.lock();
            registry
                .iter_mut()
                .filter_map(|(name, entry)| {
                    entry.cancel();
                    entry.handle.take().map(|handle| (name.clone(), handle))
                })
                .collect()
        };
        handles.append(&mut *self.draining.lock());

        let drain_timeout = Duration::from_millis(self.config.drain_timeout_ms);
        let drain = async {
            for (_, handle) in handles.iter_mut() {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(drain_timeout, drain).await.is_err() {
            warn!(
                timeout_ms = self.config.drain_timeout_ms,
                "Tasks did not finish within the drain timeout, aborting"
            );
        }

        let mut report = ShutdownReport::default();
        for (name, handle) in handles {
            if handle.is_finished() {
                report.graceful += 1;
            } else {
                warn!(task = %name, "Aborting task");
                handle.abort();
                report.forced += 1;
            }
        }
        self.registry.lock().clear();

        info!(
            graceful = report.graceful,
            forced = report.forced,
            "Scheduler shut down"
        );
        report
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

fn log_exit(exit: &TaskExit) {
    match &exit.outcome {
        ExitOutcome::Completed => info!(task = %exit.name, "Task finished"),
        ExitOutcome::Failed(e) => error!(task = %exit.name, error = %e, "Task exited with error"),
        ExitOutcome::Panicked => error!(task = %exit.name, "Task panicked or was aborted"),
    }
}
