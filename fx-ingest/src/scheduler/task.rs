//! Task definitions used by the scheduler.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::queue::WorkQueue;

/// Status of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Spawned but not yet polled.
    Pending,
    /// Task is currently running.
    Running,
    /// Cancellation was requested and the task is draining.
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What a scheduled task receives when it starts.
#[derive(Debug, Clone)]
pub struct TaskContext {
    name: String,
    cancellation_token: CancellationToken,
    queue: WorkQueue,
}

impl TaskContext {
    pub(crate) fn new(name: String, cancellation_token: CancellationToken, queue: WorkQueue) -> Self {
        Self {
            name,
            cancellation_token,
            queue,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// The scheduler's shared work queue.
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Resolves once the task has been asked to stop.
    pub fn cancelled(&self) -> impl Future<Output = ()> + '_ {
        self.cancellation_token.cancelled()
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `false` if the sleep was cut short by cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancellation_token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// Registry entry for one scheduled task.
#[derive(Debug)]
pub(crate) struct TaskEntry {
    /// Distinguishes a task from a later one reusing its name.
    pub id: u64,
    pub status: TaskStatus,
    pub cancellation_token: CancellationToken,
    pub handle: Option<JoinHandle<()>>,
}

impl TaskEntry {
    pub fn cancel(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.cancellation_token.cancel();
    }
}
