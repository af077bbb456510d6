//! Named long-lived task scheduler.
//!
//! The scheduler owns the registry of running jobs (crawler, cache updater, log retention),
//! rejects duplicate names and cancels jobs cooperatively through per-task tokens.

mod queue;
mod service;
mod task;

pub use queue::{WorkItem, WorkQueue};
pub use service::{Scheduler, SchedulerConfig, ShutdownReport};
pub use task::{TaskContext, TaskStatus};
