//! Logging setup with a reloadable filter and log file retention.
//!
//! This module provides:
//! - Runtime log level changes via `tracing_subscriber::reload`
//! - Daily rolling log files written through a non-blocking appender
//! - Log file retention cleanup, run as a scheduled task
//! - Local timezone timestamps for logs

use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::Result;
use crate::scheduler::Scheduler;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "fx_ingest=info,sqlx=warn";

/// Scheduler task name of the retention job.
pub const RETENTION_TASK_NAME: &str = "log-retention";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

const LOG_FILE_PREFIX: &str = "fx-ingest.log";

/// Timer that formats timestamps in the local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Handle to the installed subscriber.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: PathBuf,
}

impl LoggingConfig {
    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Replace the filter directive, e.g. `fx_ingest=debug,sqlx=warn`.
    pub fn set_filter(&self, directive: &str) -> Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::Other(format!("Invalid filter directive: {}", e)))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| crate::Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Schedule the daily retention job on `scheduler`.
    pub fn start_retention_cleanup(&self, scheduler: &Scheduler) -> Result<()> {
        let log_dir = self.log_dir.clone();

        scheduler.schedule(RETENTION_TASK_NAME, move |ctx| async move {
            let cleanup_interval = Duration::from_secs(24 * 60 * 60);

            loop {
                if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                    warn!(error = %e, "Failed to cleanup old logs");
                }
                if !ctx.sleep(cleanup_interval).await {
                    debug!("Log retention cleanup task shutting down");
                    break;
                }
            }
            Ok(())
        })
    }
}

/// Delete rolled log files older than `retention_days`.
///
/// Returns the number of files deleted.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();
    let prefix = format!("{LOG_FILE_PREFIX}.");

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        // Rolled files are named fx-ingest.log.YYYY-MM-DD
        let Some(date_str) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(&prefix))
        else {
            continue;
        };

        let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };

        if file_date < cutoff {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to delete old log file");
            } else {
                deleted_count += 1;
                debug!(path = %path.display(), "Deleted old log file");
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}

/// Pick the starting filter: explicit directive, then `RUST_LOG`, then the default.
fn initial_filter(directive: Option<&str>) -> EnvFilter {
    if let Some(directive) = directive {
        match EnvFilter::try_new(directive) {
            Ok(filter) => return filter,
            Err(e) => eprintln!("Ignoring invalid log filter '{directive}': {e}"),
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the lifetime of the process or buffered
/// file output is lost.
pub fn init_logging(
    log_dir: &str,
    directive: Option<&str>,
) -> Result<(Arc<LoggingConfig>, WorkerGuard)> {
    let log_path = PathBuf::from(log_dir);
    std::fs::create_dir_all(&log_path)?;

    let file_appender = tracing_appender::rolling::daily(&log_path, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter(directive));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    let config = Arc::new(LoggingConfig {
        handle: filter_handle,
        log_dir: log_path,
    });

    Ok((config, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("fx_ingest=info"));
        assert!(DEFAULT_LOG_FILTER.contains("sqlx=warn"));
    }

    #[test]
    fn test_explicit_filter_wins() {
        let filter = initial_filter(Some("fx_ingest=debug"));
        assert_eq!(filter.to_string(), "fx_ingest=debug");
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_old_rolled_files() {
        let dir = tempfile::tempdir().unwrap();
        let old = (Utc::now() - chrono::Duration::days(30)).format("%Y-%m-%d");
        let recent = Utc::now().format("%Y-%m-%d");

        let old_file = dir.path().join(format!("fx-ingest.log.{old}"));
        let recent_file = dir.path().join(format!("fx-ingest.log.{recent}"));
        let unrelated = dir.path().join(format!("other.log.{old}"));
        for path in [&old_file, &recent_file, &unrelated] {
            std::fs::write(path, "line\n").unwrap();
        }

        let deleted = cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(!old_file.exists());
        assert!(recent_file.exists());
        assert!(unrelated.exists());
    }
}
