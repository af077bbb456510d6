//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("A task named '{0}' is already scheduled")]
    DuplicateTask(String),

    #[error("No task named '{0}' is scheduled")]
    UnknownTask(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Crawler stopped: {0}")]
    CrawlerFatal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn source_error(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether the error came from the external source or the storage layer.
    ///
    /// These are the failures a crawl round recovers from by leaving the checkpoint alone.
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            Error::DatabaseSqlx(_)
                | Error::Http(_)
                | Error::Serialization(_)
                | Error::Io(_)
                | Error::Timeout(_)
                | Error::Source(_)
                | Error::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_display() {
        let dup = Error::DuplicateTask("fx-crawler".to_string());
        assert_eq!(dup.to_string(), "A task named 'fx-crawler' is already scheduled");

        let unknown = Error::UnknownTask("fx-crawler".to_string());
        assert_eq!(unknown.to_string(), "No task named 'fx-crawler' is scheduled");
    }

    #[test]
    fn test_io_failure_classification() {
        assert!(Error::source_error("timeout").is_io_failure());
        assert!(Error::storage("locked").is_io_failure());
        assert!(Error::Timeout("fetch".into()).is_io_failure());
        assert!(!Error::WorkerPool("closed".into()).is_io_failure());
        assert!(!Error::DuplicateTask("x".into()).is_io_failure());
    }
}
