//! Retry helpers for SQLite lock contention.

use rand::random;
use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

const BUSY_MAX_RETRIES: u32 = 8;
const BUSY_BASE_DELAY_MS: u64 = 10;
const BUSY_MAX_DELAY_MS: u64 = 1000;

fn is_busy_error(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    let sqlx::Error::Database(db_err) = sqlx_err else {
        let msg = sqlx_err.to_string().to_ascii_lowercase();
        return msg.contains("database is locked") || msg.contains("database is busy");
    };

    // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
    let code = db_err.code().map(Cow::into_owned);
    if matches!(code.as_deref(), Some("5") | Some("6")) {
        return true;
    }

    let msg = db_err.message().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

/// Backoff before retry number `attempt` (zero-based): exponential, capped, plus up to 25% jitter.
fn busy_delay(attempt: u32) -> Duration {
    let exp_ms = BUSY_BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(16));
    let capped_ms = exp_ms.min(BUSY_MAX_DELAY_MS);
    let jitter_ms = random::<u64>() % (capped_ms / 4 + 1);
    Duration::from_millis((capped_ms + jitter_ms).min(BUSY_MAX_DELAY_MS))
}

/// Run `op`, retrying while SQLite reports the database as busy or locked.
pub async fn retry_on_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_busy_error(&err) && attempt < BUSY_MAX_RETRIES => {
                let delay = busy_delay(attempt);
                debug!(
                    op = op_name,
                    attempt = attempt + 1,
                    max = BUSY_MAX_RETRIES,
                    ?delay,
                    "SQLite busy, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_busy_delay_is_capped() {
        for attempt in 0..32 {
            assert!(busy_delay(attempt) <= Duration::from_millis(BUSY_MAX_DELAY_MS));
        }
        assert!(busy_delay(0) >= Duration::from_millis(BUSY_BASE_DELAY_MS));
    }

    #[tokio::test]
    async fn test_non_busy_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_on_busy("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::storage("disk full")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let value = retry_on_busy("test", || async { Ok::<_, Error>(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }
}
