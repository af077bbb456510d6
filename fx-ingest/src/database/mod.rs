//! SQLite connection management for the candle store.
//!
//! Pools run in WAL mode so the cache can read while the crawler writes.

pub mod retry;
pub mod time;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Default connection pool size.
const DEFAULT_POOL_SIZE: u32 = 4;

/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// Default WAL auto-checkpoint threshold in pages.
const DEFAULT_WAL_AUTOCHECKPOINT_PAGES: i32 = 1000;

async fn apply_per_connection_pragmas(
    conn: &mut sqlx::SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "PRAGMA wal_autocheckpoint = {}",
        DEFAULT_WAL_AUTOCHECKPOINT_PAGES
    ))
    .execute(&mut *conn)
    .await?;

    sqlx::query("PRAGMA temp_store = MEMORY")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

async fn ensure_wal_mode(pool: &DbPool) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let row = sqlx::query("PRAGMA journal_mode")
        .fetch_one(&mut *conn)
        .await?;
    let mode: String = row.get(0);
    if mode != "wal" && mode != "memory" {
        tracing::warn!("journal_mode was '{}', expected 'wal'; re-setting", mode);
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Initialize a connection pool.
///
/// In-memory databases are private to one connection, so they always get a pool of one.
pub async fn init_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> Result<DbPool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .create_if_missing(true);

    let mut pool_options = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(30));
    let max_connections = if is_in_memory(database_url) {
        // Dropping the only connection drops the database.
        pool_options = pool_options
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        1
    } else {
        max_connections.max(1)
    };

    let pool = pool_options
        .max_connections(max_connections)
        .after_connect(|conn, _meta| {
            Box::pin(async move { apply_per_connection_pragmas(&mut *conn).await })
        })
        .connect_with(connect_options)
        .await?;

    ensure_wal_mode(&pool).await?;

    tracing::info!(max_connections, "Database pool initialized");

    Ok(pool)
}

/// Initialize a connection pool with the default size.
pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    init_pool_with_size(database_url, DEFAULT_POOL_SIZE).await
}

pub async fn run_migrations(pool: &DbPool) -> crate::Result<()> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}
