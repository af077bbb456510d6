//! SQLite-backed store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::CandleStore;
use crate::Result;
use crate::database::retry::retry_on_busy;
use crate::database::time::{datetime_to_ms, ms_to_datetime, now_ms};
use crate::database::{self, DbPool};
use crate::domain::{Candle, Dataset, Instrument};

/// Store that persists checkpoints and candles in SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open a pool for `database_url` and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = database::init_pool(database_url).await?;
        database::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn row_to_candle(row: &SqliteRow) -> std::result::Result<Candle, sqlx::Error> {
    Ok(Candle {
        timestamp: ms_to_datetime(row.try_get("ts_ms")?),
        bid_open: row.try_get("bid_open")?,
        bid_high: row.try_get("bid_high")?,
        bid_low: row.try_get("bid_low")?,
        bid_close: row.try_get("bid_close")?,
        ask_open: row.try_get("ask_open")?,
        ask_high: row.try_get("ask_high")?,
        ask_low: row.try_get("ask_low")?,
        ask_close: row.try_get("ask_close")?,
        tick_count: row.try_get("tick_count")?,
    })
}

#[async_trait]
impl CandleStore for SqliteStore {
    async fn get_checkpoint(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let ts: Option<i64> = sqlx::query_scalar("SELECT ts_ms FROM checkpoints WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ts.map(ms_to_datetime))
    }

    async fn set_checkpoint(&self, key: &str, timestamp: DateTime<Utc>) -> Result<()> {
        let ts_ms = datetime_to_ms(timestamp);
        retry_on_busy("set_checkpoint", || async {
            sqlx::query(
                r#"
                INSERT INTO checkpoints (key, ts_ms, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    ts_ms = excluded.ts_ms,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(ts_ms)
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn advance_checkpoint(&self, key: &str, timestamp: DateTime<Utc>) -> Result<bool> {
        let ts_ms = datetime_to_ms(timestamp);
        retry_on_busy("advance_checkpoint", || async {
            let result = sqlx::query(
                r#"
                INSERT INTO checkpoints (key, ts_ms, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    ts_ms = excluded.ts_ms,
                    updated_at = excluded.updated_at
                WHERE excluded.ts_ms > checkpoints.ts_ms
                "#,
            )
            .bind(key)
            .bind(ts_ms)
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn get_range(
        &self,
        dataset: Dataset,
        instrument: &Instrument,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT ts_ms, bid_open, bid_high, bid_low, bid_close,
                   ask_open, ask_high, ask_low, ask_close, tick_count
            FROM candles
            WHERE dataset = ? AND instrument = ? AND ts_ms >= ? AND ts_ms <= ?
            ORDER BY ts_ms ASC
            "#,
        )
        .bind(dataset.as_str())
        .bind(instrument.symbol())
        .bind(datetime_to_ms(from))
        .bind(datetime_to_ms(to))
        .fetch_all(&self.pool)
        .await?;

        let candles = rows
            .iter()
            .map(row_to_candle)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(candles)
    }

    async fn put_rows(
        &self,
        dataset: Dataset,
        instrument: &Instrument,
        rows: &[Candle],
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let symbol = instrument.symbol();

        retry_on_busy("put_rows", || async {
            let mut tx = self.pool.begin().await?;
            for candle in rows {
                sqlx::query(
                    r#"
                    INSERT INTO candles (
                        dataset, instrument, ts_ms,
                        bid_open, bid_high, bid_low, bid_close,
                        ask_open, ask_high, ask_low, ask_close, tick_count
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(dataset, instrument, ts_ms) DO UPDATE SET
                        bid_open = excluded.bid_open,
                        bid_high = excluded.bid_high,
                        bid_low = excluded.bid_low,
                        bid_close = excluded.bid_close,
                        ask_open = excluded.ask_open,
                        ask_high = excluded.ask_high,
                        ask_low = excluded.ask_low,
                        ask_close = excluded.ask_close,
                        tick_count = excluded.tick_count
                    "#,
                )
                .bind(dataset.as_str())
                .bind(&symbol)
                .bind(datetime_to_ms(candle.timestamp))
                .bind(candle.bid_open)
                .bind(candle.bid_high)
                .bind(candle.bid_low)
                .bind(candle.bid_close)
                .bind(candle.ask_open)
                .bind(candle.ask_high)
                .bind(candle.ask_low)
                .bind(candle.ask_close)
                .bind(candle.tick_count)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn get_domain(
        &self,
        dataset: Dataset,
        instrument: &Instrument,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let row: (Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT MIN(ts_ms), MAX(ts_ms) FROM candles WHERE dataset = ? AND instrument = ?",
        )
        .bind(dataset.as_str())
        .bind(instrument.symbol())
        .fetch_one(&self.pool)
        .await?;

        Ok(match row {
            (Some(min), Some(max)) => Some((ms_to_datetime(min), ms_to_datetime(max))),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_candle;
    use chrono::TimeZone;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_checkpoint_upsert() {
        let store = memory_store().await;
        let t0 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 5, 0).unwrap();

        assert!(store.get_checkpoint("crawler-checkpoint-EURUSD").await.unwrap().is_none());
        store.set_checkpoint("crawler-checkpoint-EURUSD", t0).await.unwrap();
        store.set_checkpoint("crawler-checkpoint-EURUSD", t1).await.unwrap();

        assert_eq!(
            store.get_checkpoint("crawler-checkpoint-EURUSD").await.unwrap(),
            Some(t1)
        );
    }

    #[tokio::test]
    async fn test_advance_checkpoint_never_regresses() {
        let store = memory_store().await;
        let key = "crawler-checkpoint-USDJPY";
        let t0 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 5, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 10, 0).unwrap();

        assert!(store.advance_checkpoint(key, t1).await.unwrap());
        assert!(store.advance_checkpoint(key, t2).await.unwrap());
        assert!(!store.advance_checkpoint(key, t1).await.unwrap());
        assert!(!store.advance_checkpoint(key, t2).await.unwrap());
        assert!(!store.advance_checkpoint(key, t0).await.unwrap());

        assert_eq!(store.get_checkpoint(key).await.unwrap(), Some(t2));
    }

    #[tokio::test]
    async fn test_empty_domain_is_none() {
        let store = memory_store().await;
        let domain = store
            .get_domain(Dataset::Raw, &Instrument::new("EUR/USD"))
            .await
            .unwrap();
        assert!(domain.is_none());
    }

    #[tokio::test]
    async fn test_put_rows_upserts() {
        let store = memory_store().await;
        let eurjpy = Instrument::new("EUR/JPY");
        let t0 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();

        store
            .put_rows(Dataset::Raw, &eurjpy, &[test_candle(t0, 120.0)])
            .await
            .unwrap();
        store
            .put_rows(Dataset::Raw, &eurjpy, &[test_candle(t0, 121.0)])
            .await
            .unwrap();

        let rows = store.get_range(Dataset::Raw, &eurjpy, t0, t0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bid_close, 121.0);
    }
}
