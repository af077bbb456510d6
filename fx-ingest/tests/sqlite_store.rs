//! Integration tests for the SQLite store against an on-disk database.

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use fx_ingest::domain::{Candle, Dataset, Instrument};
use fx_ingest::storage::{CandleStore, SqliteStore};

fn t(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn candle(timestamp: DateTime<Utc>, bid_close: f64, tick_count: i64) -> Candle {
    Candle {
        timestamp,
        bid_open: bid_close - 0.0001,
        bid_high: bid_close + 0.0004,
        bid_low: bid_close - 0.0003,
        bid_close,
        ask_open: bid_close + 0.0001,
        ask_high: bid_close + 0.0006,
        ask_low: bid_close - 0.0001,
        ask_close: bid_close + 0.0002,
        tick_count,
    }
}

async fn setup_store() -> (TempDir, String, SqliteStore) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("fx.db").display());
    let store = SqliteStore::connect(&url)
        .await
        .expect("Failed to open test database");
    (dir, url, store)
}

mod sqlite_store_tests {
    use super::*;

    #[tokio::test]
    async fn test_rows_round_trip_in_timestamp_order() {
        let (_dir, _url, store) = setup_store().await;
        let eurusd = Instrument::new("EUR/USD");

        let rows = vec![
            candle(t(2), 1.1234, 40),
            candle(t(0), 1.1230, 12),
            candle(t(1), 1.1232, 0),
        ];
        store
            .put_rows(Dataset::Raw, &eurusd, &rows)
            .await
            .expect("Failed to store rows");

        let stored = store
            .get_range(Dataset::Raw, &eurusd, t(0), t(2))
            .await
            .expect("Failed to read rows");

        assert_eq!(stored, vec![rows[1].clone(), rows[2].clone(), rows[0].clone()]);
    }

    #[tokio::test]
    async fn test_rewrite_replaces_row() {
        let (_dir, _url, store) = setup_store().await;
        let usdjpy = Instrument::new("USD/JPY");

        store
            .put_rows(Dataset::Raw, &usdjpy, &[candle(t(0), 108.10, 5)])
            .await
            .unwrap();
        store
            .put_rows(Dataset::Raw, &usdjpy, &[candle(t(0), 108.25, 9)])
            .await
            .unwrap();

        let stored = store.get_range(Dataset::Raw, &usdjpy, t(0), t(0)).await.unwrap();
        assert_eq!(stored, vec![candle(t(0), 108.25, 9)]);
    }

    #[tokio::test]
    async fn test_datasets_and_instruments_are_isolated() {
        let (_dir, _url, store) = setup_store().await;
        let eurusd = Instrument::new("EUR/USD");
        let eurjpy = Instrument::new("EUR/JPY");

        store
            .put_rows(Dataset::Raw, &eurusd, &[candle(t(0), 1.1, 1)])
            .await
            .unwrap();
        store
            .put_rows(Dataset::Clean, &eurusd, &[candle(t(5), 1.2, 1)])
            .await
            .unwrap();

        let raw = store.get_range(Dataset::Raw, &eurusd, t(0), t(10)).await.unwrap();
        assert_eq!(raw.len(), 1);
        assert!(store.get_range(Dataset::Raw, &eurjpy, t(0), t(10)).await.unwrap().is_empty());

        assert_eq!(
            store.get_domain(Dataset::Clean, &eurusd).await.unwrap(),
            Some((t(5), t(5)))
        );
        assert!(store.get_domain(Dataset::Raw, &eurjpy).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_domain_spans_stored_rows() {
        let (_dir, _url, store) = setup_store().await;
        let eurusd = Instrument::new("EUR/USD");
        let rows: Vec<_> = (0..10).map(|m| candle(t(m), 1.1, 1)).collect();
        store.put_rows(Dataset::Raw, &eurusd, &rows).await.unwrap();

        assert_eq!(
            store.get_domain(Dataset::Raw, &eurusd).await.unwrap(),
            Some((t(0), t(9)))
        );
    }

    #[tokio::test]
    async fn test_checkpoint_survives_reopen() {
        let (_dir, url, store) = setup_store().await;
        let key = Instrument::new("EUR/USD").checkpoint_key();

        assert!(store.get_checkpoint(&key).await.unwrap().is_none());
        store.set_checkpoint(&key, t(5)).await.unwrap();
        store.set_checkpoint(&key, t(10)).await.unwrap();
        store.pool().close().await;

        let reopened = SqliteStore::connect(&url)
            .await
            .expect("Failed to reopen test database");
        assert_eq!(reopened.get_checkpoint(&key).await.unwrap(), Some(t(10)));
    }
}
