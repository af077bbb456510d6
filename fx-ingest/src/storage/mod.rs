//! Storage adapters for checkpoints and candle time series.
//!
//! The crawler and the cache only talk to [`CandleStore`]; the concrete backend
//! is picked at startup from the configured database URL.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;
use crate::domain::{Candle, Dataset, Instrument};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Checkpoint and time-series persistence.
///
/// Ranges are inclusive on both ends and returned in ascending timestamp order.
/// `put_rows` upserts by timestamp, so writing the same window twice is harmless.
#[async_trait]
pub trait CandleStore: Send + Sync {
    async fn get_checkpoint(&self, key: &str) -> Result<Option<DateTime<Utc>>>;

    async fn set_checkpoint(&self, key: &str, timestamp: DateTime<Utc>) -> Result<()>;

    /// Move the checkpoint to `timestamp` only if that is later than the stored value.
    ///
    /// The comparison and the write happen atomically. Returns whether the
    /// checkpoint moved.
    async fn advance_checkpoint(&self, key: &str, timestamp: DateTime<Utc>) -> Result<bool>;

    async fn get_range(
        &self,
        dataset: Dataset,
        instrument: &Instrument,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    async fn put_rows(&self, dataset: Dataset, instrument: &Instrument, rows: &[Candle])
    -> Result<()>;

    /// Earliest and latest stored timestamps, or `None` when nothing is stored.
    async fn get_domain(
        &self,
        dataset: Dataset,
        instrument: &Instrument,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>>;
}
