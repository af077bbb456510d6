//! In-process store backed by ordered maps.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::CandleStore;
use crate::Result;
use crate::domain::{Candle, Dataset, Instrument};

type SeriesKey = (Dataset, String);

/// Store that keeps everything in memory. Used for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    checkpoints: RwLock<HashMap<String, DateTime<Utc>>>,
    series: RwLock<HashMap<SeriesKey, BTreeMap<DateTime<Utc>, Candle>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows for an instrument.
    pub fn row_count(&self, dataset: Dataset, instrument: &Instrument) -> usize {
        self.series
            .read()
            .get(&(dataset, instrument.symbol()))
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl CandleStore for MemoryStore {
    async fn get_checkpoint(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.checkpoints.read().get(key).copied())
    }

    async fn set_checkpoint(&self, key: &str, timestamp: DateTime<Utc>) -> Result<()> {
        self.checkpoints.write().insert(key.to_string(), timestamp);
        Ok(())
    }

    async fn advance_checkpoint(&self, key: &str, timestamp: DateTime<Utc>) -> Result<bool> {
        let mut checkpoints = self.checkpoints.write();
        match checkpoints.get(key) {
            Some(current) if *current >= timestamp => Ok(false),
            _ => {
                checkpoints.insert(key.to_string(), timestamp);
                Ok(true)
            }
        }
    }

    async fn get_range(
        &self,
        dataset: Dataset,
        instrument: &Instrument,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        if from > to {
            return Ok(Vec::new());
        }
        let series = self.series.read();
        let rows = series
            .get(&(dataset, instrument.symbol()))
            .map(|rows| rows.range(from..=to).map(|(_, c)| c.clone()).collect())
            .unwrap_or_default();
        Ok(rows)
    }

    async fn put_rows(
        &self,
        dataset: Dataset,
        instrument: &Instrument,
        rows: &[Candle],
    ) -> Result<()> {
        let mut series = self.series.write();
        let entry = series.entry((dataset, instrument.symbol())).or_default();
        for row in rows {
            entry.insert(row.timestamp, row.clone());
        }
        Ok(())
    }

    async fn get_domain(
        &self,
        dataset: Dataset,
        instrument: &Instrument,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let series = self.series.read();
        let domain = series
            .get(&(dataset, instrument.symbol()))
            .and_then(|rows| {
                let first = rows.keys().next()?;
                let last = rows.keys().next_back()?;
                Some((*first, *last))
            });
        Ok(domain)
    }
}
