//! External market-data sources.

mod fxcm;
pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;
use crate::domain::{Candle, Instrument};

pub use fxcm::{FxcmRestSource, SourceConfig, period_seconds};

/// A source of historical candles.
///
/// An empty vector means the source has nothing for the range. Transport and parse
/// problems are errors.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch_candles(
        &self,
        instrument: &Instrument,
        period: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;
}
