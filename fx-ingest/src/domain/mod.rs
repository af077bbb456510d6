//! Domain types shared by the crawler, the cache and the storage layer.

mod candle;
mod instrument;

pub use candle::{Candle, normalize_candles};
pub use instrument::{Dataset, Instrument};

#[cfg(test)]
pub(crate) use candle::test_candle;
