//! Candle records produced by the source and persisted by the crawler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One bid/ask candle, keyed by its opening timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub bid_open: f64,
    pub bid_high: f64,
    pub bid_low: f64,
    pub bid_close: f64,
    pub ask_open: f64,
    pub ask_high: f64,
    pub ask_low: f64,
    pub ask_close: f64,
    pub tick_count: i64,
}

impl Candle {
    /// Mid price of the closing quotes.
    pub fn mid_close(&self) -> f64 {
        (self.bid_close + self.ask_close) / 2.0
    }
}

/// Sort candles by timestamp and drop rows sharing a timestamp, keeping the last one seen.
pub fn normalize_candles(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.timestamp);
    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        match out.last_mut() {
            Some(last) if last.timestamp == candle.timestamp => *last = candle,
            _ => out.push(candle),
        }
    }
    out
}

#[cfg(test)]
pub(crate) fn test_candle(timestamp: DateTime<Utc>, bid_close: f64) -> Candle {
    Candle {
        timestamp,
        bid_open: bid_close,
        bid_high: bid_close,
        bid_low: bid_close,
        bid_close,
        ask_open: bid_close + 0.0002,
        ask_high: bid_close + 0.0002,
        ask_low: bid_close + 0.0002,
        ask_close: bid_close + 0.0002,
        tick_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_sorts_and_dedupes() {
        let t0 = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        let t1 = Utc.timestamp_opt(1_600_000_060, 0).unwrap();

        let rows = vec![test_candle(t1, 1.2), test_candle(t0, 1.1), test_candle(t1, 1.3)];
        let normalized = normalize_candles(rows);

        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].timestamp, t0);
        assert_eq!(normalized[1].bid_close, 1.3);
    }

    #[test]
    fn test_mid_close() {
        let t0 = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        let candle = test_candle(t0, 1.0);
        assert!((candle.mid_close() - 1.0001).abs() < 1e-9);
    }
}
