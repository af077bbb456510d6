//! FXCM REST candle source.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::CandleSource;
use super::http::build_client;
use crate::database::time::ms_to_datetime;
use crate::domain::{Candle, Instrument, normalize_candles};
use crate::{Error, Result};

/// Upper bound the candle endpoint accepts for `num`.
const MAX_CANDLES_PER_REQUEST: i64 = 10_000;

/// Connection settings for the REST source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    /// Instrument name (`EUR/USD`) to numeric offer id.
    pub offer_ids: BTreeMap<String, u32>,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        let offer_ids = [("EUR/USD", 1), ("USD/JPY", 2), ("GBP/USD", 3), ("EUR/JPY", 10)]
            .into_iter()
            .map(|(name, id)| (name.to_string(), id))
            .collect();
        Self {
            base_url: "https://api-demo.fxcm.com".to_string(),
            access_token: None,
            offer_ids,
            timeout_secs: 30,
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.base_url)
            .map_err(|e| Error::config(format!("invalid source base_url '{}': {e}", self.base_url)))?;
        match self.access_token.as_deref() {
            Some(token) if !token.trim().is_empty() => Ok(()),
            _ => Err(Error::config("source access_token is not set")),
        }
    }
}

/// Length of one candle for an FXCM period code, in seconds.
pub fn period_seconds(period: &str) -> Option<i64> {
    let secs = match period {
        "m1" => 60,
        "m5" => 5 * 60,
        "m15" => 15 * 60,
        "m30" => 30 * 60,
        "H1" => 3600,
        "H2" => 2 * 3600,
        "H3" => 3 * 3600,
        "H4" => 4 * 3600,
        "H6" => 6 * 3600,
        "H8" => 8 * 3600,
        "D1" => 86_400,
        "W1" => 7 * 86_400,
        "M1" => 31 * 86_400,
        _ => return None,
    };
    Some(secs)
}

#[derive(Debug, Deserialize)]
struct ResponseStatus {
    executed: bool,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    response: ResponseStatus,
    #[serde(default)]
    candles: Vec<[f64; 10]>,
}

/// Parse a candle endpoint body. Each row is
/// `[ts, bidopen, bidclose, bidhigh, bidlow, askopen, askclose, askhigh, asklow, tickqty]`
/// with `ts` in Unix seconds.
fn parse_candles(body: &str) -> Result<Vec<Candle>> {
    let parsed: CandlesResponse = serde_json::from_str(body)?;
    if !parsed.response.executed {
        return Err(Error::source_error(format!(
            "candle request rejected: {}",
            parsed.response.error
        )));
    }

    let candles = parsed
        .candles
        .into_iter()
        .map(|row| Candle {
            timestamp: ms_to_datetime((row[0] * 1000.0) as i64),
            bid_open: row[1],
            bid_close: row[2],
            bid_high: row[3],
            bid_low: row[4],
            ask_open: row[5],
            ask_close: row[6],
            ask_high: row[7],
            ask_low: row[8],
            tick_count: row[9] as i64,
        })
        .collect();
    Ok(normalize_candles(candles))
}

/// Candle source backed by the FXCM REST API.
pub struct FxcmRestSource {
    client: reqwest::Client,
    base_url: Url,
    access_token: String,
    offer_ids: BTreeMap<String, u32>,
}

impl FxcmRestSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        config.validate()?;
        let client = build_client(Duration::from_secs(config.timeout_secs))?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::config(format!("invalid source base_url: {e}")))?;
        Ok(Self {
            client,
            base_url,
            access_token: config.access_token.clone().unwrap_or_default(),
            offer_ids: config.offer_ids.clone(),
        })
    }

    fn candles_url(
        &self,
        instrument: &Instrument,
        period: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Url> {
        let offer_id = self.offer_ids.get(instrument.as_str()).ok_or_else(|| {
            Error::config(format!("no offer id configured for {instrument}"))
        })?;

        let mut url = self
            .base_url
            .join(&format!("candles/{offer_id}/{period}"))
            .map_err(|e| Error::config(format!("invalid candle url: {e}")))?;

        let span = (to - from).num_seconds().max(0);
        let num = period_seconds(period)
            .map(|secs| span / secs + 1)
            .unwrap_or(MAX_CANDLES_PER_REQUEST)
            .clamp(1, MAX_CANDLES_PER_REQUEST);

        url.query_pairs_mut()
            .append_pair("num", &num.to_string())
            .append_pair("from", &from.timestamp().to_string())
            .append_pair("to", &to.timestamp().to_string());
        Ok(url)
    }
}

#[async_trait]
impl CandleSource for FxcmRestSource {
    async fn fetch_candles(
        &self,
        instrument: &Instrument,
        period: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let url = self.candles_url(instrument, period, from, to)?;
        debug!(%instrument, %url, "Requesting candles");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::source_error(format!(
                "candle request for {instrument} failed with status {status}"
            )));
        }

        parse_candles(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_config() -> SourceConfig {
        SourceConfig {
            access_token: Some("token".to_string()),
            ..SourceConfig::default()
        }
    }

    #[test]
    fn test_parse_candles_maps_columns() {
        let body = r#"{
            "response": {"executed": true},
            "instrument_id": "1",
            "period_id": "m1",
            "candles": [
                [1577836860, 1.1201, 1.1203, 1.1205, 1.1200, 1.1202, 1.1204, 1.1206, 1.1201, 42],
                [1577836800, 1.1190, 1.1201, 1.1202, 1.1189, 1.1191, 1.1202, 1.1203, 1.1190, 17]
            ]
        }"#;

        let candles = parse_candles(body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, Utc.timestamp_opt(1_577_836_800, 0).unwrap());
        assert_eq!(candles[1].bid_open, 1.1201);
        assert_eq!(candles[1].bid_close, 1.1203);
        assert_eq!(candles[1].bid_high, 1.1205);
        assert_eq!(candles[1].ask_close, 1.1204);
        assert_eq!(candles[1].ask_low, 1.1201);
        assert_eq!(candles[1].tick_count, 42);
    }

    #[test]
    fn test_parse_rejected_response() {
        let body = r#"{"response": {"executed": false, "error": "Unauthorized"}}"#;
        let err = parse_candles(body).unwrap_err();
        assert!(matches!(err, Error::Source(_)));
        assert!(err.to_string().contains("Unauthorized"));
    }

    #[test]
    fn test_parse_empty_candles() {
        let body = r#"{"response": {"executed": true}, "candles": []}"#;
        assert!(parse_candles(body).unwrap().is_empty());
    }

    #[test]
    fn test_candles_url() {
        let source = FxcmRestSource::new(&test_config()).unwrap();
        let from = Utc.timestamp_opt(1_577_836_800, 0).unwrap();
        let to = from + chrono::Duration::seconds(300);

        let url = source
            .candles_url(&Instrument::new("EUR/USD"), "m1", from, to)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api-demo.fxcm.com/candles/1/m1?num=6&from=1577836800&to=1577837100"
        );
    }

    #[test]
    fn test_unknown_offer_id() {
        let source = FxcmRestSource::new(&test_config()).unwrap();
        let now = Utc::now();
        assert!(
            source
                .candles_url(&Instrument::new("XAU/USD"), "m1", now, now)
                .is_err()
        );
    }

    #[test]
    fn test_validate_requires_token() {
        assert!(SourceConfig::default().validate().is_err());
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_period_seconds() {
        assert_eq!(period_seconds("m1"), Some(60));
        assert_eq!(period_seconds("H4"), Some(14_400));
        assert_eq!(period_seconds("x9"), None);
    }
}
