//! Instrument and dataset identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// A currency pair as the source names it, e.g. `EUR/USD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instrument(String);

impl Instrument {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_string())
    }

    /// The name as given, e.g. `EUR/USD`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage-safe symbol with separators removed, e.g. `EURUSD`.
    pub fn symbol(&self) -> String {
        self.0.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
    }

    /// Key of the crawler checkpoint for this instrument.
    pub fn checkpoint_key(&self) -> String {
        format!("crawler-checkpoint-{}", self.symbol())
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Instrument {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Logical bucket a time series lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    /// Candles exactly as fetched.
    Raw,
    /// Cleaned candles.
    Clean,
    /// Model outputs.
    Policy,
    /// Bookkeeping values.
    Meta,
}

impl Dataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Raw => "raw",
            Dataset::Clean => "clean",
            Dataset::Policy => "policy",
            Dataset::Meta => "meta",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dataset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Dataset::Raw),
            "clean" => Ok(Dataset::Clean),
            "policy" => Ok(Dataset::Policy),
            "meta" => Ok(Dataset::Meta),
            other => Err(Error::config(format!("unknown dataset: {other}"))),
        }
    }
}
