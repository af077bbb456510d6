//! Backoff between empty-result fetch attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for retry backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter to delays.
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// No waiting between attempts.
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            use_jitter: false,
        }
    }

    /// Delay before retry number `attempt`. Attempt 0 is the first try and never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay_ms as f64
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);

        let delay_ms = base_delay.min(self.max_delay_ms as f64) as u64;

        let final_delay = if self.use_jitter {
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms + jitter
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }
}
