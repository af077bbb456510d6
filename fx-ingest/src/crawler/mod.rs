//! Checkpoint-driven incremental crawler.

mod clock;
mod retry;
mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use retry::RetryConfig;
pub use service::{CrawlOutcome, CrawlerConfig, CrawlerState, IncrementalCrawler};
