//! Bounded in-memory view of recently crawled candles for live consumers.

mod service;
mod window;

pub use service::{CacheConfig, RollingCache};
pub use window::{CacheSlice, RollingWindow};
