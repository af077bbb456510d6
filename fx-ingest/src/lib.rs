//! fx-ingest library crate.
//!
//! Incremental FX candle ingestion: a named task scheduler, a checkpoint-driven
//! crawler and a rolling in-memory cache for live consumers.

pub mod cache;
pub mod config;
pub mod crawler;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod services;
pub mod source;
pub mod storage;
pub mod worker;

pub use error::{Error, Result};
