//! Fixed-capacity rolling window with a cumulative cursor.
//!
//! Consumers address rows by their position in the stream of every row ever
//! appended, not by their index in the window. Position `p` is resident while
//! `cumulative_count - len <= p < cumulative_count`.

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::Candle;

/// Rows returned by [`RollingWindow::get_next`], one vector per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheSlice {
    pub date: Vec<DateTime<Utc>>,
    pub bid_close: Vec<f64>,
    pub ask_close: Vec<f64>,
    /// Rows between the requested position and the oldest resident row that
    /// were evicted before the caller asked for them.
    pub skipped: u64,
    /// Cursor to pass on the next call.
    pub next_position: u64,
}

impl CacheSlice {
    pub fn len(&self) -> usize {
        self.date.len()
    }

    pub fn is_empty(&self) -> bool {
        self.date.is_empty()
    }
}

/// Per-instrument window. The three field columns always have the same length
/// and are evicted together.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    date: VecDeque<DateTime<Utc>>,
    bid_close: VecDeque<f64>,
    ask_close: VecDeque<f64>,
    cumulative_count: u64,
    last_seen_checkpoint: Option<DateTime<Utc>>,
    /// Timestamps appended at or after `seen_floor`.
    seen: BTreeSet<DateTime<Utc>>,
    /// Rows older than this can no longer be told apart from ones already appended.
    seen_floor: Option<DateTime<Utc>>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            date: VecDeque::new(),
            bid_close: VecDeque::new(),
            ask_close: VecDeque::new(),
            cumulative_count: 0,
            last_seen_checkpoint: None,
            seen: BTreeSet::new(),
            seen_floor: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.date.len()
    }

    pub fn is_empty(&self) -> bool {
        self.date.is_empty()
    }

    /// Total rows ever appended.
    pub fn cumulative_count(&self) -> u64 {
        self.cumulative_count
    }

    pub fn last_seen_checkpoint(&self) -> Option<DateTime<Utc>> {
        self.last_seen_checkpoint
    }

    pub fn set_last_seen_checkpoint(&mut self, checkpoint: DateTime<Utc>) {
        self.last_seen_checkpoint = Some(checkpoint);
    }

    /// Stop remembering timestamps older than `floor`.
    ///
    /// Later appends drop rows older than `floor`, so the next read must not start
    /// before it.
    pub fn forget_before(&mut self, floor: DateTime<Utc>) {
        if self.seen_floor.is_some_and(|current| current >= floor) {
            return;
        }
        self.seen = self.seen.split_off(&floor);
        self.seen_floor = Some(floor);
    }

    /// Append rows in the order given, evicting the oldest rows beyond capacity.
    ///
    /// A row whose timestamp was already appended is skipped, so re-reading an
    /// overlapping range never appends it twice while a late row inside the
    /// overlap still gets through. Returns how many rows were appended.
    pub fn append(&mut self, rows: &[Candle]) -> usize {
        let mut appended = 0;
        for row in rows {
            if self.seen_floor.is_some_and(|floor| row.timestamp < floor) {
                continue;
            }
            if !self.seen.insert(row.timestamp) {
                continue;
            }
            if self.date.len() == self.capacity {
                self.date.pop_front();
                self.bid_close.pop_front();
                self.ask_close.pop_front();
            }
            self.date.push_back(row.timestamp);
            self.bid_close.push_back(row.bid_close);
            self.ask_close.push_back(row.ask_close);
            appended += 1;
        }
        self.cumulative_count += appended as u64;
        appended
    }

    /// Everything from cumulative position `start` onwards that is still resident.
    ///
    /// A cursor pointing at evicted rows is clamped to the oldest resident row and
    /// the loss is reported in [`CacheSlice::skipped`]. A cursor at or past the head
    /// returns an empty slice.
    pub fn get_next(&self, start: u64) -> CacheSlice {
        let count = self.cumulative_count;
        if start >= count {
            return CacheSlice {
                next_position: count,
                ..CacheSlice::default()
            };
        }

        let oldest_resident = count - self.date.len() as u64;
        let skipped = oldest_resident.saturating_sub(start);
        let offset = start.saturating_sub(oldest_resident) as usize;

        CacheSlice {
            date: self.date.range(offset..).copied().collect(),
            bid_close: self.bid_close.range(offset..).copied().collect(),
            ask_close: self.ask_close.range(offset..).copied().collect(),
            skipped,
            next_position: count,
        }
    }
}
