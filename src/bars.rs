use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single daily OHLCV observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Ordered bar history for one symbol.
///
/// Timestamps are strictly increasing. The only mutation is appending bars
/// newer than the current tail, so an overlapping re-fetch of history can
/// never duplicate or reorder entries.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new() -> Self {
        Self { bars: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn get(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|bar| bar.timestamp)
    }

    /// Append fetched bars that are newer than the current tail, preserving
    /// order. Bars at or before the tail timestamp are dropped. Returns the
    /// number of bars actually appended.
    pub fn append_newer(&mut self, fetched: impl IntoIterator<Item = Bar>) -> usize {
        let mut appended = 0;
        for bar in fetched {
            let newer = self
                .bars
                .last()
                .is_none_or(|tail| bar.timestamp > tail.timestamp);
            if newer {
                self.bars.push(bar);
                appended += 1;
            }
        }
        appended
    }
}
