//! Row buffering between normalization and the store

use crate::ingestion::types::{CanonicalRow, PingRow, Table, TraceHopRow, TraceSummaryRow};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Per-table row buffers with a shared capacity.
/// Appending never flushes; the caller polls `should_flush` and clears each table once written.
#[derive(Debug)]
pub struct BatchAccumulator {
    capacity: usize,
    pings: Vec<PingRow>,
    summaries: Vec<TraceSummaryRow>,
    hops: Vec<TraceHopRow>,
}

impl BatchAccumulator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            pings: Vec::new(),
            summaries: Vec::new(),
            hops: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append to the buffer of the row's own table, preserving order
    pub fn append(&mut self, row: CanonicalRow) {
        match row {
            CanonicalRow::Ping(row) => self.pings.push(row),
            CanonicalRow::TraceSummary(row) => self.summaries.push(row),
            CanonicalRow::TraceHop(row) => self.hops.push(row),
        }
    }

    /// True once the total across all tables reaches capacity
    pub fn should_flush(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.pings.len() + self.summaries.len() + self.hops.len()
    }

    pub fn len_of(&self, table: Table) -> usize {
        match table {
            Table::Ping => self.pings.len(),
            Table::TraceSummary => self.summaries.len(),
            Table::TraceHop => self.hops.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pings(&self) -> &[PingRow] {
        &self.pings
    }

    pub fn trace_summaries(&self) -> &[TraceSummaryRow] {
        &self.summaries
    }

    pub fn trace_hops(&self) -> &[TraceHopRow] {
        &self.hops
    }

    pub fn clear(&mut self, table: Table) {
        match table {
            Table::Ping => self.pings.clear(),
            Table::TraceSummary => self.summaries.clear(),
            Table::TraceHop => self.hops.clear(),
        }
    }
}

impl Default for BatchAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}
