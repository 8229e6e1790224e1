//! Core data types for the ingestion pipeline
//! Pure data structures with no behavior

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

/// Stop reason that marks a traceroute as having reached its destination
pub const STOP_REASON_COMPLETED: &str = "completed";

/// Address as handed over by the decoder - text, a packed IPv4 integer, or nothing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawAddress {
    Numeric(u32),
    Text(String),
}

impl From<&str> for RawAddress {
    fn from(value: &str) -> Self {
        RawAddress::Text(value.to_string())
    }
}

/// Measurement objects produced by the probing daemon - tagged union
#[derive(Debug, Clone)]
pub enum RawMeasurement {
    Ping(Ping),
    Traceroute(Traceroute),
}

impl RawMeasurement {
    pub fn kind(&self) -> &'static str {
        match self {
            RawMeasurement::Ping(_) => "ping",
            RawMeasurement::Traceroute(_) => "trace",
        }
    }

    pub fn destination(&self) -> Option<&RawAddress> {
        match self {
            RawMeasurement::Ping(ping) => ping.dst.as_ref(),
            RawMeasurement::Traceroute(trace) => trace.dst.as_ref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ping {
    pub start: DateTime<Utc>,
    pub src: Option<RawAddress>,
    pub dst: Option<RawAddress>,
    pub rtt_avg: Option<Duration>,
    pub rtt_min: Option<Duration>,
    pub rtt_max: Option<Duration>,
    pub loss_count: u32,
    pub probe_count: u32,
    pub probe_size: u16,
}

#[derive(Debug, Clone)]
pub struct Traceroute {
    pub start: DateTime<Utc>,
    pub src: Option<RawAddress>,
    pub dst: Option<RawAddress>,
    pub hop_count: u16,
    pub stop_reason: String,
    /// Indexed by position; `None` marks a position with no response at all
    pub hops: Vec<Option<Hop>>,
}

#[derive(Debug, Clone)]
pub struct Hop {
    pub addr: Option<RawAddress>,
    pub rtt: Option<Duration>,
    pub probe_ttl: u8,
    pub icmp_type: u8,
    pub icmp_code: u8,
}

/// Destination tables in the analytics store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Ping,
    TraceSummary,
    TraceHop,
}

impl Table {
    /// Flush order: summaries before their hops
    pub const ALL: [Table; 3] = [Table::Ping, Table::TraceSummary, Table::TraceHop];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Ping => "ping_measurements",
            Table::TraceSummary => "traceroute_measurements",
            Table::TraceHop => "traceroute_hops",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Row for `ping_measurements`; latencies in milliseconds
#[derive(Debug, Clone, PartialEq)]
pub struct PingRow {
    pub timestamp: DateTime<Utc>,
    pub measurement_id: Uuid,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub rtt_avg: f64,
    pub rtt_min: Option<f64>,
    pub rtt_max: Option<f64>,
    pub packet_loss: f64, // 0.0-1.0
    pub probe_count: i32,
    pub probe_size: i32,
}

/// Row for `traceroute_measurements`
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSummaryRow {
    pub timestamp: DateTime<Utc>,
    pub measurement_id: Uuid,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub hop_count: i16,
    pub completed: bool,
}

/// Row for `traceroute_hops`
#[derive(Debug, Clone, PartialEq)]
pub struct TraceHopRow {
    pub timestamp: DateTime<Utc>,
    pub measurement_id: Uuid,
    pub source: Option<String>,
    pub destination: Option<String>,
    /// 1-based position in the original hop sequence
    pub hop_number: i16,
    pub hop_address: String,
    pub rtt: Option<f64>,
    pub probe_ttl: i16,
    pub icmp_type: i16,
    pub icmp_code: i16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalRow {
    Ping(PingRow),
    TraceSummary(TraceSummaryRow),
    TraceHop(TraceHopRow),
}

impl CanonicalRow {
    pub fn table(&self) -> Table {
        match self {
            CanonicalRow::Ping(_) => Table::Ping,
            CanonicalRow::TraceSummary(_) => Table::TraceSummary,
            CanonicalRow::TraceHop(_) => Table::TraceHop,
        }
    }
}

/// Lifecycle of one ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Reading,
    Flushing,
    Done,
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Reading => write!(f, "reading"),
            RunState::Flushing => write!(f, "flushing"),
            RunState::Done => write!(f, "done"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// Ingestion statistics for one stream
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub records_read: usize,
    pub records_normalized: usize,
    pub records_skipped: usize,
    pub records_dropped: usize,
    pub ping_rows: u64,
    pub trace_rows: u64,
    pub hop_rows: u64,
    pub flushes: usize,
    pub writes: usize,
}

impl IngestStats {
    pub fn record_inserted(&mut self, table: Table, count: u64) {
        match table {
            Table::Ping => self.ping_rows += count,
            Table::TraceSummary => self.trace_rows += count,
            Table::TraceHop => self.hop_rows += count,
        }
        self.writes += 1;
    }
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "records: {} read, {} normalized, {} skipped, {} dropped; rows: {} ping, {} trace, {} hops; {} flushes, {} writes",
            self.records_read,
            self.records_normalized,
            self.records_skipped,
            self.records_dropped,
            self.ping_rows,
            self.trace_rows,
            self.hop_rows,
            self.flushes,
            self.writes
        )
    }
}
