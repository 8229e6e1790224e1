//! Source functions - read decoded measurement dumps (one JSON object per line)
//!
//! The binary record container is decoded by the probing toolkit's own converter; this module
//! only consumes its JSON-lines output. Record types other than ping and trace are skipped.

use crate::ingestion::error::SourceError;
use crate::ingestion::types::{Hop, Ping, RawAddress, RawMeasurement, Traceroute};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WireRecord {
    Ping(WirePing),
    Trace(WireTrace),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireStart {
    sec: i64,
    #[serde(default)]
    usec: u32,
}

#[derive(Debug, Deserialize)]
struct WirePing {
    src: Option<RawAddress>,
    dst: Option<RawAddress>,
    start: WireStart,
    #[serde(default)]
    ping_sent: u32,
    #[serde(default)]
    probe_size: u16,
    statistics: Option<WireStatistics>,
}

#[derive(Debug, Deserialize)]
struct WireStatistics {
    #[serde(default)]
    loss: u32,
    min: Option<f64>,
    max: Option<f64>,
    avg: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireTrace {
    src: Option<RawAddress>,
    dst: Option<RawAddress>,
    start: WireStart,
    #[serde(default)]
    hop_count: u16,
    #[serde(default)]
    stop_reason: String,
    #[serde(default)]
    hops: Vec<Option<WireHop>>,
}

#[derive(Debug, Deserialize)]
struct WireHop {
    addr: Option<RawAddress>,
    rtt: Option<f64>,
    #[serde(default)]
    probe_ttl: u8,
    #[serde(default)]
    icmp_type: u8,
    #[serde(default)]
    icmp_code: u8,
}

/// Decode one line. `Ok(None)` for record types that are not ingested.
pub fn decode_line(line: &str) -> Result<Option<RawMeasurement>, String> {
    let record: WireRecord = serde_json::from_str(line).map_err(|e| e.to_string())?;

    match record {
        WireRecord::Ping(ping) => Ok(Some(RawMeasurement::Ping(convert_ping(ping)?))),
        WireRecord::Trace(trace) => Ok(Some(RawMeasurement::Traceroute(convert_trace(trace)?))),
        WireRecord::Other => Ok(None),
    }
}

fn convert_ping(wire: WirePing) -> Result<Ping, String> {
    let (loss_count, rtt_min, rtt_max, rtt_avg) = match wire.statistics {
        Some(stats) => (
            stats.loss,
            stats.min.map(millis).transpose()?,
            stats.max.map(millis).transpose()?,
            stats.avg.map(millis).transpose()?,
        ),
        // No statistics block means no reply at all
        None => (wire.ping_sent, None, None, None),
    };

    Ok(Ping {
        start: start_time(&wire.start)?,
        src: wire.src,
        dst: wire.dst,
        rtt_avg,
        rtt_min,
        rtt_max,
        loss_count,
        probe_count: wire.ping_sent,
        probe_size: wire.probe_size,
    })
}

fn convert_trace(wire: WireTrace) -> Result<Traceroute, String> {
    let hops = position_hops(wire.hops)?;

    Ok(Traceroute {
        start: start_time(&wire.start)?,
        src: wire.src,
        dst: wire.dst,
        hop_count: wire.hop_count,
        stop_reason: wire.stop_reason.to_lowercase(),
        hops,
    })
}

/// Lay replies out by TTL: slot `probe_ttl - 1`, first reply per TTL wins, unanswered TTLs
/// stay `None`. Explicit `null` entries and replies without a TTL keep their array position.
fn position_hops(wire: Vec<Option<WireHop>>) -> Result<Vec<Option<Hop>>, String> {
    let mut hops: Vec<Option<Hop>> = Vec::with_capacity(wire.len());

    for (idx, entry) in wire.into_iter().enumerate() {
        let Some(entry) = entry else {
            if hops.len() <= idx {
                hops.resize_with(idx + 1, || None);
            }
            continue;
        };

        let hop = convert_hop(entry)?;
        let slot = match hop.probe_ttl {
            0 => idx,
            ttl => ttl as usize - 1,
        };

        if hops.len() <= slot {
            hops.resize_with(slot + 1, || None);
        }
        if hops[slot].is_none() {
            hops[slot] = Some(hop);
        }
    }

    Ok(hops)
}

fn convert_hop(wire: WireHop) -> Result<Hop, String> {
    Ok(Hop {
        addr: wire.addr,
        rtt: wire.rtt.map(millis).transpose()?,
        probe_ttl: wire.probe_ttl,
        icmp_type: wire.icmp_type,
        icmp_code: wire.icmp_code,
    })
}

fn start_time(start: &WireStart) -> Result<DateTime<Utc>, String> {
    if start.usec >= 1_000_000 {
        return Err(format!("invalid start usec {}", start.usec));
    }
    DateTime::from_timestamp(start.sec, start.usec * 1000)
        .ok_or_else(|| format!("start time {}s out of range", start.sec))
}

fn millis(value: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(value / 1000.0).map_err(|_| format!("invalid rtt {}ms", value))
}

/// Iterator over the measurements of one dump.
/// Malformed lines are yielded as recoverable errors; an I/O error ends the iteration.
pub struct MeasurementReader<R> {
    path: PathBuf,
    lines: Lines<R>,
    line: usize,
    failed: bool,
}

impl MeasurementReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufReader::new(file), path))
    }
}

impl<R: BufRead> MeasurementReader<R> {
    pub fn new(reader: R, path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lines: reader.lines(),
            line: 0,
            failed: false,
        }
    }
}

impl<R: BufRead> Iterator for MeasurementReader<R> {
    type Item = Result<RawMeasurement, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(source) => {
                    self.failed = true;
                    return Some(Err(SourceError::Io {
                        path: self.path.clone(),
                        source,
                    }));
                }
            };
            self.line += 1;

            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }

            match decode_line(trimmed) {
                Ok(Some(measurement)) => return Some(Ok(measurement)),
                Ok(None) => {
                    debug!("Skipping unsupported record type on line {}", self.line);
                }
                Err(reason) => {
                    return Some(Err(SourceError::Malformed {
                        line: self.line,
                        reason,
                    }))
                }
            }
        }
    }
}
