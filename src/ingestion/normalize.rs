//! Normalize functions - transform raw measurements into canonical table rows

use crate::ingestion::address::normalize_address;
use crate::ingestion::error::NormalizeError;
use crate::ingestion::types::{
    CanonicalRow, Ping, PingRow, RawMeasurement, TraceHopRow, TraceSummaryRow, Traceroute,
    STOP_REASON_COMPLETED,
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::{NoContext, Timestamp, Uuid};

/// Map one measurement into zero or more rows.
/// An `Err` means the record is malformed and must be skipped as a whole.
pub fn normalize(measurement: &RawMeasurement) -> Result<Vec<CanonicalRow>, NormalizeError> {
    match measurement {
        RawMeasurement::Ping(ping) => {
            Ok(normalize_ping(ping)?.map(CanonicalRow::Ping).into_iter().collect())
        }
        RawMeasurement::Traceroute(trace) => normalize_traceroute(trace),
    }
}

/// Ping without any reply carries no latency signal and yields `None`
pub fn normalize_ping(ping: &Ping) -> Result<Option<PingRow>, NormalizeError> {
    let Some(rtt_avg) = ping.rtt_avg else {
        return Ok(None);
    };

    // With nothing sent, loss is 1.0 whatever the reported count
    if ping.probe_count > 0 && ping.loss_count > ping.probe_count {
        return Err(NormalizeError::LossExceedsProbes {
            loss: ping.loss_count,
            probes: ping.probe_count,
        });
    }

    Ok(Some(PingRow {
        timestamp: ping.start,
        measurement_id: measurement_id(ping.start)?,
        source: normalize_address(ping.src.as_ref()),
        destination: normalize_address(ping.dst.as_ref()),
        rtt_avg: to_millis(rtt_avg),
        rtt_min: ping.rtt_min.map(to_millis),
        rtt_max: ping.rtt_max.map(to_millis),
        packet_loss: packet_loss(ping.loss_count, ping.probe_count),
        probe_count: i32::try_from(ping.probe_count).map_err(|_| NormalizeError::OutOfRange {
            field: "probe_count",
            value: ping.probe_count as u64,
        })?,
        probe_size: ping.probe_size as i32,
    }))
}

/// One summary row, then one hop row per addressed hop.
/// Hop numbers keep their position in the original sequence, so unaddressed hops leave gaps.
pub fn normalize_traceroute(trace: &Traceroute) -> Result<Vec<CanonicalRow>, NormalizeError> {
    let measurement_id = measurement_id(trace.start)?;
    let source = normalize_address(trace.src.as_ref());
    let destination = normalize_address(trace.dst.as_ref());

    let hop_count = i16::try_from(trace.hop_count).map_err(|_| NormalizeError::OutOfRange {
        field: "hop_count",
        value: trace.hop_count as u64,
    })?;

    let mut rows = Vec::with_capacity(trace.hops.len() + 1);
    rows.push(CanonicalRow::TraceSummary(TraceSummaryRow {
        timestamp: trace.start,
        measurement_id,
        source: source.clone(),
        destination: destination.clone(),
        hop_count,
        completed: trace.stop_reason == STOP_REASON_COMPLETED,
    }));

    for (idx, hop) in trace.hops.iter().enumerate() {
        let Some(hop) = hop else {
            continue;
        };
        let Some(hop_address) = normalize_address(hop.addr.as_ref()) else {
            continue;
        };

        let position = idx + 1;
        let hop_number = i16::try_from(position).map_err(|_| NormalizeError::OutOfRange {
            field: "hop_number",
            value: position as u64,
        })?;

        rows.push(CanonicalRow::TraceHop(TraceHopRow {
            timestamp: trace.start,
            measurement_id,
            source: source.clone(),
            destination: destination.clone(),
            hop_number,
            hop_address,
            rtt: hop.rtt.map(to_millis),
            probe_ttl: hop.probe_ttl as i16,
            icmp_type: hop.icmp_type as i16,
            icmp_code: hop.icmp_code as i16,
        }));
    }

    Ok(rows)
}

/// Fraction of lost probes; a ping that sent nothing counts as total loss
pub fn packet_loss(loss_count: u32, probe_count: u32) -> f64 {
    if probe_count == 0 {
        return 1.0;
    }
    loss_count as f64 / probe_count as f64
}

fn to_millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Time-ordered id derived from the measurement start (UUIDv7)
fn measurement_id(start: DateTime<Utc>) -> Result<Uuid, NormalizeError> {
    let seconds =
        u64::try_from(start.timestamp()).map_err(|_| NormalizeError::StartBeforeEpoch(start))?;
    let ts = Timestamp::from_unix(NoContext, seconds, start.timestamp_subsec_nanos());
    Ok(Uuid::new_v7(ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::types::{Hop, RawAddress, Table};
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 18, 9, 30, 0).unwrap()
    }

    fn mock_ping() -> Ping {
        Ping {
            start: start(),
            src: Some(RawAddress::from("192.0.2.10")),
            dst: Some(RawAddress::from("8.8.8.8")),
            rtt_avg: Some(Duration::from_micros(12_500)),
            rtt_min: Some(Duration::from_micros(10_000)),
            rtt_max: Some(Duration::from_micros(15_250)),
            loss_count: 1,
            probe_count: 4,
            probe_size: 84,
        }
    }

    fn mock_hop(addr: Option<&str>, ttl: u8) -> Hop {
        Hop {
            addr: addr.map(RawAddress::from),
            rtt: Some(Duration::from_millis(ttl as u64 * 2)),
            probe_ttl: ttl,
            icmp_type: 11,
            icmp_code: 0,
        }
    }

    fn mock_trace(hops: Vec<Option<Hop>>) -> Traceroute {
        Traceroute {
            start: start(),
            src: Some(RawAddress::from("192.0.2.10")),
            dst: Some(RawAddress::from("1.1.1.1")),
            hop_count: hops.len() as u16,
            stop_reason: "completed".to_string(),
            hops,
        }
    }

    fn hop_rows(rows: &[CanonicalRow]) -> Vec<&TraceHopRow> {
        rows.iter()
            .filter_map(|row| match row {
                CanonicalRow::TraceHop(hop) => Some(hop),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_ping_without_avg_rtt_is_dropped() {
        let ping = Ping {
            rtt_avg: None,
            ..mock_ping()
        };

        let rows = normalize(&RawMeasurement::Ping(ping)).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_ping_row() {
        let row = normalize_ping(&mock_ping()).unwrap().unwrap();

        assert_eq!(row.timestamp, start());
        assert_eq!(row.source.as_deref(), Some("::ffff:192.0.2.10"));
        assert_eq!(row.destination.as_deref(), Some("::ffff:8.8.8.8"));
        assert!((row.rtt_avg - 12.5).abs() < 1e-9);
        assert!((row.rtt_min.unwrap() - 10.0).abs() < 1e-9);
        assert!((row.rtt_max.unwrap() - 15.25).abs() < 1e-9);
        assert!((row.packet_loss - 0.25).abs() < 1e-9);
        assert_eq!(row.probe_count, 4);
        assert_eq!(row.probe_size, 84);
    }

    #[test]
    fn test_ping_zero_probes_is_total_loss() {
        let ping = Ping {
            loss_count: 0,
            probe_count: 0,
            ..mock_ping()
        };

        let row = normalize_ping(&ping).unwrap().unwrap();
        assert_eq!(row.packet_loss, 1.0);
    }

    #[test]
    fn test_ping_zero_probes_with_reported_loss() {
        let ping = Ping {
            loss_count: 1,
            probe_count: 0,
            rtt_avg: Some(Duration::from_millis(5)),
            ..mock_ping()
        };

        let row = normalize_ping(&ping).unwrap().unwrap();
        assert_eq!(row.packet_loss, 1.0);
        assert_eq!(row.probe_count, 0);
    }

    #[test]
    fn test_ping_missing_min_max_stay_null() {
        let ping = Ping {
            rtt_min: None,
            rtt_max: None,
            ..mock_ping()
        };

        let row = normalize_ping(&ping).unwrap().unwrap();
        assert_eq!(row.rtt_min, None);
        assert_eq!(row.rtt_max, None);
    }

    #[test]
    fn test_ping_loss_exceeding_probes_is_rejected() {
        let ping = Ping {
            loss_count: 5,
            probe_count: 3,
            ..mock_ping()
        };

        assert_eq!(
            normalize_ping(&ping),
            Err(NormalizeError::LossExceedsProbes { loss: 5, probes: 3 })
        );
    }

    #[test]
    fn test_start_before_epoch_is_rejected() {
        let before = Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 59).unwrap();
        let ping = Ping {
            start: before,
            ..mock_ping()
        };

        assert_eq!(
            normalize_ping(&ping),
            Err(NormalizeError::StartBeforeEpoch(before))
        );
    }

    #[test]
    fn test_trace_skips_unaddressed_hops_without_renumbering() {
        let hops = vec![
            Some(mock_hop(Some("192.0.2.1"), 1)),
            Some(mock_hop(Some("198.51.100.1"), 2)),
            Some(mock_hop(None, 3)),
            Some(mock_hop(Some("203.0.113.7"), 4)),
            Some(mock_hop(Some("1.1.1.1"), 5)),
        ];

        let rows = normalize(&RawMeasurement::Traceroute(mock_trace(hops))).unwrap();
        let hops = hop_rows(&rows);

        assert_eq!(hops.len(), 4);
        let numbers: Vec<i16> = hops.iter().map(|h| h.hop_number).collect();
        assert_eq!(numbers, vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_trace_skips_missing_positions() {
        let hops = vec![
            Some(mock_hop(Some("192.0.2.1"), 1)),
            None,
            Some(mock_hop(Some("not-an-ip"), 3)),
            Some(mock_hop(Some("1.1.1.1"), 4)),
        ];

        let rows = normalize(&RawMeasurement::Traceroute(mock_trace(hops))).unwrap();
        let numbers: Vec<i16> = hop_rows(&rows).iter().map(|h| h.hop_number).collect();

        assert_eq!(numbers, vec![1, 4]);
    }

    #[test]
    fn test_trace_summary_and_hops_share_measurement_id() {
        let hops = vec![
            Some(mock_hop(Some("192.0.2.1"), 1)),
            Some(mock_hop(Some("1.1.1.1"), 2)),
        ];

        let rows = normalize(&RawMeasurement::Traceroute(mock_trace(hops))).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].table(), Table::TraceSummary);

        let CanonicalRow::TraceSummary(summary) = &rows[0] else {
            panic!("Expected summary row first");
        };
        assert_eq!(summary.hop_count, 2);
        assert!(summary.completed);
        assert_eq!(summary.destination.as_deref(), Some("::ffff:1.1.1.1"));

        for hop in hop_rows(&rows) {
            assert_eq!(hop.measurement_id, summary.measurement_id);
            assert_eq!(hop.destination, summary.destination);
        }
    }

    #[test]
    fn test_trace_hop_fields() {
        let rows =
            normalize_traceroute(&mock_trace(vec![Some(mock_hop(Some("192.0.2.1"), 3))])).unwrap();
        let hop = hop_rows(&rows)[0];

        assert_eq!(hop.hop_address, "::ffff:192.0.2.1");
        assert!((hop.rtt.unwrap() - 6.0).abs() < 1e-9);
        assert_eq!(hop.probe_ttl, 3);
        assert_eq!(hop.icmp_type, 11);
        assert_eq!(hop.icmp_code, 0);
    }

    #[test]
    fn test_trace_not_completed() {
        let trace = Traceroute {
            stop_reason: "gaplimit".to_string(),
            ..mock_trace(vec![])
        };

        let rows = normalize_traceroute(&trace).unwrap();
        assert_eq!(rows.len(), 1);
        match &rows[0] {
            CanonicalRow::TraceSummary(summary) => assert!(!summary.completed),
            other => panic!("Expected summary row, got {:?}", other),
        }
    }

    #[test]
    fn test_measurement_ids_are_distinct_within_one_second() {
        let a = normalize_ping(&mock_ping()).unwrap().unwrap();
        let b = normalize_ping(&mock_ping()).unwrap().unwrap();

        assert_ne!(a.measurement_id, b.measurement_id);
        assert_eq!(a.measurement_id.get_version_num(), 7);
    }

    #[test]
    fn test_packet_loss() {
        assert_eq!(packet_loss(0, 10), 0.0);
        assert_eq!(packet_loss(10, 10), 1.0);
        assert_eq!(packet_loss(0, 0), 1.0);
        assert!((packet_loss(1, 3) - 1.0 / 3.0).abs() < 1e-12);
    }
}
