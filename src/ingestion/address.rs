//! Address canonicalization
//!
//! Every address column holds one textual form: IPv6, with IPv4 rewritten into the
//! IPv4-mapped range (`::ffff:a.b.c.d`). Joins on address columns then work across families.

use crate::ingestion::types::RawAddress;
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

/// Canonicalize a raw address. Unparseable or missing input yields `None`, never an error.
pub fn normalize_address(addr: Option<&RawAddress>) -> Option<String> {
    let ip = match addr? {
        RawAddress::Numeric(value) => IpAddr::V4(Ipv4Addr::from(*value)),
        RawAddress::Text(text) => match text.trim().parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => {
                debug!("Discarding unparseable address {:?}", text);
                return None;
            }
        },
    };

    let canonical = match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    };

    Some(canonical.to_string())
}
