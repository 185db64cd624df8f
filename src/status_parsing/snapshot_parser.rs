//! Status snapshot parser.
//!
//! The VPN server periodically rewrites a line-oriented text file listing
//! every connected client, followed by the routing table that maps tunnel
//! addresses to common names:
//!
//! ```text
//! OpenVPN CLIENT LIST
//! Updated,2024-01-01 12:10:00
//! Common Name,Real Address,Bytes Received,Bytes Sent,Connected Since
//! client1,[2001:db8::1]:443,1024,2048,2024-01-01 12:00:00
//! ROUTING TABLE
//! Virtual Address,Common Name,Real Address,Last Ref
//! 10.8.0.2,client1,[2001:db8::1]:443,2024-01-01 12:09:58
//! GLOBAL STATS
//! Max bcast/mcast queue length,0
//! END
//! ```
//!
//! Rows are parsed independently: a bad row is reported as a [`LineFault`]
//! and skipped, the rest of the snapshot is still used.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use log::warn;

use super::address::resolve_real_address;
use super::types::{ClientSnapshotRecord, LineFault, ParsedSnapshot, RoutingEntry};
use crate::clock::{format_duration, parse_timestamp};
use crate::error_handling::types::ParseError;

pub const CLIENT_LIST_HEADER: &str =
    "Common Name,Real Address,Bytes Received,Bytes Sent,Connected Since";
pub const ROUTING_TABLE_HEADER: &str = "ROUTING TABLE";
pub const GLOBAL_STATS_HEADER: &str = "GLOBAL STATS";
const ROUTING_COLUMN_HEADER: &str = "Virtual Address";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Clients,
    Routing,
}

/// Parses a full snapshot. `now` is the cycle's wall time, used to derive
/// each client's `time_online`.
pub fn parse_snapshot(text: &str, now: NaiveDateTime) -> ParsedSnapshot {
    let mut section: Option<Section> = None;
    let mut clients = Vec::new();
    let mut routing: HashMap<String, RoutingEntry> = HashMap::new();
    let mut faults = Vec::new();

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();

        if raw_line.starts_with(CLIENT_LIST_HEADER) {
            section = Some(Section::Clients);
            continue;
        }
        if raw_line.starts_with(ROUTING_TABLE_HEADER) {
            section = Some(Section::Routing);
            continue;
        }
        if raw_line.starts_with(GLOBAL_STATS_HEADER) || line.is_empty() {
            section = None;
            continue;
        }

        match section {
            Some(Section::Clients) => match parse_client_row(line, now) {
                Ok(record) => clients.push(record),
                Err(reason) => {
                    warn!("Skipping client row at line {}: {}", index + 1, reason);
                    faults.push(LineFault {
                        line_number: index + 1,
                        common_name: row_common_name(line),
                        reason,
                    });
                }
            },
            Some(Section::Routing) => {
                let parts: Vec<&str> = line.split(',').collect();
                if parts.len() < 2 || parts[0].trim() == ROUTING_COLUMN_HEADER {
                    continue;
                }
                routing
                    .entry(parts[1].trim().to_string())
                    .or_default()
                    .assign(parts[0]);
            }
            None => {}
        }
    }

    for record in clients.iter_mut() {
        if let Some(entry) = routing.get(&record.common_name) {
            record.vpn_ipv4 = entry.ipv4.clone().unwrap_or_default();
            record.vpn_ipv6 = entry.ipv6.clone().unwrap_or_default();
            record.vpn_ip = entry.preferred().to_string();
        }
    }

    ParsedSnapshot {
        clients,
        routing,
        faults,
    }
}

fn parse_client_row(line: &str, now: NaiveDateTime) -> Result<ClientSnapshotRecord, ParseError> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 5 {
        return Err(ParseError::MissingFields(parts.len()));
    }

    let address = resolve_real_address(parts[1]);
    let bytes_received = parse_counter(parts[2])?;
    let bytes_sent = parse_counter(parts[3])?;
    let connected_since = parts[4].to_string();
    let connected_at = parse_timestamp(&connected_since)
        .ok_or_else(|| ParseError::InvalidTimestamp(connected_since.clone()))?;

    Ok(ClientSnapshotRecord {
        common_name: parts[0].to_string(),
        real_ip: address.ip,
        port: address.port,
        bytes_received,
        bytes_sent,
        connected_since,
        time_online: format_duration((now - connected_at).num_seconds()),
        vpn_ip: String::new(),
        vpn_ipv4: String::new(),
        vpn_ipv6: String::new(),
        connected_at,
    })
}

fn row_common_name(line: &str) -> Option<String> {
    line.split(',')
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn parse_counter(value: &str) -> Result<u64, ParseError> {
    value
        .parse::<u64>()
        .map_err(|_| ParseError::InvalidByteCount(value.to_string()))
}
