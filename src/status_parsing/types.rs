use std::collections::HashMap;
use std::net::IpAddr;

use chrono::NaiveDateTime;
use log::debug;
use serde::Serialize;

use crate::error_handling::types::ParseError;

/// One connected client as listed in the current snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSnapshotRecord {
    pub common_name: String,
    pub real_ip: String,
    pub port: String,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    /// Verbatim `Connected Since` column
    pub connected_since: String,
    pub time_online: String,
    pub vpn_ip: String,
    pub vpn_ipv4: String,
    pub vpn_ipv6: String,
    #[serde(skip)]
    pub connected_at: NaiveDateTime,
}

/// Tunnel addresses routed to one common name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingEntry {
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
}

impl RoutingEntry {
    /// Files an address under its family. Values that are not plain
    /// addresses land in the first free slot, or are dropped when both are
    /// taken.
    pub fn assign(&mut self, address: &str) {
        let address = address.trim();
        if address.is_empty() {
            return;
        }
        match address.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => self.ipv4 = Some(address.to_string()),
            Ok(IpAddr::V6(_)) => self.ipv6 = Some(address.to_string()),
            Err(_) => {
                if self.ipv4.is_none() {
                    self.ipv4 = Some(address.to_string());
                } else if self.ipv6.is_none() {
                    self.ipv6 = Some(address.to_string());
                } else {
                    debug!("Dropping routing value {:?}: both slots taken", address);
                }
            }
        }
    }

    /// IPv4 when known, IPv6 otherwise, else empty.
    pub fn preferred(&self) -> &str {
        self.ipv4
            .as_deref()
            .or(self.ipv6.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineFault {
    /// 1-based line number within the snapshot
    pub line_number: usize,
    /// First field of the row, when it has one. The client may still be
    /// online even though this row could not be read.
    pub common_name: Option<String>,
    pub reason: ParseError,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedSnapshot {
    /// Every client row in snapshot order, duplicates included
    pub clients: Vec<ClientSnapshotRecord>,
    pub routing: HashMap<String, RoutingEntry>,
    pub faults: Vec<LineFault>,
}
