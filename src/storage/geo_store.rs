//! Local client geolocation database.
//!
//! Fed from journal events: remembers every external address a client was
//! seen from, the tunnel addresses it got there, and when. The `location`
//! block is filled by a separate enrichment job and never written here.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::atomic_file::write_json_atomic;
use super::types::HistoryEvent;
use crate::error_handling::types::StorageError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoDatabase {
    #[serde(default)]
    pub clients: BTreeMap<String, GeoClient>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoClient {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ips: BTreeMap<String, GeoIpRecord>,
    #[serde(default)]
    pub first_seen: Option<String>,
    #[serde(default)]
    pub last_seen: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoIpRecord {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub vpn_ipv4: Vec<String>,
    #[serde(default)]
    pub vpn_ipv6: Vec<String>,
    #[serde(default)]
    pub location: GeoLocation,
    #[serde(default)]
    pub first_seen: Option<String>,
    #[serde(default)]
    pub last_seen: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
}

/// Widens a first_seen/last_seen range to include `timestamp`.
/// Timestamps share one fixed-width format, so text order is time order.
fn update_seen(first_seen: &mut Option<String>, last_seen: &mut Option<String>, timestamp: &str) -> bool {
    if timestamp.is_empty() {
        return false;
    }
    let mut changed = false;
    if first_seen.as_deref().map_or(true, |f| f.is_empty() || timestamp < f) {
        *first_seen = Some(timestamp.to_string());
        changed = true;
    }
    if last_seen.as_deref().map_or(true, |l| l.is_empty() || timestamp > l) {
        *last_seen = Some(timestamp.to_string());
        changed = true;
    }
    changed
}

fn push_unique(values: &mut Vec<String>, value: &str) -> bool {
    if value.is_empty() || values.iter().any(|v| v == value) {
        return false;
    }
    values.push(value.to_string());
    true
}

impl GeoDatabase {
    /// Folds events in; returns whether anything changed.
    pub fn ingest(&mut self, events: &[HistoryEvent]) -> bool {
        let mut changed = false;
        for event in events {
            if event.name.is_empty() {
                continue;
            }
            let client = self
                .clients
                .entry(event.name.clone())
                .or_insert_with(|| GeoClient {
                    name: event.name.clone(),
                    ..Default::default()
                });
            changed |= update_seen(&mut client.first_seen, &mut client.last_seen, &event.timestamp);

            if event.ip.is_empty() {
                continue;
            }
            let record = client.ips.entry(event.ip.clone()).or_insert_with(|| {
                changed = true;
                GeoIpRecord {
                    ip: event.ip.clone(),
                    ..Default::default()
                }
            });
            changed |= update_seen(&mut record.first_seen, &mut record.last_seen, &event.timestamp);
            changed |= push_unique(&mut record.vpn_ipv4, &event.vpn_ipv4);
            changed |= push_unique(&mut record.vpn_ipv6, &event.vpn_ipv6);
        }
        changed
    }
}

#[derive(Debug, Clone)]
pub struct GeoStore {
    path: PathBuf,
}

impl GeoStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Current database; missing or unreadable documents read as empty.
    pub fn load(&self) -> GeoDatabase {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                debug!("Geo database {} unavailable: {}", self.path.display(), e);
                return GeoDatabase::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Geo database {} is unreadable ({}); starting empty", self.path.display(), e);
            GeoDatabase::default()
        })
    }

    /// Records the clients and addresses of `events`, rewriting the document
    /// only when something changed.
    pub fn ingest(&self, events: &[HistoryEvent]) -> Result<bool, StorageError> {
        let mut db = self.load();
        if !db.ingest(events) {
            return Ok(false);
        }
        db.updated_at = Some(Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string());
        write_json_atomic(&self.path, &db)?;
        info!("Updated geo database {} with {} event(s)", self.path.display(), events.len());
        Ok(true)
    }
}
