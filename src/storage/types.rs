use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::clock::{format_timestamp, parse_timestamp};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// A client currently believed connected, keyed by common name in a
/// [`SessionTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSessionRecord {
    pub ip: String,
    pub vpn_ip: String,
    pub vpn_ipv4: String,
    pub vpn_ipv6: String,
    #[serde(with = "timestamp_text")]
    pub connected_at: NaiveDateTime,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub port: String,
    pub session_id: String,
}

/// Common name -> session. Ordered so the persisted document and the
/// disconnect order are stable.
pub type SessionTable = BTreeMap<String, ActiveSessionRecord>;

impl ActiveSessionRecord {
    /// Builds a record from one entry of a stored table, or `None` when a
    /// required field is missing or a counter is not an integer.
    ///
    /// Older documents may lack `port`, `vpn_ipv4` and `vpn_ipv6`, or hold
    /// `null` in `vpn_ip`; those read as empty.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        for field in ["ip", "vpn_ip", "connected_at", "bytes_received", "bytes_sent", "session_id"] {
            if !object.contains_key(field) {
                return None;
            }
        }

        let text = |field: &str| -> Option<String> {
            match object.get(field) {
                None | Some(Value::Null) => Some(String::new()),
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                Some(_) => None,
            }
        };

        let session_id = text("session_id")?;
        if session_id.is_empty() {
            return None;
        }
        let connected_at = object
            .get("connected_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)?;

        Some(Self {
            ip: text("ip")?,
            vpn_ip: text("vpn_ip")?,
            vpn_ipv4: text("vpn_ipv4")?,
            vpn_ipv6: text("vpn_ipv6")?,
            connected_at,
            bytes_received: coerce_counter(object.get("bytes_received")?)?,
            bytes_sent: coerce_counter(object.get("bytes_sent")?)?,
            port: text("port")?,
            session_id,
        })
    }
}

/// Accepts integers, integral floats and numeric strings.
fn coerce_counter(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
}

/// One lifecycle event of the history journal.
///
/// A connect event has `rx`, `tx` and `session_end` unset; the matching
/// disconnect event, appended later as a separate entry, has all three.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Session start
    #[serde(default, deserialize_with = "null_as_empty")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub ip: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub session_id: String,
    #[serde(default)]
    pub rx: Option<f64>,
    #[serde(default)]
    pub tx: Option<f64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub vpn_ip: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub vpn_ipv4: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub vpn_ipv6: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub port: String,
    #[serde(default)]
    pub session_end: Option<String>,
}

impl HistoryEvent {
    pub fn connect(name: &str, session: &ActiveSessionRecord) -> Self {
        Self {
            timestamp: format_timestamp(&session.connected_at),
            name: name.to_string(),
            ip: session.ip.clone(),
            session_id: session.session_id.clone(),
            rx: None,
            tx: None,
            vpn_ip: session.vpn_ip.clone(),
            vpn_ipv4: session.vpn_ipv4.clone(),
            vpn_ipv6: session.vpn_ipv6.clone(),
            port: session.port.clone(),
            session_end: None,
        }
    }

    pub fn disconnect(name: &str, session: &ActiveSessionRecord, ended_at: NaiveDateTime) -> Self {
        Self {
            rx: Some(bytes_to_mib(session.bytes_received)),
            tx: Some(bytes_to_mib(session.bytes_sent)),
            session_end: Some(format_timestamp(&ended_at)),
            ..Self::connect(name, session)
        }
    }

    pub fn kind(&self) -> EventKind {
        if self.session_end.is_some() {
            EventKind::Disconnect
        } else {
            EventKind::Connect
        }
    }

    /// Identity used to recognise a replayed event.
    pub fn delivery_key(&self) -> (String, EventKind) {
        (self.session_id.clone(), self.kind())
    }

    /// Reads one line of the comma-separated journal written by earlier
    /// releases: `timestamp,name,ip,session_id,rx,tx,vpn_ip,port,session_end,vpn_ipv4,vpn_ipv6`.
    pub fn from_legacy_line(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        if parts.len() < 4 {
            return None;
        }
        let field = |i: usize| parts.get(i).copied().unwrap_or("").to_string();
        let amount = |i: usize| parts.get(i).and_then(|v| v.parse::<f64>().ok());

        let session_end = parts
            .get(8)
            .copied()
            .filter(|v| parse_timestamp(v).is_some())
            .map(str::to_string);
        let mut vpn_ipv4 = field(9);
        let mut vpn_ipv6 = field(10);
        let vpn_ip = [field(6), vpn_ipv4.clone(), vpn_ipv6.clone()]
            .into_iter()
            .find(|v| !v.is_empty())
            .unwrap_or_default();
        if vpn_ipv4.is_empty() && vpn_ip.contains('.') {
            vpn_ipv4 = vpn_ip.clone();
        }
        if vpn_ipv6.is_empty() && vpn_ip.contains(':') {
            vpn_ipv6 = vpn_ip.clone();
        }

        Some(Self {
            timestamp: field(0),
            name: field(1),
            ip: field(2),
            session_id: field(3),
            rx: amount(4),
            tx: amount(5),
            vpn_ip,
            vpn_ipv4,
            vpn_ipv6,
            port: field(7),
            session_end,
        })
    }
}

/// Bytes to MiB, rounded to two decimals.
pub fn bytes_to_mib(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_MIB * 100.0).round() / 100.0
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

mod timestamp_text {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::clock::{format_timestamp, parse_timestamp};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp {:?}", raw)))
    }
}
