//! Snapshot-to-table reconciliation.
//!
//! Each common name moves through three transitions, decided by comparing
//! the previous session table with a freshly parsed snapshot:
//!
//! | previous | snapshot | effect                                              |
//! |----------|----------|-----------------------------------------------------|
//! | absent   | present  | new session id, new record, connect event           |
//! | present  | present  | counters, address and tunnel addresses updated      |
//! | present  | absent   | record removed, disconnect event with MiB totals    |
//!
//! This module performs no I/O; the session manager loads, locks and
//! persists around it.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use log::info;

use crate::clock::{format_duration, format_timestamp};
use crate::status_parsing::{ClientSnapshotRecord, ParsedSnapshot};
use crate::storage::types::{ActiveSessionRecord, HistoryEvent, SessionTable};

/// Result of reconciling one snapshot.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub table: SessionTable,
    /// Connect events in discovery order, then disconnect events in
    /// common-name order
    pub events: Vec<HistoryEvent>,
    /// Clients of the snapshot with tunnel addresses resolved
    pub clients: Vec<ClientSnapshotRecord>,
    pub connected: Vec<String>,
    pub disconnected: Vec<String>,
}

/// Applies `snapshot` to `previous`. `mint_session_id` is called once per
/// newly visible common name.
///
/// When a common name appears on several rows, the first row creates the
/// session and the following rows update it, so the last row wins.
///
/// A name whose row failed to parse still counts as present: its session
/// is kept as stored, and no session is created for it.
pub fn reconcile<F>(
    previous: SessionTable,
    snapshot: ParsedSnapshot,
    now: NaiveDateTime,
    mut mint_session_id: F,
) -> Reconciliation
where
    F: FnMut() -> String,
{
    let ParsedSnapshot {
        clients,
        routing,
        faults,
    } = snapshot;
    let mut table = previous;
    let mut present: HashSet<&str> = faults
        .iter()
        .filter_map(|fault| fault.common_name.as_deref())
        .collect();
    let mut connected: Vec<String> = Vec::new();

    for client in &clients {
        present.insert(client.common_name.as_str());
        let route = routing.get(&client.common_name);

        match table.get_mut(&client.common_name) {
            Some(session) => {
                session.ip = client.real_ip.clone();
                session.port = client.port.clone();
                session.bytes_received = client.bytes_received;
                session.bytes_sent = client.bytes_sent;
                if let Some(route) = route {
                    session.vpn_ipv4 = route.ipv4.clone().unwrap_or_default();
                    session.vpn_ipv6 = route.ipv6.clone().unwrap_or_default();
                    session.vpn_ip = route.preferred().to_string();
                }
            }
            None => {
                let session = ActiveSessionRecord {
                    ip: client.real_ip.clone(),
                    vpn_ip: client.vpn_ip.clone(),
                    vpn_ipv4: client.vpn_ipv4.clone(),
                    vpn_ipv6: client.vpn_ipv6.clone(),
                    connected_at: client.connected_at,
                    bytes_received: client.bytes_received,
                    bytes_sent: client.bytes_sent,
                    port: client.port.clone(),
                    session_id: mint_session_id(),
                };
                table.insert(client.common_name.clone(), session);
                connected.push(client.common_name.clone());
            }
        }
    }

    let mut events = Vec::new();
    for name in &connected {
        if let Some(session) = table.get(name) {
            info!("Client {} connected from {} (session {})", name, session.ip, session.session_id);
            events.push(HistoryEvent::connect(name, session));
        }
    }

    let disconnected: Vec<String> = table
        .keys()
        .filter(|name| !present.contains(name.as_str()))
        .cloned()
        .collect();
    for name in &disconnected {
        if let Some(session) = table.remove(name) {
            let event = HistoryEvent::disconnect(name, &session, now);
            info!(
                "Client {} disconnected (session {}, rx {:.2} MiB, tx {:.2} MiB)",
                name,
                session.session_id,
                event.rx.unwrap_or_default(),
                event.tx.unwrap_or_default()
            );
            events.push(event);
        }
    }

    Reconciliation {
        table,
        events,
        clients,
        connected,
        disconnected,
    }
}

/// Presents a stored table as client records, for when no fresh snapshot
/// could be reconciled.
pub fn project_table(table: &SessionTable, now: NaiveDateTime) -> Vec<ClientSnapshotRecord> {
    table
        .iter()
        .map(|(name, session)| ClientSnapshotRecord {
            common_name: name.clone(),
            real_ip: session.ip.clone(),
            port: session.port.clone(),
            bytes_received: session.bytes_received,
            bytes_sent: session.bytes_sent,
            connected_since: format_timestamp(&session.connected_at),
            time_online: format_duration((now - session.connected_at).num_seconds()),
            vpn_ip: session.vpn_ip.clone(),
            vpn_ipv4: session.vpn_ipv4.clone(),
            vpn_ipv6: session.vpn_ipv6.clone(),
            connected_at: session.connected_at,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::parse_timestamp;
    use crate::status_parsing::parse_snapshot;
    use crate::storage::types::EventKind;

    fn at(ts: &str) -> NaiveDateTime {
        parse_timestamp(ts).unwrap()
    }

    fn counter_ids() -> impl FnMut() -> String {
        let mut next = 0;
        move || {
            next += 1;
            format!("session-{}", next)
        }
    }

    fn snapshot(rows: &str, routes: &str, now: &str) -> ParsedSnapshot {
        let text = format!(
            "Common Name,Real Address,Bytes Received,Bytes Sent,Connected Since\n{}\nROUTING TABLE\n{}\nGLOBAL STATS\n",
            rows, routes
        );
        parse_snapshot(&text, at(now))
    }

    #[test]
    fn test_new_client_creates_session_and_connect_event() {
        let parsed = snapshot(
            "client1,[2001:db8::1]:443,1024,2048,2024-01-01 12:00:00",
            "10.8.0.2,client1",
            "2024-01-01 12:10:00",
        );
        let outcome = reconcile(SessionTable::new(), parsed, at("2024-01-01 12:10:00"), counter_ids());

        assert_eq!(outcome.connected, vec!["client1"]);
        let session = &outcome.table["client1"];
        assert_eq!(session.session_id, "session-1");
        assert_eq!(session.port, "443");
        assert_eq!(session.vpn_ip, "10.8.0.2");
        assert_eq!(session.ip, "2001:db8::1");

        assert_eq!(outcome.events.len(), 1);
        let event = &outcome.events[0];
        assert_eq!(event.kind(), EventKind::Connect);
        assert_eq!(event.timestamp, "2024-01-01 12:00:00");
        assert_eq!(event.vpn_ip, "10.8.0.2");
        assert_eq!((event.rx, event.tx, event.session_end.clone()), (None, None, None));
    }

    #[test]
    fn test_continuing_client_updates_in_place() {
        let first = reconcile(
            SessionTable::new(),
            snapshot("alice,198.51.100.20:51820,10,20,2024-01-01 11:00:00", "10.8.0.6,alice", "2024-01-01 11:05:00"),
            at("2024-01-01 11:05:00"),
            counter_ids(),
        );
        let second = reconcile(
            first.table,
            snapshot("alice,198.51.100.99:40000,500,700,2024-01-01 11:00:00", "", "2024-01-01 11:10:00"),
            at("2024-01-01 11:10:00"),
            || panic!("continuing session must not mint an id"),
        );

        assert!(second.events.is_empty());
        let session = &second.table["alice"];
        assert_eq!(session.session_id, "session-1");
        assert_eq!(session.ip, "198.51.100.99");
        assert_eq!(session.port, "40000");
        assert_eq!((session.bytes_received, session.bytes_sent), (500, 700));
        assert_eq!(session.vpn_ip, "10.8.0.6");
    }

    #[test]
    fn test_routing_change_updates_continuing_session() {
        let first = reconcile(
            SessionTable::new(),
            snapshot("alice,198.51.100.20:51820,10,20,2024-01-01 11:00:00", "fd00::6,alice", "2024-01-01 11:05:00"),
            at("2024-01-01 11:05:00"),
            counter_ids(),
        );
        assert_eq!(first.table["alice"].vpn_ip, "fd00::6");
        let second = reconcile(
            first.table,
            snapshot("alice,198.51.100.20:51820,10,20,2024-01-01 11:00:00", "10.8.0.6,alice\nfd00::6,alice", "2024-01-01 11:10:00"),
            at("2024-01-01 11:10:00"),
            counter_ids(),
        );
        let session = &second.table["alice"];
        assert_eq!(session.vpn_ip, "10.8.0.6");
        assert_eq!(session.vpn_ipv4, "10.8.0.6");
        assert_eq!(session.vpn_ipv6, "fd00::6");
    }

    #[test]
    fn test_absent_client_is_disconnected() {
        let mut previous = SessionTable::new();
        previous.insert(
            "alice".into(),
            ActiveSessionRecord {
                ip: "198.51.100.10".into(),
                vpn_ip: "10.8.0.5".into(),
                vpn_ipv4: "10.8.0.5".into(),
                vpn_ipv6: "".into(),
                connected_at: at("2024-01-01 09:00:00"),
                bytes_received: 1_048_576,
                bytes_sent: 2_097_152,
                port: "443".into(),
                session_id: "existing-session".into(),
            },
        );

        let outcome = reconcile(previous, snapshot("", "", "2024-01-01 13:00:00"), at("2024-01-01 13:00:00"), counter_ids());

        assert!(outcome.table.is_empty());
        assert_eq!(outcome.disconnected, vec!["alice"]);
        let event = &outcome.events[0];
        assert_eq!(event.kind(), EventKind::Disconnect);
        assert_eq!(event.session_id, "existing-session");
        assert_eq!(event.rx, Some(1.0));
        assert_eq!(event.tx, Some(2.0));
        assert_eq!(event.session_end.as_deref(), Some("2024-01-01 13:00:00"));
        assert_eq!(event.vpn_ip, "10.8.0.5");
        assert_eq!(event.port, "443");
    }

    #[test]
    fn test_malformed_row_keeps_session_untouched() {
        let first = reconcile(
            SessionTable::new(),
            snapshot("alice,198.51.100.20:51820,10,20,2024-01-01 11:00:00", "10.8.0.6,alice", "2024-01-01 11:05:00"),
            at("2024-01-01 11:05:00"),
            counter_ids(),
        );
        let stored = first.table["alice"].clone();

        let second = reconcile(
            first.table,
            snapshot("alice,198.51.100.20:51820,1x0,20,2024-01-01 11:00:00", "10.8.0.6,alice", "2024-01-01 11:10:00"),
            at("2024-01-01 11:10:00"),
            || panic!("faulted row must not mint an id"),
        );
        assert!(second.events.is_empty());
        assert!(second.disconnected.is_empty());
        assert_eq!(second.table["alice"], stored);

        let unknown = reconcile(
            SessionTable::new(),
            snapshot("bob,198.51.100.21:51820,x,20,2024-01-01 11:00:00", "", "2024-01-01 11:10:00"),
            at("2024-01-01 11:10:00"),
            || panic!("faulted row must not mint an id"),
        );
        assert!(unknown.table.is_empty());
        assert!(unknown.events.is_empty());
    }

    #[test]
    fn test_duplicate_common_name_last_row_wins() {
        let outcome = reconcile(
            SessionTable::new(),
            snapshot(
                "shared,198.51.100.1:1000,1,2,2024-01-01 11:00:00\nshared,198.51.100.2:2000,3,4,2024-01-01 11:30:00",
                "",
                "2024-01-01 12:00:00",
            ),
            at("2024-01-01 12:00:00"),
            counter_ids(),
        );

        assert_eq!(outcome.clients.len(), 2);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].ip, "198.51.100.2");
        let session = &outcome.table["shared"];
        assert_eq!(session.ip, "198.51.100.2");
        assert_eq!((session.bytes_received, session.bytes_sent), (3, 4));
        assert_eq!(session.session_id, "session-1");
    }

    #[test]
    fn test_event_order_connects_then_disconnects() {
        let first = reconcile(
            SessionTable::new(),
            snapshot(
                "zed,198.51.100.1:1,1,1,2024-01-01 10:00:00\nyan,198.51.100.2:1,1,1,2024-01-01 10:00:00",
                "",
                "2024-01-01 10:05:00",
            ),
            at("2024-01-01 10:05:00"),
            counter_ids(),
        );
        let names: Vec<&str> = first.events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["zed", "yan"]);

        let second = reconcile(
            first.table,
            snapshot("new,198.51.100.3:1,1,1,2024-01-01 10:06:00", "", "2024-01-01 10:10:00"),
            at("2024-01-01 10:10:00"),
            || "session-new".to_string(),
        );
        let summary: Vec<(&str, EventKind)> = second
            .events
            .iter()
            .map(|e| (e.name.as_str(), e.kind()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("new", EventKind::Connect),
                ("yan", EventKind::Disconnect),
                ("zed", EventKind::Disconnect),
            ]
        );
    }

    #[test]
    fn test_project_table() {
        let mut table = SessionTable::new();
        table.insert(
            "alice".into(),
            ActiveSessionRecord {
                ip: "198.51.100.10".into(),
                vpn_ip: "10.8.0.5".into(),
                vpn_ipv4: "10.8.0.5".into(),
                vpn_ipv6: "".into(),
                connected_at: at("2024-01-01 09:00:00"),
                bytes_received: 1,
                bytes_sent: 2,
                port: "443".into(),
                session_id: "s1".into(),
            },
        );
        let clients = project_table(&table, at("2024-01-02 10:00:00"));
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].common_name, "alice");
        assert_eq!(clients[0].connected_since, "2024-01-01 09:00:00");
        assert_eq!(clients[0].time_online, "1 day, 1:00:00");
    }
}
