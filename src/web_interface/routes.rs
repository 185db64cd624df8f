use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, warn};
use serde_json::{json, Map, Value};
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{ApiError, ClientSummary, ClientSummaryResponse, ClientsResponse, HistoryEntryResponse};
use crate::clock::{format_duration, parse_timestamp};
use crate::error_handling::types::{CycleError, StorageError, WebError};
use crate::session_management::{current_clients_blocking, SessionManager};
use crate::status_parsing::ClientSnapshotRecord;
use crate::storage::types::{bytes_to_mib, EventKind, HistoryEvent};

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>OpenVPN Monitor</title></head>
<body>
<h1>OpenVPN Monitor</h1>
<table id="clients"><thead><tr>
<th>Common name</th><th>Real address</th><th>VPN address</th><th>Received</th><th>Sent</th><th>Online</th>
</tr></thead><tbody></tbody></table>
<p>JSON: <a href="/api/clients">clients</a>, <a href="/api/history">history</a>,
<a href="/api/clients/summary">summary</a>, <a href="/api/server-status">server status</a></p>
<script>
fetch('/api/clients').then(r => r.json()).then(data => {
  const body = document.querySelector('#clients tbody');
  for (const c of data.clients || []) {
    const row = body.insertRow();
    for (const v of [c.common_name, c.real_ip, c.vpn_ip, c.bytes_received, c.bytes_sent, c.time_online]) {
      row.insertCell().textContent = v;
    }
  }
});
</script>
</body></html>"#;

/// Duration of a finished session, `None` while it is open.
pub fn event_duration(event: &HistoryEvent) -> Option<String> {
    let end = parse_timestamp(event.session_end.as_deref()?)?;
    let start = parse_timestamp(&event.timestamp)?;
    Some(format_duration((end - start).num_seconds()))
}

pub fn history_entries(events: Vec<HistoryEvent>) -> Vec<HistoryEntryResponse> {
    events
        .into_iter()
        .map(|event| HistoryEntryResponse {
            duration: event_duration(&event),
            event,
        })
        .collect()
}

#[derive(Default)]
struct SessionSpan {
    name: String,
    started: String,
    ended: Option<String>,
    rx: f64,
    tx: f64,
}

/// Aggregates the journal per client. Connect and disconnect events are
/// paired on session_id; events without one stand alone.
///
/// Every client in `live` is marked online. One not yet journaled as open
/// counts one more open session.
pub fn summarize_clients(events: &[HistoryEvent], live: &[ClientSnapshotRecord]) -> Vec<ClientSummary> {
    let mut spans: Vec<SessionSpan> = Vec::new();
    let mut by_session: HashMap<&str, usize> = HashMap::new();

    for event in events {
        let index = if event.session_id.is_empty() {
            spans.push(SessionSpan::default());
            spans.len() - 1
        } else {
            *by_session.entry(event.session_id.as_str()).or_insert_with(|| {
                spans.push(SessionSpan::default());
                spans.len() - 1
            })
        };
        let span = &mut spans[index];
        if span.name.is_empty() {
            span.name = event.name.clone();
        }
        if span.started.is_empty() {
            span.started = event.timestamp.clone();
        }
        if event.kind() == EventKind::Disconnect {
            span.ended = event.session_end.clone();
            span.rx = event.rx.unwrap_or_default();
            span.tx = event.tx.unwrap_or_default();
        }
    }

    let mut summaries: BTreeMap<String, ClientSummary> = BTreeMap::new();
    for span in spans {
        let summary = summaries
            .entry(span.name.clone())
            .or_insert_with(|| ClientSummary {
                name: span.name.clone(),
                ..Default::default()
            });
        summary.sessions += 1;

        let last = match &span.ended {
            Some(ended) => {
                summary.total_rx += span.rx;
                summary.total_tx += span.tx;
                if let (Some(start), Some(end)) = (parse_timestamp(&span.started), parse_timestamp(ended)) {
                    summary.total_connected_seconds += (end - start).num_seconds().max(0);
                }
                ended.clone()
            }
            None => {
                summary.open_sessions += 1;
                span.started.clone()
            }
        };
        if !last.is_empty() && summary.last_seen.as_deref().map_or(true, |seen| last.as_str() > seen) {
            summary.last_seen = Some(last);
        }
    }

    for client in live {
        let summary = summaries
            .entry(client.common_name.clone())
            .or_insert_with(|| ClientSummary {
                name: client.common_name.clone(),
                ..Default::default()
            });
        if summary.is_online {
            continue;
        }
        summary.is_online = true;
        if summary.open_sessions == 0 {
            summary.sessions += 1;
            summary.open_sessions += 1;
        }
        let since = &client.connected_since;
        if summary.last_seen.as_deref().map_or(true, |seen| since.as_str() > seen) {
            summary.last_seen = Some(since.clone());
        }
    }

    summaries
        .into_values()
        .map(|mut summary| {
            summary.total_rx = (summary.total_rx * 100.0).round() / 100.0;
            summary.total_tx = (summary.total_tx * 100.0).round() / 100.0;
            summary.total_connected = format_duration(summary.total_connected_seconds);
            summary
        })
        .collect()
}

fn default_server_status() -> Map<String, Value> {
    let mut status = Map::new();
    status.insert("status".into(), json!("Unknown"));
    status.insert("uptime".into(), json!("Unknown"));
    status.insert("local_ip".into(), json!("0.0.0.0"));
    status.insert("public_ip".into(), json!("0.0.0.0"));
    status.insert("pingable".into(), json!(false));
    status
}

/// Reads the server status document written by the host's status script.
/// An unreadable document yields placeholder values; a textual `pingable`
/// is turned into a boolean.
pub fn load_server_status(path: &Path) -> Map<String, Value> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Unable to read server status {}: {}", path.display(), e);
            return default_server_status();
        }
    };
    let mut status = match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!("Server status {} is not a JSON object", path.display());
            return default_server_status();
        }
        Err(e) => {
            warn!("Unable to parse server status {}: {}", path.display(), e);
            return default_server_status();
        }
    };

    if let Some(Value::String(pingable)) = status.get("pingable") {
        let pingable = pingable.eq_ignore_ascii_case("yes");
        status.insert("pingable".into(), Value::Bool(pingable));
    }
    status
}

/// The status document merged with live totals over `clients`.
pub fn server_status(path: &Path, clients: &[ClientSnapshotRecord]) -> Map<String, Value> {
    let mut status = load_server_status(path);
    let total_rx: u64 = clients.iter().map(|c| c.bytes_received).sum();
    let total_tx: u64 = clients.iter().map(|c| c.bytes_sent).sum();
    status.insert("mode".into(), json!("server"));
    status.insert("clients".into(), json!(clients.len()));
    status.insert("total_rx".into(), json!(bytes_to_mib(total_rx)));
    status.insert("total_tx".into(), json!(bytes_to_mib(total_tx)));
    status
}

fn error_response(err: WebError, message: &str) -> reply::Response {
    error!("{}: {}", message, err);
    reply::with_status(
        reply::json(&ApiError::new(err.code(), message)),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
    .into_response()
}

fn worker_failed(err: tokio::task::JoinError) -> WebError {
    WebError::Cycle(CycleError::WorkerFailed(err.to_string()))
}

/// The journal, after making sure the geo store holds every event of it.
async fn load_history(manager: Arc<SessionManager>) -> Result<Vec<HistoryEvent>, WebError> {
    let events = tokio::task::spawn_blocking(move || {
        let events = manager.history()?;
        match manager.backfill_geo(&events) {
            Ok(true) => debug!("Geo database backfilled from the journal"),
            Ok(false) => {}
            Err(e) => warn!("Unable to backfill the geo database: {}", e),
        }
        Ok::<_, StorageError>(events)
    })
    .await
    .map_err(worker_failed)??;
    Ok(events)
}

async fn load_summary(manager: Arc<SessionManager>) -> Result<Vec<ClientSummary>, WebError> {
    let summary = tokio::task::spawn_blocking(move || {
        let live = manager.current_clients();
        let events = manager.history()?;
        Ok::<_, StorageError>(summarize_clients(&events, &live))
    })
    .await
    .map_err(worker_failed)??;
    Ok(summary)
}

fn with_manager(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = (Arc<SessionManager>,), Error = Infallible> + Clone {
    warp::any().map(move || manager.clone())
}

/// GET /
pub fn dashboard_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .and_then(|| async move { Ok::<_, Rejection>(reply::html(DASHBOARD_HTML)) })
}

/// GET /api/clients
pub fn clients_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "clients")
        .and(warp::get())
        .and(with_manager(manager))
        .and_then(|manager: Arc<SessionManager>| async move {
            let response = match current_clients_blocking(manager).await {
                Ok(clients) => reply::json(&ClientsResponse { clients }).into_response(),
                Err(e) => error_response(e.into(), "Failed to fetch clients"),
            };
            Ok::<_, Rejection>(response)
        })
}

/// GET /api/history
pub fn history_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "history")
        .and(warp::get())
        .and(with_manager(manager))
        .and_then(|manager: Arc<SessionManager>| async move {
            let response = match load_history(manager).await {
                Ok(events) => reply::json(&history_entries(events)).into_response(),
                Err(e) => error_response(e, "Failed to read history log"),
            };
            Ok::<_, Rejection>(response)
        })
}

/// GET /api/clients/summary
pub fn clients_summary_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "clients" / "summary")
        .and(warp::get())
        .and(with_manager(manager))
        .and_then(|manager: Arc<SessionManager>| async move {
            let response = match load_summary(manager).await {
                Ok(clients) => reply::json(&ClientSummaryResponse { clients }).into_response(),
                Err(e) => error_response(e, "Failed to summarize clients"),
            };
            Ok::<_, Rejection>(response)
        })
}

/// GET /api/server-status
pub fn server_status_route(
    manager: Arc<SessionManager>,
    status_path: PathBuf,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let status_path = Arc::new(status_path);
    warp::path!("api" / "server-status")
        .and(warp::get())
        .and(with_manager(manager))
        .and_then(move |manager: Arc<SessionManager>| {
            let status_path = status_path.clone();
            async move {
                let status = tokio::task::spawn_blocking(move || {
                    let clients = manager.current_clients();
                    server_status(&status_path, &clients)
                })
                .await;
                let response = match status {
                    Ok(status) => reply::json(&status).into_response(),
                    Err(e) => error_response(worker_failed(e), "Failed to build server status"),
                };
                Ok::<_, Rejection>(response)
            }
        })
}

/// Every route of the query layer.
pub fn api_routes(
    manager: Arc<SessionManager>,
    status_path: PathBuf,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    debug!("Serving server status from {}", status_path.display());
    dashboard_route()
        .or(clients_route(manager.clone()))
        .or(clients_summary_route(manager.clone()))
        .or(history_route(manager.clone()))
        .or(server_status_route(manager, status_path))
}
