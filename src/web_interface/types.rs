use serde::Serialize;

use crate::status_parsing::ClientSnapshotRecord;
use crate::storage::types::HistoryEvent;

#[derive(Debug, Serialize)]
pub struct ClientsResponse {
    pub clients: Vec<ClientSnapshotRecord>,
}

/// A journal event as served by `/api/history`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntryResponse {
    #[serde(flatten)]
    pub event: HistoryEvent,
    /// `session_end - timestamp`; `None` until the session has ended
    pub duration: Option<String>,
}

/// Per-client aggregate over the journal, sessions paired on session_id,
/// merged with the clients online now.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientSummary {
    pub name: String,
    pub sessions: usize,
    pub open_sessions: usize,
    pub is_online: bool,
    /// MiB
    pub total_rx: f64,
    /// MiB
    pub total_tx: f64,
    pub total_connected_seconds: i64,
    pub total_connected: String,
    pub last_seen: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClientSummaryResponse {
    pub clients: Vec<ClientSummary>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ApiErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            error: ApiErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}
