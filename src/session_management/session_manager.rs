use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::configuration::Config;
use crate::error_handling::types::{CycleError, StorageError};
use crate::session_management::concurrency_guard::CycleLock;
use crate::session_management::reconciler::{project_table, reconcile};
use crate::status_parsing::{parse_snapshot, ClientSnapshotRecord, LineFault};
use crate::storage::types::{EventKind, HistoryEvent};
use crate::storage::{FileStorage, Storage};

/// What one reconciliation cycle observed and changed.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Clients of the snapshot, tunnel addresses resolved
    pub clients: Vec<ClientSnapshotRecord>,
    pub connected: Vec<String>,
    pub disconnected: Vec<String>,
    /// Events recovered from an interrupted earlier cycle
    pub replayed: usize,
    pub faults: Vec<LineFault>,
}

/// The structure driving reconciliation cycles
///
/// Each cycle reads the status snapshot, diffs it against the stored session
/// table and records the resulting lifecycle events. Every process that owns
/// a `SessionManager` over the same files cooperates through the cycle lock.
///
/// # Fields Overview
///
/// - `storage`: the session table, journal and geo store documents
/// - `lock`: cross-process lock held for a whole cycle
/// - `clock`: source of the per-cycle `now`
/// - `status_log`: the snapshot written by the VPN server
///
/// # Delivery
///
/// Events are delivered at least once. A cycle stages its events before
/// persisting the table, then appends them and clears the stage. A cycle
/// interrupted in between leaves the stage behind; the next cycle replays
/// the staged events that agree with the persisted table, and the journal
/// ignores those it already holds.
pub struct SessionManager {
    storage: Arc<dyn Storage>,
    lock: CycleLock,
    clock: Arc<dyn Clock>,
    status_log: PathBuf,
}

impl SessionManager {
    pub fn new(config: &Config, storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            lock: CycleLock::new(&config.lock_file),
            clock,
            status_log: config.status_log.clone(),
        }
    }

    /// Manager over the configured files, using the system clock.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config,
            Arc::new(FileStorage::new(config)),
            Arc::new(SystemClock::new(config.timezone)),
        )
    }

    /// Runs one full cycle under the lock.
    ///
    /// On error the durable documents hold their state from before the
    /// failing write; a batch already staged is replayed by the next cycle.
    pub fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let _guard = self.lock.acquire()?;

        let mut delivered = self.replay_staged()?;
        let replayed = delivered.len();

        let previous = self.storage.load_sessions();
        let text = fs::read_to_string(&self.status_log)
            .map_err(|e| CycleError::SnapshotUnavailable(self.status_log.clone(), e))?;
        let now = self.clock.now();
        let snapshot = parse_snapshot(&text, now);
        let faults = snapshot.faults.clone();

        let outcome = reconcile(previous, snapshot, now, || Uuid::new_v4().to_string());

        if !outcome.events.is_empty() {
            self.storage.stage_events(&outcome.events)?;
        }
        self.storage.save_sessions(&outcome.table)?;
        if !outcome.events.is_empty() {
            delivered.extend(self.storage.append_history(&outcome.events)?);
            self.storage.clear_staged_events()?;
        }

        self.feed_geo(&delivered);

        debug!(
            "Cycle done: {} client row(s), {} connected, {} disconnected, {} fault(s)",
            outcome.clients.len(),
            outcome.connected.len(),
            outcome.disconnected.len(),
            faults.len()
        );
        Ok(CycleReport {
            clients: outcome.clients,
            connected: outcome.connected,
            disconnected: outcome.disconnected,
            replayed,
            faults,
        })
    }

    /// Clients online now, falling back to the last persisted table when
    /// the cycle fails.
    pub fn current_clients(&self) -> Vec<ClientSnapshotRecord> {
        match self.run_cycle() {
            Ok(report) => report.clients,
            Err(e) => {
                error!("Reconciliation cycle failed: {}; serving persisted sessions", e);
                self.persisted_clients()
            }
        }
    }

    /// The persisted session table as client records. Reads without the lock.
    pub fn persisted_clients(&self) -> Vec<ClientSnapshotRecord> {
        project_table(&self.storage.load_sessions(), self.clock.now())
    }

    /// The whole journal. Reads without the lock.
    pub fn history(&self) -> Result<Vec<HistoryEvent>, StorageError> {
        self.storage.load_history()
    }

    /// Folds `events` into the geo store under the cycle lock. Ingestion is
    /// idempotent, so passing the whole journal only fills what is missing.
    pub fn backfill_geo(&self, events: &[HistoryEvent]) -> Result<bool, CycleError> {
        if events.is_empty() {
            return Ok(false);
        }
        let _guard = self.lock.acquire()?;
        Ok(self.storage.record_geo(events)?)
    }

    /// Delivers the batch an interrupted cycle left staged. Must run under
    /// the lock, before the table is loaded for reconciliation.
    fn replay_staged(&self) -> Result<Vec<HistoryEvent>, CycleError> {
        let staged = self.storage.staged_events();
        if staged.is_empty() {
            return Ok(Vec::new());
        }

        let table = self.storage.load_sessions();
        let live: HashSet<&str> = table.values().map(|s| s.session_id.as_str()).collect();
        let (kept, dropped): (Vec<HistoryEvent>, Vec<HistoryEvent>) =
            staged.into_iter().partition(|event| {
                let is_live = live.contains(event.session_id.as_str());
                match event.kind() {
                    EventKind::Connect => is_live,
                    EventKind::Disconnect => !is_live,
                }
            });

        warn!(
            "Replaying {} staged event(s) from an interrupted cycle, discarding {} not backed by the session table",
            kept.len(),
            dropped.len()
        );
        let written = if kept.is_empty() {
            Vec::new()
        } else {
            self.storage.append_history(&kept)?
        };
        self.storage.clear_staged_events()?;
        if !written.is_empty() {
            info!("Recovered {} journal event(s)", written.len());
        }
        Ok(written)
    }

    fn feed_geo(&self, events: &[HistoryEvent]) {
        if events.is_empty() {
            return;
        }
        if let Err(e) = self.storage.record_geo(events) {
            warn!("Unable to update the geo database: {}", e);
        }
    }
}

/// Runs one cycle on the blocking thread pool.
pub async fn run_cycle_blocking(manager: Arc<SessionManager>) -> Result<CycleReport, CycleError> {
    tokio::task::spawn_blocking(move || manager.run_cycle())
        .await
        .map_err(|e| CycleError::WorkerFailed(e.to_string()))?
}

/// [`SessionManager::current_clients`] on the blocking thread pool.
pub async fn current_clients_blocking(
    manager: Arc<SessionManager>,
) -> Result<Vec<ClientSnapshotRecord>, CycleError> {
    tokio::task::spawn_blocking(move || manager.current_clients())
        .await
        .map_err(|e| CycleError::WorkerFailed(e.to_string()))
}
