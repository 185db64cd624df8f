use std::future::Future;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::time::{self, MissedTickBehavior};

use crate::configuration::config::Config;
use crate::error_handling::types::ControllerError;
use crate::session_management::{run_cycle_blocking, SessionManager};
use crate::status_parsing::ClientSnapshotRecord;
use crate::web_interface::WebServer;

/// Wires the configuration to the session manager and runs one of the
/// binary's modes.
pub struct Controller {
    pub config: Config,
    manager: Arc<SessionManager>,
}

impl Controller {
    /// Seeds the data documents and builds the session manager.
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.ensure_data_files()?;
        let manager = Arc::new(SessionManager::from_config(&config));
        Ok(Self { config, manager })
    }

    pub fn with_manager(config: Config, manager: Arc<SessionManager>) -> Self {
        Self { config, manager }
    }

    pub fn manager(&self) -> Arc<SessionManager> {
        self.manager.clone()
    }

    /// One cycle, returning the clients online now.
    pub fn run_once(&self) -> Result<Vec<ClientSnapshotRecord>, ControllerError> {
        let report = self.manager.run_cycle()?;
        if !report.faults.is_empty() {
            warn!("{} snapshot row(s) skipped", report.faults.len());
        }
        Ok(report.clients)
    }

    /// Runs a cycle every `poll_interval` until `shutdown` resolves. A
    /// failed cycle is logged and the next one runs on schedule.
    pub async fn poll<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            "Polling {} every {:?}",
            self.config.status_log.display(),
            self.config.poll_interval
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Poller stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = run_cycle_blocking(self.manager.clone()).await {
                        error!("Reconciliation cycle failed: {}", e);
                    }
                }
            }
        }
    }

    /// Serves the query layer next to a background poller until `shutdown`
    /// resolves.
    pub async fn serve<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let server = WebServer::new(&self.config, self.manager.clone());
        tokio::select! {
            _ = server.start() => {
                warn!("Query layer on {} stopped", server.addr());
            }
            _ = self.poll(shutdown) => {}
        }
    }
}
