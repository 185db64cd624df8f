use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use log::info;

use super::routes::api_routes;
use crate::configuration::Config;
use crate::session_management::SessionManager;

/// Web server for the JSON API and dashboard
pub struct WebServer {
    manager: Arc<SessionManager>,
    server_status: PathBuf,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &Config, manager: Arc<SessionManager>) -> Self {
        Self {
            manager,
            server_status: config.server_status.clone(),
            addr: SocketAddr::new(config.web_bind_address, config.web_port),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serves until the runtime shuts down.
    pub async fn start(&self) {
        let routes = api_routes(self.manager.clone(), self.server_status.clone());
        info!("Query layer listening on http://{}", self.addr);
        warp::serve(routes).run(self.addr).await;
    }
}
