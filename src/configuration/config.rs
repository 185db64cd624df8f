use super::types::TimeZoneSetting;
use crate::error_handling::types::ConfigError;
use clap::Args;
use log::{debug, info};
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_STATUS_LOG: &str = "/var/log/openvpn/status.log";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_WEB_PORT: u16 = 5000;

/// Runtime configuration of the monitor.
///
/// Built once at startup and handed by reference to every component. Each
/// field can come from (highest precedence first) a command-line flag, its
/// environment variable, the TOML configuration file, or the built-in
/// default.
///
/// # Fields Overview
///
/// - `status_log`: the status snapshot written periodically by the VPN server
/// - `history_log`: lifecycle journal (JSON array)
/// - `active_sessions`: table of clients currently believed connected
/// - `server_status`: server status document shown by the query layer
/// - `client_geo_db`: geo-enrichment store fed from the journal
/// - `lock_file`: advisory lock serialising reconciliation cycles across
///   processes; never one of the data files
/// - `timezone`: zone of the timestamps found in the snapshot
/// - `poll_interval`: delay between two background cycles
/// - `web_bind_address` / `web_port`: where the query layer listens
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub status_log: PathBuf,
    pub history_log: PathBuf,
    pub active_sessions: PathBuf,
    pub server_status: PathBuf,
    pub client_geo_db: PathBuf,
    pub lock_file: PathBuf,
    pub timezone: TimeZoneSetting,
    pub poll_interval: Duration,
    pub web_bind_address: IpAddr,
    pub web_port: u16,
}

/// Command-line and environment layer of the configuration.
///
/// Flattened into the binary's argument parser; every flag falls back to
/// the environment variable used by existing deployments.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Optional TOML configuration file
    #[arg(long = "config", env = "OPENVPN_MONITOR_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Directory holding the default data documents
    #[arg(long, env = "OPENVPN_MONITOR_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Status snapshot written by the VPN server
    #[arg(long, env = "OPENVPN_STATUS_LOG")]
    pub status_log: Option<PathBuf>,

    /// Lifecycle journal document
    #[arg(long, env = "OPENVPN_HISTORY_LOG")]
    pub history_log: Option<PathBuf>,

    /// Active-session table document
    #[arg(long, env = "OPENVPN_ACTIVE_SESSIONS")]
    pub active_sessions: Option<PathBuf>,

    /// Server status document
    #[arg(long, env = "OPENVPN_SERVER_STATUS")]
    pub server_status: Option<PathBuf>,

    /// Geo-enrichment store document
    #[arg(long, env = "OPENVPN_CLIENT_GEO_DB")]
    pub client_geo_db: Option<PathBuf>,

    /// Lock file shared by every process running cycles
    #[arg(long, env = "OPENVPN_MONITOR_LOCK")]
    pub lock_file: Option<PathBuf>,

    /// `local`, `UTC`, an IANA zone such as `Europe/Bucharest`, or a fixed
    /// offset such as `+02:00`
    #[arg(long, env = "OPENVPN_MONITOR_TZ")]
    pub timezone: Option<String>,

    /// Seconds between two background cycles
    #[arg(long, env = "OPENVPN_POLL_INTERVAL")]
    pub poll_interval_secs: Option<u64>,

    /// Address the query layer binds to
    #[arg(long, env = "OPENVPN_WEB_BIND")]
    pub web_bind_address: Option<IpAddr>,

    /// Port the query layer listens on
    #[arg(long, env = "OPENVPN_WEB_PORT")]
    pub web_port: Option<u16>,
}

/// TOML file layer. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub status_log: Option<PathBuf>,
    pub history_log: Option<PathBuf>,
    pub active_sessions: Option<PathBuf>,
    pub server_status: Option<PathBuf>,
    pub client_geo_db: Option<PathBuf>,
    pub lock_file: Option<PathBuf>,
    pub timezone: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub web_bind_address: Option<IpAddr>,
    pub web_port: Option<u16>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(expand_home(path))?;
        let parsed: FileConfig = toml::from_str(&content)?;
        debug!("Loaded configuration file {}", path.display());
        Ok(parsed)
    }
}

impl Config {
    /// Builds the configuration from parsed arguments, reading the TOML file
    /// they point at, if any.
    pub fn resolve(args: &ConfigArgs) -> Result<Self, ConfigError> {
        let file = match &args.config_file {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, &file)
    }

    /// Configuration with every document under `data_dir` and defaults elsewhere.
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            status_log: PathBuf::from(DEFAULT_STATUS_LOG),
            history_log: data_dir.join("session_history.json"),
            active_sessions: data_dir.join("active_sessions.json"),
            server_status: data_dir.join("server_status.json"),
            client_geo_db: data_dir.join("client_geolocation.json"),
            lock_file: data_dir.join("monitor.lock"),
            timezone: TimeZoneSetting::Local,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            web_bind_address: IpAddr::from([127, 0, 0, 1]),
            web_port: DEFAULT_WEB_PORT,
        }
    }

    fn merge(args: &ConfigArgs, file: &FileConfig) -> Result<Self, ConfigError> {
        let data_dir = args
            .data_dir
            .clone()
            .or_else(|| file.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let mut config = Self::with_data_dir(expand_home(&data_dir));

        let pick = |cli: &Option<PathBuf>, toml: &Option<PathBuf>, default: PathBuf| {
            cli.clone()
                .or_else(|| toml.clone())
                .map(|p| expand_home(&p))
                .unwrap_or(default)
        };
        config.status_log = pick(&args.status_log, &file.status_log, config.status_log);
        config.history_log = pick(&args.history_log, &file.history_log, config.history_log);
        config.active_sessions =
            pick(&args.active_sessions, &file.active_sessions, config.active_sessions);
        config.server_status = pick(&args.server_status, &file.server_status, config.server_status);
        config.client_geo_db = pick(&args.client_geo_db, &file.client_geo_db, config.client_geo_db);
        config.lock_file = pick(&args.lock_file, &file.lock_file, config.lock_file);

        if let Some(tz) = args.timezone.as_ref().or(file.timezone.as_ref()) {
            config.timezone = tz.parse()?;
        }

        if let Some(secs) = args.poll_interval_secs.or(file.poll_interval_secs) {
            if secs == 0 {
                return Err(ConfigError::NotInRange(
                    "poll_interval_secs must be at least 1".to_string(),
                ));
            }
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(addr) = args.web_bind_address.or(file.web_bind_address) {
            config.web_bind_address = addr;
        }
        if let Some(port) = args.web_port.or(file.web_port) {
            config.web_port = port;
        }

        for data_file in [
            &config.history_log,
            &config.active_sessions,
            &config.server_status,
            &config.client_geo_db,
        ] {
            if data_file == &config.lock_file {
                return Err(ConfigError::NotInRange(format!(
                    "lock file {} must differ from the data files",
                    config.lock_file.display()
                )));
            }
        }

        Ok(config)
    }

    /// Creates missing parent directories and seeds missing documents so the
    /// query layer can read them before the first cycle has run.
    pub fn ensure_data_files(&self) -> Result<(), ConfigError> {
        let seeds: [(&Path, &str); 4] = [
            (&self.history_log, "[]\n"),
            (&self.active_sessions, "{}\n"),
            (&self.server_status, "{}\n"),
            (&self.client_geo_db, "{\n  \"clients\": {},\n  \"updated_at\": null\n}\n"),
        ];
        for (path, payload) in seeds {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            if path.exists() {
                continue;
            }
            fs::write(path, payload)?;
            info!("Seeded {}", path.display());
        }
        if let Some(parent) = self.lock_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

/// Expands a leading `~` to the user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}
