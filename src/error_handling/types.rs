use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidTimezone(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidTimezone(e) => write!(f, "Invalid timezone: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlError(err.to_string())
    }
}

/// A fault confined to one row of a status snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    MissingFields(usize),
    InvalidByteCount(String),
    InvalidTimestamp(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingFields(n) => write!(f, "Expected at least 5 fields, found {}", n),
            ParseError::InvalidByteCount(v) => write!(f, "Invalid byte count: {:?}", v),
            ParseError::InvalidTimestamp(v) => write!(f, "Invalid timestamp: {:?}", v),
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug)]
pub enum StorageError {
    ReadFailed(PathBuf, std::io::Error),
    WriteFailed(PathBuf, std::io::Error),
    Serialization(serde_json::Error),
    CorruptDocument(PathBuf, String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ReadFailed(p, e) => write!(f, "Storage read failed for {}: {}", p.display(), e),
            StorageError::WriteFailed(p, e) => write!(f, "Storage write failed for {}: {}", p.display(), e),
            StorageError::Serialization(e) => write!(f, "Storage serialization failed: {}", e),
            StorageError::CorruptDocument(p, e) => write!(f, "Corrupt document {}: {}", p.display(), e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err)
    }
}

#[derive(Debug)]
pub enum LockError {
    OpenFailed(PathBuf, std::io::Error),
    AcquireFailed(PathBuf, std::io::Error),
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockError::OpenFailed(p, e) => write!(f, "Unable to open lock file {}: {}", p.display(), e),
            LockError::AcquireFailed(p, e) => write!(f, "Unable to lock {}: {}", p.display(), e),
        }
    }
}

impl std::error::Error for LockError {}

/// Failure of one reconciliation cycle. Durable documents are left as they
/// were before the failing write.
#[derive(Debug)]
pub enum CycleError {
    Lock(LockError),
    SnapshotUnavailable(PathBuf, std::io::Error),
    Storage(StorageError),
    WorkerFailed(String),
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleError::Lock(e) => write!(f, "Lock error: {}", e),
            CycleError::SnapshotUnavailable(p, e) => {
                write!(f, "Status snapshot {} unavailable: {}", p.display(), e)
            }
            CycleError::Storage(e) => write!(f, "Storage error: {}", e),
            CycleError::WorkerFailed(e) => write!(f, "Cycle worker failed: {}", e),
        }
    }
}

impl std::error::Error for CycleError {}

impl From<LockError> for CycleError {
    fn from(err: LockError) -> Self {
        CycleError::Lock(err)
    }
}

impl From<StorageError> for CycleError {
    fn from(err: StorageError) -> Self {
        CycleError::Storage(err)
    }
}

#[derive(Debug)]
pub enum WebError {
    Cycle(CycleError),
    Storage(StorageError),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Cycle(e) => write!(f, "Cycle error: {}", e),
            WebError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

impl From<CycleError> for WebError {
    fn from(err: CycleError) -> Self {
        WebError::Cycle(err)
    }
}

impl From<StorageError> for WebError {
    fn from(err: StorageError) -> Self {
        WebError::Storage(err)
    }
}

impl WebError {
    /// Machine-readable code of the API error payload.
    pub fn code(&self) -> &'static str {
        match self {
            WebError::Cycle(_) => "cycle_failed",
            WebError::Storage(_) => "storage_error",
        }
    }
}

#[derive(Debug)]
pub enum ControllerError {
    Config(ConfigError),
    Cycle(CycleError),
    Output(serde_json::Error),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::Config(e) => write!(f, "Configuration error: {}", e),
            ControllerError::Cycle(e) => write!(f, "{}", e),
            ControllerError::Output(e) => write!(f, "Unable to render output: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::Config(err)
    }
}

impl From<CycleError> for ControllerError {
    fn from(err: CycleError) -> Self {
        ControllerError::Cycle(err)
    }
}

impl From<serde_json::Error> for ControllerError {
    fn from(err: serde_json::Error) -> Self {
        ControllerError::Output(err)
    }
}
