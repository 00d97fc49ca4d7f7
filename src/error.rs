//! Error types
//!
//! Only `GazetteerError` and `SupervisorError` are fatal. Everything the poll
//! loop meets at runtime is logged and the cycle continues.

use thiserror::Error;

/// Gazetteer load failures (fatal at startup)
#[derive(Debug, Error)]
pub enum GazetteerError {
    #[error("cannot read gazetteer cache: {0}")]
    Io(#[from] std::io::Error),

    #[error("gazetteer json is invalid: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("gazetteer document has no 'areas' object")]
    MissingAreas,

    #[error("gazetteer contains no locations")]
    Empty,

    #[error("gazetteer unavailable: local cache {path} failed ({local}), remote failed ({remote})")]
    Unavailable {
        path: String,
        local: String,
        remote: String,
    },
}

/// Feed retrieval failures (non-fatal, per tick)
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected http status {0}")]
    Status(u16),

    #[error("malformed feed body: {0}")]
    Malformed(String),
}

/// Export/persistence failures (non-fatal, logged)
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sink disabled after permission failure")]
    Disabled,
}

impl ExportError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        ExportError::Io {
            path: path.into(),
            source,
        }
    }

    /// Permission-class failures disable persistence instead of retrying forever
    pub fn is_permission(&self) -> bool {
        matches!(self, ExportError::Io { source, .. } if source.kind() == std::io::ErrorKind::PermissionDenied)
    }
}

/// Configuration load failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Load(#[from] config::ConfigError),
}

/// Process-level failures surfaced by the supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("this supervisor already owns an engine")]
    AlreadyInitialized,

    #[error("engine not initialized")]
    NotInitialized,

    #[error("poll loop already running")]
    AlreadyRunning,

    #[error(transparent)]
    Gazetteer(#[from] GazetteerError),

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}
