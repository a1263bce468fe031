//! Client error taxonomy.
//!
//! Dispatch and orchestration branch on these variants: connectivity
//! failures abort a drain and flip the queue offline, transient server
//! errors retry with backoff, rejections dead-letter immediately, and
//! auth failures stop the daemon.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Could not reach the server at all (DNS, connect, timeout).
    #[error("connectivity failure: {0}")]
    Connectivity(String),

    /// The server understood the request and refused it. Retrying the
    /// same payload will not help.
    #[error("remote rejected request ({status}): {body}")]
    RemoteRejected { status: u16, body: String },

    /// Server-side fault (5xx). Worth retrying with backoff.
    #[error("transient server error ({status})")]
    TransientServer { status: u16 },

    /// Told to slow down: the server answered 429, or a sync was
    /// requested again before the minimum interval elapsed.
    #[error("throttled, try again later")]
    Throttled,

    /// A sync session is already running.
    #[error("sync already in progress")]
    AlreadyInProgress,

    /// Queue is in offline mode; dispatch is paused.
    #[error("offline, dispatch paused")]
    Offline,

    #[error("conflict not found: {0}")]
    ConflictNotFound(String),

    #[error("realtime channel error: {0}")]
    Channel(String),

    #[error(transparent)]
    Engine(#[from] ledgersync_engine::Error),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl SyncError {
    /// Classify an HTTP status the remote returned.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => SyncError::Throttled,
            500..=599 => SyncError::TransientServer { status },
            _ => SyncError::RemoteRejected { status, body },
        }
    }

    /// Auth failures are fatal for the whole daemon, not just one change.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteRejected {
                status: 401 | 403,
                ..
            }
        )
    }

    /// Whether the same request may succeed later without modification.
    pub fn should_retry(&self) -> bool {
        matches!(
            self,
            SyncError::Connectivity(_) | SyncError::TransientServer { .. } | SyncError::Throttled
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        // Status-bearing errors are classified at the call site where the
        // body is available; anything reaching here is transport-level.
        SyncError::Connectivity(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
