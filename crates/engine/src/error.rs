//! Deploy error types.

use std::path::PathBuf;

/// Errors that end a deployment run.
///
/// Per-directory and per-file failures are not errors at this level; they
/// are recorded as [`Failure`](crate::types::Failure) entries in the result.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("local source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection failed: {0}")]
    Connection(#[source] RemoteError),

    #[error("session lost: {0}")]
    SessionLost(String),

    #[error("cancelled")]
    Cancelled,
}

/// Errors reported by a remote session or channel implementation.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("session lost: {0}")]
    SessionLost(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// True when the underlying session is unusable and the run must stop.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::SessionLost(_))
    }

    /// True when the server declined to open another channel. The work was
    /// never attempted and can be retried on a channel that is already open.
    pub fn is_channel_refused(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}
