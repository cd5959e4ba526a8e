//! Remote session and channel traits.
//!
//! Transports implement these to plug into the deploy engine. Using traits
//! keeps the scheduling logic decoupled from SSH and testable with mocks.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::RemoteError;
use crate::types::RemoteTarget;

/// Boxed `Send` future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of asking a channel to create one directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryStatus {
    Created,
    AlreadyExists,
}

/// What a session can do beyond a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCapabilities {
    /// Whether independent channels may be opened and used concurrently.
    pub concurrent_channels: bool,
}

/// Establishes authenticated sessions.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        target: &'a RemoteTarget,
    ) -> BoxFuture<'a, Result<Arc<dyn RemoteSession>, RemoteError>>;
}

/// One authenticated connection to the remote store.
///
/// Shared by upload workers, which only use it to open their own channels.
pub trait RemoteSession: Send + Sync {
    /// Opens a new independent channel over this session.
    fn open_channel(&self) -> BoxFuture<'_, Result<Box<dyn Channel>, RemoteError>>;

    fn capabilities(&self) -> SessionCapabilities;

    /// Tears the session down. Must be safe to call once after any failure.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// A logical stream within a session, owned by exactly one user at a time.
pub trait Channel: Send {
    fn create_directory<'a>(
        &'a mut self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<DirectoryStatus, RemoteError>>;

    /// Writes the content of `local` to `remote`, replacing any existing file.
    /// Returns the number of bytes written.
    fn put<'a>(&'a mut self, local: &'a Path, remote: &'a str)
    -> BoxFuture<'a, Result<u64, RemoteError>>;

    fn close(self: Box<Self>) -> BoxFuture<'static, ()>;
}
