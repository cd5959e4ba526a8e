//! Filesystem-backed remote store.
//!
//! Treats a local directory (typically a mounted share) as the remote root.
//! Remote paths are resolved beneath that base and may not escape it.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::RemoteError;
use crate::session::{
    BoxFuture, Channel, Connector, DirectoryStatus, RemoteSession, SessionCapabilities,
};
use crate::types::RemoteTarget;

/// Connects to a directory on a locally mounted filesystem.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    base: PathBuf,
}

impl LocalConnector {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl Connector for LocalConnector {
    fn connect<'a>(
        &'a self,
        _target: &'a RemoteTarget,
    ) -> BoxFuture<'a, Result<Arc<dyn RemoteSession>, RemoteError>> {
        Box::pin(async move {
            let meta = tokio::fs::metadata(&self.base).await.map_err(|e| {
                RemoteError::NotFound(format!("{}: {e}", self.base.display()))
            })?;
            if !meta.is_dir() {
                return Err(RemoteError::NotFound(format!(
                    "{} is not a directory",
                    self.base.display()
                )));
            }
            debug!(base = %self.base.display(), "local store opened");
            Ok(Arc::new(LocalSession {
                base: Arc::new(self.base.clone()),
            }) as Arc<dyn RemoteSession>)
        })
    }
}

pub struct LocalSession {
    base: Arc<PathBuf>,
}

impl RemoteSession for LocalSession {
    fn open_channel(&self) -> BoxFuture<'_, Result<Box<dyn Channel>, RemoteError>> {
        let base = Arc::clone(&self.base);
        Box::pin(async move { Ok(Box::new(LocalChannel { base }) as Box<dyn Channel>) })
    }

    fn capabilities(&self) -> SessionCapabilities {
        SessionCapabilities {
            concurrent_channels: true,
        }
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            debug!(base = %self.base.display(), "local store closed");
        })
    }
}

struct LocalChannel {
    base: Arc<PathBuf>,
}

impl Channel for LocalChannel {
    fn create_directory<'a>(
        &'a mut self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<DirectoryStatus, RemoteError>> {
        Box::pin(async move {
            let target = resolve_remote(&self.base, path)?;
            match tokio::fs::create_dir(&target).await {
                Ok(()) => Ok(DirectoryStatus::Created),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if tokio::fs::metadata(&target).await?.is_dir() {
                        Ok(DirectoryStatus::AlreadyExists)
                    } else {
                        Err(RemoteError::Protocol(format!(
                            "{path} exists and is not a directory"
                        )))
                    }
                }
                Err(e) => Err(map_io(e, path)),
            }
        })
    }

    fn put<'a>(
        &'a mut self,
        local: &'a Path,
        remote: &'a str,
    ) -> BoxFuture<'a, Result<u64, RemoteError>> {
        Box::pin(async move {
            let target = resolve_remote(&self.base, remote)?;
            tokio::fs::copy(local, &target)
                .await
                .map_err(|e| map_io(e, remote))
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {})
    }
}

fn map_io(e: std::io::Error, path: &str) -> RemoteError {
    match e.kind() {
        ErrorKind::PermissionDenied => RemoteError::PermissionDenied(path.to_string()),
        ErrorKind::NotFound => RemoteError::NotFound(path.to_string()),
        _ => RemoteError::Io(e),
    }
}

/// Resolves a `/`-separated remote path beneath `base`.
///
/// Rejects:
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
///
/// A leading `/` is anchored at `base` rather than the filesystem root.
pub fn resolve_remote(base: &Path, remote: &str) -> Result<PathBuf, RemoteError> {
    let mut resolved = base.to_path_buf();

    for component in Path::new(remote).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir => {
                return Err(RemoteError::PermissionDenied(format!(
                    "parent directory traversal not allowed: {remote}"
                )));
            }
            Component::Prefix(_) => {
                return Err(RemoteError::PermissionDenied(format!(
                    "path prefix not allowed: {remote}"
                )));
            }
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_target;
    use tempfile::TempDir;

    async fn open(base: &Path) -> (Arc<dyn RemoteSession>, Box<dyn Channel>) {
        let session = LocalConnector::new(base)
            .connect(&test_target())
            .await
            .unwrap();
        let channel = session.open_channel().await.unwrap();
        (session, channel)
    }

    #[test]
    fn resolves_under_base() {
        let base = Path::new("/srv/www");
        assert_eq!(resolve_remote(base, "site/a.txt").unwrap(), base.join("site/a.txt"));
        assert_eq!(resolve_remote(base, "/site").unwrap(), base.join("site"));
        assert_eq!(resolve_remote(base, ".").unwrap(), base.to_path_buf());
        assert_eq!(resolve_remote(base, "./site/./b").unwrap(), base.join("site/b"));
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        let base = Path::new("/srv/www");
        assert!(resolve_remote(base, "../../../etc/passwd").is_err());
        assert!(resolve_remote(base, "site/../../escape").is_err());
    }

    #[tokio::test]
    async fn connect_requires_existing_base() {
        let dir = TempDir::new().unwrap();
        let result = LocalConnector::new(dir.path().join("missing"))
            .connect(&test_target())
            .await;
        assert!(matches!(result, Err(RemoteError::NotFound(_))));
    }

    #[tokio::test]
    async fn mkdir_reports_existing() {
        let dir = TempDir::new().unwrap();
        let (_session, mut channel) = open(dir.path()).await;

        assert_eq!(
            channel.create_directory("site").await.unwrap(),
            DirectoryStatus::Created
        );
        assert_eq!(
            channel.create_directory("site").await.unwrap(),
            DirectoryStatus::AlreadyExists
        );
        assert!(dir.path().join("site").is_dir());
    }

    #[tokio::test]
    async fn mkdir_over_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("site"), b"not a dir").unwrap();
        let (_session, mut channel) = open(dir.path()).await;

        assert!(channel.create_directory("site").await.is_err());
    }

    #[tokio::test]
    async fn mkdir_without_parent_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (_session, mut channel) = open(dir.path()).await;

        let err = channel.create_directory("a/b/c").await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    #[tokio::test]
    async fn put_overwrites_existing_file() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let local = src.path().join("index.html");
        std::fs::write(&local, b"new content").unwrap();
        std::fs::write(dst.path().join("index.html"), b"old").unwrap();

        let (_session, mut channel) = open(dst.path()).await;
        let bytes = channel.put(&local, "index.html").await.unwrap();

        assert_eq!(bytes, 11);
        assert_eq!(
            std::fs::read(dst.path().join("index.html")).unwrap(),
            b"new content"
        );
    }
}
